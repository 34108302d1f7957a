//! Position source for location insertion tags

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LocationConfig;
use crate::error::{FormsError, FormsResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Degrees and decimal minutes: `59-24.83N 005-16.08E`.
    pub fn degrees_minutes(&self) -> String {
        let (lat_d, lat_m) = split_degrees(self.lat);
        let (lon_d, lon_m) = split_degrees(self.lon);
        format!(
            "{:02}-{:05.2}{} {:03}-{:05.2}{}",
            lat_d,
            lat_m,
            hemisphere(self.lat, 'N', 'S'),
            lon_d,
            lon_m,
            hemisphere(self.lon, 'E', 'W'),
        )
    }

    /// Unsigned decimal degrees with hemisphere letters: `59.4138N 5.2680E`.
    pub fn decimal(&self) -> String {
        format!(
            "{:.4}{} {:.4}{}",
            self.lat.abs(),
            hemisphere(self.lat, 'N', 'S'),
            self.lon.abs(),
            hemisphere(self.lon, 'E', 'W'),
        )
    }

    pub fn signed_decimal(&self) -> String {
        format!("{:.4} {:.4}", self.lat, self.lon)
    }
}

fn split_degrees(value: f64) -> (u32, f64) {
    let abs = value.abs();
    let mut degrees = abs.trunc() as u32;
    let mut minutes = ((abs - abs.trunc()) * 60.0 * 100.0).round() / 100.0;
    if minutes >= 60.0 {
        degrees += 1;
        minutes = 0.0;
    }
    (degrees, minutes)
}

fn hemisphere(value: f64, positive: char, negative: char) -> char {
    if value < 0.0 { negative } else { positive }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> FormsResult<Position>;
}

/// A fixed position from configuration.
pub struct StaticLocation(pub Position);

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_position(&self) -> FormsResult<Position> {
        Ok(self.0)
    }
}

/// Ask `provider` for a position, bounded by the configured timeout.
///
/// Every failure (disabled, not allowed in forms, provider error, timeout)
/// comes back as `None` after being logged.
pub async fn fetch_position(
    provider: Option<&dyn LocationProvider>,
    config: &LocationConfig,
) -> Option<Position> {
    match try_fetch(provider, config.timeout(), config).await {
        Ok(pos) => Some(pos),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

async fn try_fetch(
    provider: Option<&dyn LocationProvider>,
    timeout: Duration,
    config: &LocationConfig,
) -> FormsResult<Position> {
    if !config.enabled {
        return Err(FormsError::LocationUnavailable("not configured".into()));
    }
    if !config.allow_forms {
        return Err(FormsError::LocationUnavailable(
            "allow_forms is disabled, position will not be available in form templates".into(),
        ));
    }
    let provider = provider.ok_or_else(|| FormsError::LocationUnavailable("no provider".into()))?;
    debug!("waiting for position...");
    tokio::time::timeout(timeout, provider.current_position())
        .await
        .map_err(|_| FormsError::LocationUnavailable(format!("no position within {:?}", timeout)))?
}
