//! Forms configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FormsError, FormsResult};

pub const DEFAULT_UPDATE_INFO_URL: &str =
    "https://api.getpat.io/v1/forms/standard-templates/latest";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormsConfig {
    pub forms_path: PathBuf,
    #[serde(default)]
    pub sequence_path: Option<PathBuf>,
    #[serde(default = "default_sequence_format")]
    pub sequence_format: String,
    #[serde(default)]
    pub my_call: String,
    #[serde(default)]
    pub locator: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
    /// URL prefix under which form assets are served; the `{FormFolder}` tag builds on it.
    #[serde(default = "default_asset_path")]
    pub asset_path: String,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

fn default_sequence_format() -> String { "%06d".to_string() }
fn default_app_version() -> String { format!("radioforms v{}", crate::ENGINE_VERSION) }
fn default_user_agent() -> String { format!("radioforms/{}", crate::ENGINE_VERSION) }
fn default_submit_path() -> String { "/api/form".to_string() }
fn default_asset_path() -> String { "/api/forms".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Position may be inserted into form templates.
    #[serde(default)]
    pub allow_forms: bool,
    #[serde(default = "default_location_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed position, used instead of a live provider when both are set.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

fn default_location_timeout_ms() -> u64 { 3000 }

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_forms: false,
            timeout_ms: default_location_timeout_ms(),
            latitude: None,
            longitude: None,
        }
    }
}

impl LocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    #[serde(default = "default_info_url")]
    pub info_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_info_url() -> String { DEFAULT_UPDATE_INFO_URL.to_string() }
fn default_request_timeout_secs() -> u64 { 10 }

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            info_url: default_info_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl FormsConfig {
    pub fn new(forms_path: impl Into<PathBuf>) -> Self {
        Self {
            forms_path: forms_path.into(),
            sequence_path: None,
            sequence_format: default_sequence_format(),
            my_call: String::new(),
            locator: String::new(),
            app_version: default_app_version(),
            user_agent: default_user_agent(),
            submit_path: default_submit_path(),
            asset_path: default_asset_path(),
            location: LocationConfig::default(),
            update: UpdateConfig::default(),
        }
    }

    pub fn load(path: &Path) -> FormsResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> FormsResult<Self> {
        toml::from_str(content).map_err(|e| FormsError::Config(e.to_string()))
    }

    /// Where the sequence counter lives; next to the forms by default.
    pub fn sequence_file(&self) -> PathBuf {
        self.sequence_path
            .clone()
            .unwrap_or_else(|| self.forms_path.join("sequence.dat"))
    }
}
