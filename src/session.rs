//! Session Store - composed messages waiting for their authoring session
//!
//! Each form authoring tab submits under its own token. The latest
//! submission per token wins; entries older than the TTL are swept on write.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use tracing::info;

use crate::message::ComposedMessage;

pub const DEFAULT_TTL_HOURS: i64 = 24;

pub struct SessionStore {
    entries: RwLock<HashMap<String, ComposedMessage>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store `message` under `token`, replacing any previous entry, then drop
    /// every entry older than the TTL. Both happen under one write lock.
    pub fn put(&self, token: impl Into<String>, message: ComposedMessage) {
        self.put_at(token, message, Utc::now());
    }

    pub(crate) fn put_at(&self, token: impl Into<String>, message: ComposedMessage, now: DateTime<Utc>) {
        let mut entries = self.entries.write();
        entries.insert(token.into(), message);
        let ttl = self.ttl;
        entries.retain(|_, msg| {
            let age = now - msg.submitted_at;
            let keep = age <= ttl;
            if !keep {
                info!("deleting old form data after {} hrs", age.num_hours());
            }
            keep
        });
    }

    pub fn get(&self, token: &str) -> Option<ComposedMessage> {
        self.entries.read().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
