//! Messages - prior messages read for replies, and composed results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{FormsError, FormsResult};
use crate::metadata::ATTACHMENT_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "data_base64", with = "b64")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn is_form_metadata(&self) -> bool {
        self.name.starts_with(ATTACHMENT_PREFIX) && self.name.to_ascii_lowercase().ends_with(".xml")
    }
}

/// A message from the mailbox, used as the "in reply to" context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl StoredMessage {
    /// The form metadata attachment, if this is a form-based message.
    pub fn form_attachment(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_form_metadata())
    }
}

/// A message built from a template, waiting to be picked up for sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedMessage {
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub submitted_at: DateTime<Utc>,
}

pub trait MessageStore: Send + Sync {
    fn open(&self, id: &str) -> FormsResult<StoredMessage>;
}

/// Messages stored as `<dir>/<id>.json`.
pub struct JsonMessageStore {
    dir: PathBuf,
}

impl JsonMessageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MessageStore for JsonMessageStore {
    fn open(&self, id: &str) -> FormsResult<StoredMessage> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(FormsError::MessageNotFound(id.to_string()));
        }
        let path = self.dir.join(format!("{id}.json"));
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FormsError::MessageNotFound(id.to_string()),
            _ => FormsError::Io(e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
