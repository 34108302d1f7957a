//! Error taxonomy for the forms subsystem.
//!
//! Every failure is caught at the request boundary and classified with
//! [`FormsError::status`]. Degraded results (missing location, missing prior
//! message) are not errors at all and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

pub type FormsResult<T> = Result<T, FormsError>;

#[derive(Debug, Error)]
pub enum FormsError {
    #[error("{} escapes forms directory", .0.display())]
    PathEscape(PathBuf),

    #[error("Malformed form metadata: {0}")]
    Schema(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Missing reply_template tag in form XML for a reply message")]
    MissingReplyTemplate,

    #[error("Missing display_form tag in form XML")]
    MissingDisplayTemplate,

    #[error("Invalid template {path}: {reason}")]
    InvalidTemplate { path: String, reason: String },

    #[error("Template query param missing")]
    MissingTemplateRef,

    #[error("Missing form instance token")]
    MissingSessionToken,

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Update failed: {0}")]
    UpdateTransport(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client-visible classification of a [`FormsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorStatus {
    pub fn code(self) -> u16 {
        match self {
            ErrorStatus::BadRequest => 400,
            ErrorStatus::Forbidden => 403,
            ErrorStatus::NotFound => 404,
            ErrorStatus::Internal => 500,
        }
    }
}

impl FormsError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            FormsError::PathEscape(_) => ErrorStatus::Forbidden,
            FormsError::TemplateNotFound(_) | FormsError::MessageNotFound(_) => {
                ErrorStatus::NotFound
            }
            FormsError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorStatus::NotFound,
            FormsError::Schema(_)
            | FormsError::MissingReplyTemplate
            | FormsError::MissingDisplayTemplate
            | FormsError::MissingTemplateRef
            | FormsError::MissingSessionToken
            | FormsError::UnsupportedContent(_)
            | FormsError::Json(_) => ErrorStatus::BadRequest,
            FormsError::InvalidTemplate { .. }
            | FormsError::LocationUnavailable(_)
            | FormsError::UpdateTransport(_)
            | FormsError::Cancelled
            | FormsError::Config(_)
            | FormsError::Io(_) => ErrorStatus::Internal,
        }
    }

    pub(crate) fn invalid_template(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FormsError::InvalidTemplate {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for FormsError {
    fn from(e: reqwest::Error) -> Self {
        FormsError::UpdateTransport(e.to_string())
    }
}
