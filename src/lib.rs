//! Radioforms Core - Form Composition Engine
//!
//! Fills message templates for a radio email client: sandboxed template
//! lookup, the reply-template chain carried in form attachments, two-pass
//! tag substitution and the per-session store of composed messages.
//!
//! # Ground Rules
//! 1. Nothing outside the template root is ever opened
//! 2. Unknown tags pass through untouched
//! 3. Missing optional context degrades to empty values, never to failure
//! 4. The catalog is always read fresh from disk

pub mod error;
pub mod config;
pub mod logging;
pub mod sandbox;
pub mod version;
pub mod templates;
pub mod catalog;
pub mod metadata;
pub mod message;
pub mod sequence;
pub mod location;
pub mod tags;
pub mod resolver;
pub mod builder;
pub mod session;
pub mod update;
pub mod manager;

pub use error::{ErrorStatus, FormsError, FormsResult};
pub use config::FormsConfig;
pub use sandbox::PathSandbox;
pub use templates::{Template, TemplateKind, FileIndex};
pub use catalog::FormFolder;
pub use metadata::FormMetadata;
pub use message::{Attachment, ComposedMessage, JsonMessageStore, MessageStore, StoredMessage};
pub use sequence::{FileSequence, MemorySequence, SequenceCounter, SequenceFormat};
pub use location::{LocationProvider, Position, StaticLocation};
pub use tags::{Delimiters, TagContext};
pub use resolver::{ResolvedForm, TemplateResolver};
pub use builder::MessageBuilder;
pub use session::SessionStore;
pub use update::{ArchiveExtractor, HttpUpdateService, ReleaseInfo, UpdateAction, UpdateResponse, UpdateService, ZipExtractor};
pub use manager::{FormsManager, InteractiveForm, Submission};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
