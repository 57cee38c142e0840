//! Bridge Core - Session data shared by the transport and the host.
//!
//! This crate holds the session configuration, the document model, the
//! in-memory overlay files and a local edit buffer. It has no knowledge of
//! the wire protocol.

pub mod buffer;
pub mod config;
pub mod contribution;
pub mod document;
pub mod overlay;
pub mod theme;

pub use buffer::TextBuffer;
pub use config::{
    path_to_uri, ConfigError, EditorOptions, EndpointConfig, QueryValue, SessionConfig,
    DEFAULT_CONTENT,
};
pub use contribution::{
    CommandContribution, CommandIds, Contributions, KeybindingContribution, LanguageContribution,
};
pub use document::Document;
pub use overlay::OverlayFileSystem;
pub use theme::EditorTheme;
