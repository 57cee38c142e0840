//! Error types for the session bridge.

use crate::client::ConnectionState;
use ls_bridge_core::ConfigError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the socket itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can go wrong in a session.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// A local programming error: the operation needs a different state.
    #[error("cannot {operation} while the connection is {state}")]
    Precondition {
        operation: &'static str,
        state: ConnectionState,
    },
    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("invalid uri `{0}`")]
    InvalidUri(String),
    #[error("document `{0}` is already open in another session")]
    DocumentInUse(String),
    #[error("invalid file-watch glob: {0}")]
    InvalidGlob(#[from] globset::Error),
    #[error("document is read-only")]
    ReadOnly,
    #[error("session has ended")]
    SessionEnded,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BridgeError {
    /// Returns true for errors caused by calling an operation in the wrong
    /// connection state.
    pub fn is_precondition(&self) -> bool {
        matches!(self, BridgeError::Precondition { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
