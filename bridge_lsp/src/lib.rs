//! Bridge LSP - Language-service protocol plumbing for one editing session.
//!
//! This crate speaks JSON-RPC to a language service over a WebSocket. It
//! owns the connection state machine, keeps the edited document in sync and
//! dispatches host commands. Nothing here spawns tasks; the owner drives the
//! read half of the transport and feeds messages back in.

pub mod client;
pub mod commands;
pub mod document;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod policy;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ConnectionManager, ConnectionState, RemoteResult};
pub use commands::{forward_to_service, BuiltinCommand, CommandHandler, CommandRegistry};
pub use document::DocumentBridge;
pub use error::{BridgeError, Result, TransportError};
pub use handshake::{HandshakeOptions, WorkspaceFolderDescriptor};
pub use messages::{FailureReport, LogLevel, SessionEvent};
pub use policy::{Disposition, ErrorPolicy, FailureClass};
pub use transport::{CloseSignal, TransportReader, TransportSocket, TransportWriter};
pub use types::{Diagnostic, DiagnosticSeverity, Position, Range};
