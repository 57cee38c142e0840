//! Bridge Session - Mounts an editing session and exposes it to a host.
//!
//! The controller wires the document, the command registry and the
//! connection together; [`Session`] runs it off the host's thread.

pub mod controller;
pub mod session;

pub use controller::{ChangeCallback, HostRequest, SessionController};
pub use session::{wait_for_result, Session, SessionHandle};

pub use ls_bridge_core::{EditorOptions, EditorTheme, SessionConfig};
pub use ls_bridge_lsp::{
    BridgeError, ConnectionState, Diagnostic, FailureReport, LogLevel, RemoteResult, SessionEvent,
};
