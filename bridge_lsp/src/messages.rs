//! Events sent from the session to the host.
//!
//! These are delivered over a channel the host polls, the same way state
//! changes and service output reach it regardless of which task produced them.

use crate::client::ConnectionState;
use crate::policy::FailureClass;
use crate::types::Diagnostic;
use lsp_types::MessageType;
use std::fmt;

/// Everything the host may want to show about a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection moved to a new state.
    StateChanged { state: ConnectionState },
    /// The handshake completed.
    Ready {
        server_name: Option<String>,
        /// Server capabilities description.
        capabilities_summary: String,
    },
    /// Diagnostics for a document.
    Diagnostics {
        uri: String,
        version: Option<i32>,
        diagnostics: Vec<Diagnostic>,
    },
    /// `window/logMessage` from the service.
    LogMessage { level: LogLevel, message: String },
    /// `window/showMessage` from the service.
    ShowMessage { level: LogLevel, message: String },
    /// A failure that was handled internally.
    Failure(FailureReport),
}

/// Description of a failure that did not propagate to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Policy class, if the failure was classified.
    pub class: Option<FailureClass>,
    pub message: String,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            Some(class) => write!(f, "{} failure: {}", class, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Log level for server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Log,
}

impl From<MessageType> for LogLevel {
    fn from(typ: MessageType) -> Self {
        match typ {
            MessageType::ERROR => LogLevel::Error,
            MessageType::WARNING => LogLevel::Warning,
            MessageType::INFO => LogLevel::Info,
            _ => LogLevel::Log,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Log => log::Level::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogLevel::from(MessageType::ERROR), LogLevel::Error);
        assert_eq!(LogLevel::from(MessageType::LOG), LogLevel::Log);
        assert_eq!(log::Level::from(LogLevel::Warning), log::Level::Warn);
    }

    #[test]
    fn test_failure_report_display() {
        let report = FailureReport {
            class: Some(FailureClass::Handshake),
            message: "rejected".to_string(),
        };
        assert_eq!(report.to_string(), "handshake failure: rejected");
    }
}
