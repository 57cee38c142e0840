//! Failure dispositions consulted by the connection state machine.

use std::fmt;

/// Classes of failure the connection can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// A send or receive on an otherwise live socket failed.
    Transport,
    /// Capability negotiation failed or was rejected.
    Handshake,
    /// The service closed the session.
    ServiceClosed,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Transport => "transport",
            FailureClass::Handshake => "handshake",
            FailureClass::ServiceClosed => "service closed",
        };
        f.write_str(name)
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Report the failure and keep the connection.
    Continue,
    /// Give the connection up. Nothing reconnects automatically.
    DoNotRestart,
}

/// Failure class to disposition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    transport: Disposition,
    handshake: Disposition,
    service_closed: Disposition,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            transport: Disposition::Continue,
            handshake: Disposition::DoNotRestart,
            service_closed: Disposition::DoNotRestart,
        }
    }
}

impl ErrorPolicy {
    /// Looks up the disposition for a failure class.
    pub fn disposition(&self, class: FailureClass) -> Disposition {
        match class {
            FailureClass::Transport => self.transport,
            FailureClass::Handshake => self.handshake,
            FailureClass::ServiceClosed => self.service_closed,
        }
    }

    /// Returns a copy with one entry replaced.
    pub fn with(mut self, class: FailureClass, disposition: Disposition) -> Self {
        match class {
            FailureClass::Transport => self.transport = disposition,
            FailureClass::Handshake => self.handshake = disposition,
            FailureClass::ServiceClosed => self.service_closed = disposition,
        }
        self
    }
}
