//! Host-facing session API.
//!
//! A [`Session`] runs its controller on a separate thread with its own
//! tokio runtime and talks to the host through channels, so a synchronous
//! host never blocks on the network.

use crate::controller::{HostRequest, SessionController};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ls_bridge_core::{EditorOptions, SessionConfig};
use ls_bridge_lsp::{BridgeError, RemoteResult, Result, SessionEvent};
use lsp_types::FileChangeType;
use serde_json::Value;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle for sending requests to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    request_tx: mpsc::UnboundedSender<HostRequest>,
}

impl SessionHandle {
    fn send(&self, request: HostRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| BridgeError::SessionEnded)
    }

    /// Reports the full buffer text after an edit.
    pub fn buffer_changed(&self, text: impl Into<String>) -> Result<()> {
        self.send(HostRequest::BufferChanged { text: text.into() })
    }

    /// Invokes a command. Wait on the returned receiver for the result
    /// (`blocking_recv` from a synchronous host).
    pub fn execute_command(
        &self,
        name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<oneshot::Receiver<RemoteResult>> {
        let (reply, receiver) = oneshot::channel();
        self.send(HostRequest::ExecuteCommand {
            name: name.into(),
            arguments,
            reply,
        })?;
        Ok(receiver)
    }

    pub fn restart_server(&self, arguments: Vec<Value>) -> Result<oneshot::Receiver<RemoteResult>> {
        self.execute_command("restartServer", arguments)
    }

    pub fn organize_imports(&self, arguments: Vec<Value>) -> Result<oneshot::Receiver<RemoteResult>> {
        self.execute_command("organizeImports", arguments)
    }

    /// Reports a file-system change inside the workspace.
    pub fn file_changed(&self, uri: impl Into<String>, change: FileChangeType) -> Result<()> {
        self.send(HostRequest::FileChanged {
            uri: uri.into(),
            change,
        })
    }

    /// Asks the session to tear down.
    pub fn unmount(&self) -> Result<()> {
        self.send(HostRequest::Unmount)
    }
}

/// Waits for a command result from synchronous code.
pub fn wait_for_result(receiver: oneshot::Receiver<RemoteResult>) -> RemoteResult {
    receiver
        .blocking_recv()
        .unwrap_or(Err(BridgeError::SessionEnded))
}

/// A mounted editing session.
pub struct Session {
    handle: SessionHandle,
    events: Receiver<SessionEvent>,
    options: EditorOptions,
    config: SessionConfig,
    thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Mounts and starts a session.
    pub fn start(config: SessionConfig) -> Result<Self> {
        Self::start_with_callback(config, |_| {})
    }

    /// Mounts and starts a session; `on_change` sees the full buffer after
    /// every accepted edit.
    pub fn start_with_callback(
        config: SessionConfig,
        on_change: impl FnMut(&str) + Send + 'static,
    ) -> Result<Self> {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let options = config.editor_options();
        let controller = SessionController::mount(config.clone(), events_tx)?.on_change(on_change);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Transport(e.into()))?;

        let thread = thread::Builder::new()
            .name(format!("ls-bridge-{}", config.id))
            .spawn(move || runtime.block_on(controller.run(request_rx)))
            .map_err(|e| BridgeError::Transport(e.into()))?;

        Ok(Self {
            handle: SessionHandle { request_tx },
            events,
            options,
            config,
            thread: Some(thread),
        })
    }

    /// Returns a handle for sending requests.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Options for the embedding editing surface.
    pub fn editor_options(&self) -> &EditorOptions {
        &self.options
    }

    /// Resolves a key chord through the contributed keybindings.
    pub fn command_for_key(&self, key: &str) -> Option<&str> {
        self.config.contributions.command_for_key(key)
    }

    /// Tries to receive an event (non-blocking).
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Option<SessionEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::SessionEnded),
        }
    }

    /// Unmounts the session and waits for it to finish.
    pub fn shutdown(&mut self) {
        let _ = self.handle.unmount();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Session thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
