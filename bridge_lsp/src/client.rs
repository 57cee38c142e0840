//! Connection manager - Owns the single connection of a session.
//!
//! The manager drives the state machine `Idle -> Connecting -> Handshaking
//! -> Ready -> Closed`, correlates responses with pending requests and
//! answers the few requests a language service sends to its client. It
//! never reconnects: once `Closed`, a new manager is needed.

use crate::error::{BridgeError, Result, TransportError};
use crate::handshake::HandshakeOptions;
use crate::messages::{FailureReport, SessionEvent};
use crate::policy::{Disposition, FailureClass};
use crate::transport::{
    parse_message, CloseSignal, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, TransportReader, TransportSocket, TransportWriter,
    METHOD_NOT_FOUND,
};
use crate::types::Diagnostic;
use crossbeam_channel::Sender;
use lsp_types::{
    ConfigurationParams, DidChangeWatchedFilesParams, ExecuteCommandParams, FileEvent,
    InitializeResult, LogMessageParams, PublishDiagnosticsParams, ServerCapabilities,
    ShowMessageParams,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Handshaking => 2,
            ConnectionState::Ready => 3,
            ConnectionState::Closed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of a request sent to the service.
pub type RemoteResult = Result<Value>;

/// Tracks a request awaiting its response.
enum PendingRequest {
    Initialize,
    ExecuteCommand {
        command: String,
        reply: oneshot::Sender<RemoteResult>,
    },
    Shutdown,
}

/// The session's one connection to the language service.
pub struct ConnectionManager {
    state: ConnectionState,
    writer: Option<TransportWriter>,
    close_signal: Option<CloseSignal>,
    pending: HashMap<RequestId, PendingRequest>,
    next_id: i64,
    options: HandshakeOptions,
    server_commands: Vec<String>,
    server_name: Option<String>,
    events: Sender<SessionEvent>,
}

impl ConnectionManager {
    /// Creates an idle connection.
    pub fn new(options: HandshakeOptions, events: Sender<SessionEvent>) -> Self {
        Self {
            state: ConnectionState::Idle,
            writer: None,
            close_signal: None,
            pending: HashMap::new(),
            next_id: 1,
            options,
            server_commands: Vec::new(),
            server_name: None,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn options(&self) -> &HandshakeOptions {
        &self.options
    }

    /// Command ids the service advertised in its capabilities.
    pub fn server_commands(&self) -> &[String] {
        &self.server_commands
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Close signal of the attached socket, if any.
    pub fn close_signal(&self) -> Option<CloseSignal> {
        self.close_signal.clone()
    }

    /// Moves `Idle -> Connecting`.
    pub fn begin_connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(self.precondition("connect"));
        }
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    /// Records a failed connection attempt and gives the connection up.
    pub fn connect_failed(&mut self, err: &BridgeError) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.report(None, format!("failed to connect: {}", err));
        self.mark_closed();
    }

    /// Attaches an open socket and starts the handshake.
    ///
    /// Returns the read half, which the caller polls and feeds back through
    /// [`ConnectionManager::handle_message`].
    pub async fn attach(&mut self, socket: TransportSocket) -> Result<TransportReader> {
        if self.state != ConnectionState::Connecting {
            return Err(self.precondition("attach a socket"));
        }

        self.close_signal = Some(socket.on_closed());
        let (reader, writer) = socket.split();
        self.writer = Some(writer);
        self.transition(ConnectionState::Handshaking);

        let id = self.next_request_id();
        let params = serde_json::to_value(self.options.initialize_params())?;
        self.pending.insert(id.clone(), PendingRequest::Initialize);
        self.write_request(id, "initialize", Some(params)).await?;

        Ok(reader)
    }

    /// Connects to `url` and starts the handshake.
    pub async fn open(&mut self, url: &str) -> Result<TransportReader> {
        self.begin_connect()?;
        log::info!("Connecting to language service");
        match TransportSocket::connect(url).await {
            Ok(socket) => self.attach(socket).await,
            Err(e) => {
                let err = BridgeError::from(e);
                self.connect_failed(&err);
                Err(err)
            }
        }
    }

    /// Handles one inbound message.
    ///
    /// Returns the new state when the message caused a transition.
    pub async fn handle_message(&mut self, value: Value) -> Result<Option<ConnectionState>> {
        let before = self.state;

        match parse_message(&value) {
            Some(JsonRpcMessage::Response(response)) => self.handle_response(response).await?,
            Some(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(notification)
            }
            Some(JsonRpcMessage::Request(request)) => self.handle_server_request(request).await?,
            None => log::warn!("Ignoring unrecognized message: {}", value),
        }

        Ok((self.state != before).then_some(self.state))
    }

    /// Sends a notification. Only valid while `Ready`.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.require_ready("send a notification")?;
        self.write_notification(method, Some(params)).await
    }

    /// Sends `workspace/executeCommand`. Only valid while `Ready`.
    ///
    /// The returned receiver resolves with the service's reply.
    pub async fn execute_command(
        &mut self,
        params: ExecuteCommandParams,
    ) -> Result<oneshot::Receiver<RemoteResult>> {
        self.require_ready("execute a command")?;

        let id = self.next_request_id();
        let value = serde_json::to_value(&params)?;
        let (reply, receiver) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest::ExecuteCommand {
                command: params.command.clone(),
                reply,
            },
        );

        if let Err(e) = self
            .write_request(id.clone(), "workspace/executeCommand", Some(value))
            .await
        {
            self.pending.remove(&id);
            return Err(e);
        }

        log::debug!("Executing command {}", params.command);
        Ok(receiver)
    }

    /// Forwards file-system changes that match the watch glob.
    ///
    /// Returns how many changes were sent.
    pub async fn notify_file_events(&mut self, events: Vec<FileEvent>) -> Result<usize> {
        self.require_ready("notify file changes")?;

        let changes: Vec<FileEvent> = events
            .into_iter()
            .filter(|event| self.options.watches(event.uri.as_str()))
            .collect();
        if changes.is_empty() {
            return Ok(0);
        }

        let count = changes.len();
        let params = serde_json::to_value(DidChangeWatchedFilesParams { changes })?;
        self.write_notification("workspace/didChangeWatchedFiles", Some(params))
            .await?;
        Ok(count)
    }

    /// Handles a failed read or write on a live socket.
    ///
    /// The policy table only applies once `Ready`; an error while connecting
    /// or handshaking always gives the connection up.
    pub fn on_transport_error(&mut self, err: &TransportError) {
        if self.state == ConnectionState::Closed {
            log::debug!("Transport error after close: {}", err);
            return;
        }

        self.report(Some(FailureClass::Transport), err.to_string());
        if !self.is_ready() {
            log::error!("Transport error while {}, giving connection up: {}", self.state, err);
            self.mark_closed();
            return;
        }
        match self.options.policy.disposition(FailureClass::Transport) {
            Disposition::Continue => log::warn!("Transport error, keeping connection: {}", err),
            Disposition::DoNotRestart => {
                log::error!("Transport error, giving connection up: {}", err);
                self.mark_closed();
            }
        }
    }

    /// Handles the socket going away.
    pub fn on_transport_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.report(
            Some(FailureClass::ServiceClosed),
            format!("connection closed while {}", self.state),
        );
        match self.options.policy.disposition(FailureClass::ServiceClosed) {
            Disposition::DoNotRestart => log::warn!("Language service closed; not restarting"),
            Disposition::Continue => log::info!("Language service closed"),
        }
        self.mark_closed();
    }

    /// Ends the session: `shutdown` and `exit` if Ready, then closes the socket.
    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if self.is_ready() {
            let id = self.next_request_id();
            self.pending.insert(id.clone(), PendingRequest::Shutdown);
            if let Err(e) = self.write_request(id, "shutdown", None).await {
                log::debug!("Failed to send shutdown: {}", e);
            }
            if let Err(e) = self.write_notification("exit", None).await {
                log::debug!("Failed to send exit: {}", e);
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.close().await {
                log::debug!("Failed to close socket: {}", e);
            }
        }
        self.mark_closed();
    }

    async fn handle_response(&mut self, response: JsonRpcResponse) -> Result<()> {
        let Some(pending) = self.pending.remove(&response.id) else {
            log::debug!("Response for unknown request {:?}", response.id);
            return Ok(());
        };

        match pending {
            PendingRequest::Initialize => match response.error {
                Some(err) => {
                    self.handshake_failed(format!("{} (code {})", err.message, err.code))
                        .await
                }
                None => {
                    self.handshake_succeeded(response.result.unwrap_or(Value::Null))
                        .await?
                }
            },
            PendingRequest::ExecuteCommand { command, reply } => {
                let result = match response.error {
                    Some(err) => Err(BridgeError::Remote {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                if reply.send(result).is_err() {
                    log::debug!("Nobody waits for the result of {}", command);
                }
            }
            PendingRequest::Shutdown => log::debug!("Shutdown acknowledged"),
        }
        Ok(())
    }

    async fn handshake_succeeded(&mut self, result: Value) -> Result<()> {
        if self.state != ConnectionState::Handshaking {
            log::debug!("Ignoring initialize result while {}", self.state);
            return Ok(());
        }

        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(e) => {
                self.handshake_failed(format!("invalid initialize result: {}", e))
                    .await;
                return Ok(());
            }
        };

        self.server_commands = init
            .capabilities
            .execute_command_provider
            .as_ref()
            .map(|provider| provider.commands.clone())
            .unwrap_or_default();
        self.server_name = init.server_info.map(|info| info.name);

        self.write_notification("initialized", Some(json!({}))).await?;

        self.transition(ConnectionState::Ready);
        log::info!(
            "Language service {} initialized",
            self.server_name.as_deref().unwrap_or("<unnamed>")
        );
        self.emit(SessionEvent::Ready {
            server_name: self.server_name.clone(),
            capabilities_summary: format_capabilities(&init.capabilities),
        });
        Ok(())
    }

    async fn handshake_failed(&mut self, message: String) {
        let err = BridgeError::Handshake(message);
        self.report(Some(FailureClass::Handshake), err.to_string());
        match self.options.policy.disposition(FailureClass::Handshake) {
            Disposition::DoNotRestart => {
                log::error!("Handshake failed; not restarting");
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(e) = writer.close().await {
                        log::debug!("Failed to close socket after handshake failure: {}", e);
                    }
                }
                self.mark_closed();
            }
            Disposition::Continue => log::warn!("Handshake failed; waiting for the service"),
        }
    }

    fn handle_notification(&mut self, notification: JsonRpcNotification) {
        let params = notification.params.unwrap_or(Value::Null);
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                if let Ok(params) = serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    let diagnostics: Vec<Diagnostic> =
                        params.diagnostics.into_iter().map(|d| d.into()).collect();
                    self.emit(SessionEvent::Diagnostics {
                        uri: params.uri.as_str().to_string(),
                        version: params.version,
                        diagnostics,
                    });
                }
            }
            "window/logMessage" => {
                if let Ok(params) = serde_json::from_value::<LogMessageParams>(params) {
                    self.emit(SessionEvent::LogMessage {
                        level: params.typ.into(),
                        message: params.message,
                    });
                }
            }
            "window/showMessage" => {
                if let Ok(params) = serde_json::from_value::<ShowMessageParams>(params) {
                    self.emit(SessionEvent::ShowMessage {
                        level: params.typ.into(),
                        message: params.message,
                    });
                }
            }
            method => log::trace!("Unhandled notification: {}", method),
        }
    }

    async fn handle_server_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let response = match request.method.as_str() {
            "workspace/configuration" => {
                // No client-side settings: one null per requested section.
                let count = request
                    .params
                    .and_then(|p| serde_json::from_value::<ConfigurationParams>(p).ok())
                    .map(|p| p.items.len())
                    .unwrap_or(0);
                JsonRpcResponse::success(request.id, Value::Array(vec![Value::Null; count]))
            }
            "workspace/workspaceFolders" => {
                let folder = &self.options.workspace_folder;
                JsonRpcResponse::success(
                    request.id,
                    json!([{ "uri": folder.uri, "name": folder.name }]),
                )
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => {
                JsonRpcResponse::success(request.id, Value::Null)
            }
            method => {
                log::debug!("Unhandled server request: {}", method);
                JsonRpcResponse::failure(
                    request.id,
                    JsonRpcError {
                        code: METHOD_NOT_FOUND,
                        message: format!("Unhandled method {}", method),
                        data: None,
                    },
                )
            }
        };

        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let result = writer.send_response(response).await;
        self.check_write(result)
    }

    async fn write_request(
        &mut self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let result = writer.send_request(id, method, params).await;
        self.check_write(result)
    }

    async fn write_notification(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let result = writer.send_notification(method, params).await;
        self.check_write(result)
    }

    fn check_write(&mut self, result: Result<(), TransportError>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(TransportError::Closed) => {
                self.on_transport_closed();
                Err(TransportError::Closed.into())
            }
            Err(e) => {
                self.on_transport_error(&e);
                Err(e.into())
            }
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(self.precondition(operation))
        }
    }

    fn precondition(&self, operation: &'static str) -> BridgeError {
        BridgeError::Precondition {
            operation,
            state: self.state,
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        id
    }

    fn mark_closed(&mut self) {
        self.writer = None;
        if let Some(signal) = &self.close_signal {
            signal.fire();
        }
        for (_, pending) in self.pending.drain() {
            if let PendingRequest::ExecuteCommand { reply, .. } = pending {
                let _ = reply.send(Err(TransportError::Closed.into()));
            }
        }
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(next.rank() >= self.state.rank(), "{} -> {}", self.state, next);
        log::debug!("Connection {} -> {}", self.state, next);
        self.state = next;
        self.emit(SessionEvent::StateChanged { state: next });
    }

    fn report(&self, class: Option<FailureClass>, message: String) {
        let report = FailureReport { class, message };
        log::warn!("{}", report);
        self.emit(SessionEvent::Failure(report));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Formats server capabilities as a summary string.
fn format_capabilities(caps: &ServerCapabilities) -> String {
    let mut features = Vec::new();

    if caps.text_document_sync.is_some() {
        features.push("sync".to_string());
    }
    if caps.hover_provider.is_some() {
        features.push("hover".to_string());
    }
    if caps.completion_provider.is_some() {
        features.push("completion".to_string());
    }
    if caps.definition_provider.is_some() {
        features.push("definition".to_string());
    }
    if caps.code_action_provider.is_some() {
        features.push("code actions".to_string());
    }
    if let Some(provider) = &caps.execute_command_provider {
        features.push(format!("{} commands", provider.commands.len()));
    }

    features.join(", ")
}
