//! Session controller - Runs one editing session end to end.
//!
//! The controller owns the connection, the document bridge and the command
//! registry. [`SessionController::run`] is a single cooperative loop: host
//! requests, connect completion and inbound service messages are handled one
//! at a time, so outbound messages leave in the order they were produced.

use ls_bridge_core::{OverlayFileSystem, SessionConfig};
use ls_bridge_lsp::types::parse_uri;
use ls_bridge_lsp::{
    forward_to_service, BridgeError, BuiltinCommand, CommandRegistry, ConnectionManager,
    ConnectionState, DocumentBridge, HandshakeOptions, RemoteResult, Result, SessionEvent,
    TransportError, TransportReader, TransportSocket,
};
use crossbeam_channel::Sender;
use lsp_types::{FileChangeType, FileEvent};
use serde_json::Value;
use std::future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// Requests from the host to a running session.
#[derive(Debug)]
pub enum HostRequest {
    /// The buffer now holds `text` in full.
    BufferChanged { text: String },
    /// Invoke a command by host alias (`restartServer`) or command id.
    ExecuteCommand {
        name: String,
        arguments: Vec<Value>,
        reply: oneshot::Sender<RemoteResult>,
    },
    /// A file in the workspace changed on disk.
    FileChanged { uri: String, change: FileChangeType },
    /// Tear the session down.
    Unmount,
}

/// Called with the full buffer text after every accepted edit.
pub type ChangeCallback = Box<dyn FnMut(&str) + Send>;

type ConnectTask = JoinHandle<std::result::Result<TransportSocket, TransportError>>;

/// Owns everything one mounted session needs.
pub struct SessionController {
    config: SessionConfig,
    connection: ConnectionManager,
    document: DocumentBridge,
    commands: CommandRegistry,
    on_change: Option<ChangeCallback>,
}

impl SessionController {
    /// Mounts a session backed by the process-wide overlay store.
    pub fn mount(config: SessionConfig, events: Sender<SessionEvent>) -> Result<Self> {
        Self::with_overlay(config, &OverlayFileSystem::global(), events)
    }

    /// Mounts a session backed by `overlay`.
    ///
    /// Validates the configuration, registers the overlay file and builds
    /// an idle connection. Nothing touches the network until [`run`].
    ///
    /// [`run`]: SessionController::run
    pub fn with_overlay(
        config: SessionConfig,
        overlay: &OverlayFileSystem,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        config.endpoint.url()?;
        let options = HandshakeOptions::from_config(&config)?;
        let document = DocumentBridge::initialize(
            &config.document_uri(),
            config.initial_content.as_deref(),
            &config.language_id,
            overlay,
        )?;

        log::info!("Mounted session {} for {}", config.id, config.document_uri());
        Ok(Self {
            connection: ConnectionManager::new(options, events),
            document,
            commands: CommandRegistry::new(),
            on_change: None,
            config,
        })
    }

    /// Sets the callback invoked after each accepted edit.
    pub fn on_change(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Runs the session until the host unmounts it or drops its sender.
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<HostRequest>) {
        self.load_contributions();
        self.register_builtin_commands();

        let mut connect = self.start_connect();
        let mut reader: Option<TransportReader> = None;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(HostRequest::Unmount) | None => break,
                    Some(request) => self.handle_request(request).await,
                },
                joined = wait_connect(&mut connect) => {
                    connect = None;
                    reader = self.on_connected(joined).await;
                }
                message = read_next(&mut reader) => {
                    match message {
                        Ok(value) => self.handle_message(value).await,
                        Err(TransportError::Closed) => self.connection.on_transport_closed(),
                        Err(e) => self.connection.on_transport_error(&e),
                    }
                    if self.connection.state() == ConnectionState::Closed {
                        reader = None;
                    }
                }
            }
        }

        if let Some(task) = connect {
            task.abort();
        }
        self.document.close(&mut self.connection).await;
        self.connection.shutdown().await;
        log::info!("Session {} unmounted", self.config.id);
    }

    fn load_contributions(&self) {
        let bundle = &self.config.contributions;
        log::debug!(
            "Loading contributions {}.{} {}",
            bundle.publisher,
            bundle.name,
            bundle.version
        );
        for language in &bundle.languages {
            log::debug!("Language {} claims {}", language.id, language.extensions.join(", "));
        }
        for binding in &bundle.keybindings {
            if bundle.command(&binding.command).is_none() {
                log::warn!("Keybinding {} refers to undeclared command {}", binding.key, binding.command);
            }
        }
    }

    fn register_builtin_commands(&mut self) {
        let builtins = BuiltinCommand::ALL
            .into_iter()
            .map(|builtin| builtin.command_id(&self.config.commands).to_string());
        let contributed = self
            .config
            .contributions
            .commands
            .iter()
            .map(|command| command.command.clone());

        let ids: Vec<String> = builtins.chain(contributed).collect();
        for id in ids {
            let handler = forward_to_service(id.clone());
            self.commands.register_if_absent(&id, handler, &self.connection);
        }
    }

    fn start_connect(&mut self) -> Option<ConnectTask> {
        let url = match self.config.endpoint.url() {
            Ok(url) => url.to_string(),
            Err(e) => {
                self.connection.connect_failed(&e.into());
                return None;
            }
        };
        if let Err(e) = self.connection.begin_connect() {
            log::error!("Cannot start connecting: {}", e);
            return None;
        }

        log::info!("Connecting to {}", self.config.endpoint.display_address());
        Some(tokio::spawn(async move { TransportSocket::connect(&url).await }))
    }

    async fn on_connected(
        &mut self,
        joined: std::result::Result<std::result::Result<TransportSocket, TransportError>, JoinError>,
    ) -> Option<TransportReader> {
        let socket = match joined {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                self.connection.connect_failed(&e.into());
                return None;
            }
            Err(e) => {
                let err = TransportError::Io(std::io::Error::other(e.to_string()));
                self.connection.connect_failed(&err.into());
                return None;
            }
        };

        match self.connection.attach(socket).await {
            Ok(reader) => Some(reader),
            Err(e) => {
                log::debug!("Socket not attached: {}", e);
                self.connection.connect_failed(&e);
                None
            }
        }
    }

    async fn handle_message(&mut self, value: Value) {
        match self.connection.handle_message(value).await {
            Ok(Some(ConnectionState::Ready)) => self.on_ready().await,
            Ok(_) => {}
            Err(e) => log::warn!("Failed to handle service message: {}", e),
        }
    }

    async fn on_ready(&mut self) {
        let adopted = self.commands.adopt_server_commands(&self.connection);
        log::debug!("Adopted {} service commands", adopted);

        if let Err(e) = self.document.on_ready(&mut self.connection).await {
            log::warn!("Failed to open document: {}", e);
        }
    }

    async fn handle_request(&mut self, request: HostRequest) {
        match request {
            HostRequest::BufferChanged { text } => self.buffer_changed(text).await,
            HostRequest::ExecuteCommand {
                name,
                arguments,
                reply,
            } => self.execute_command(name, arguments, reply).await,
            HostRequest::FileChanged { uri, change } => self.file_changed(&uri, change).await,
            HostRequest::Unmount => {}
        }
    }

    async fn buffer_changed(&mut self, text: String) {
        if self.config.read_only {
            log::warn!("Rejecting edit: {}", BridgeError::ReadOnly);
            return;
        }

        match self
            .document
            .on_buffer_changed(text, &mut self.connection)
            .await
        {
            Ok(Some(version)) => log::trace!("Sent version {}", version),
            Ok(None) => {}
            Err(e) => log::debug!("Change not sent: {}", e),
        }

        if let Some(callback) = self.on_change.as_mut() {
            callback(self.document.document().content());
        }
    }

    async fn execute_command(
        &mut self,
        name: String,
        arguments: Vec<Value>,
        reply: oneshot::Sender<RemoteResult>,
    ) {
        let command_id = match BuiltinCommand::from_host_name(&name) {
            Some(builtin) => builtin.command_id(&self.config.commands).to_string(),
            None => name,
        };

        match self
            .commands
            .invoke(&command_id, arguments, &mut self.connection)
            .await
        {
            Ok(pending) => {
                tokio::spawn(async move {
                    let result = pending.await.unwrap_or(Err(BridgeError::SessionEnded));
                    let _ = reply.send(result);
                });
            }
            Err(e) => {
                log::debug!("Command {} failed: {}", command_id, e);
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn file_changed(&mut self, uri: &str, change: FileChangeType) {
        let event = match parse_uri(uri) {
            Ok(uri) => FileEvent::new(uri, change),
            Err(e) => {
                log::debug!("Ignoring file change: {}", e);
                return;
            }
        };
        match self.connection.notify_file_events(vec![event]).await {
            Ok(sent) => log::trace!("Forwarded {} file changes", sent),
            Err(e) => log::debug!("File change not forwarded: {}", e),
        }
    }
}

async fn wait_connect(
    task: &mut Option<ConnectTask>,
) -> std::result::Result<std::result::Result<TransportSocket, TransportError>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn read_next(
    reader: &mut Option<TransportReader>,
) -> std::result::Result<Value, TransportError> {
    match reader {
        Some(reader) => reader.read_message().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    struct Service {
        socket: WebSocketStream<TcpStream>,
    }

    impl Service {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            Self { socket }
        }

        async fn recv(&mut self) -> Value {
            loop {
                match self.socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return serde_json::from_str(text.as_str()).unwrap()
                    }
                    Some(Ok(Message::Close(_))) | None => panic!("client closed the socket"),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => panic!("socket error: {}", e),
                }
            }
        }

        async fn send(&mut self, message: Value) {
            self.socket
                .send(Message::text(message.to_string()))
                .await
                .unwrap();
        }

        /// Answers `initialize` and consumes `initialized`.
        async fn handshake(&mut self) {
            let init = self.recv().await;
            assert_eq!(init["method"], "initialize");
            self.send(json!({"jsonrpc": "2.0", "id": init["id"], "result": {"capabilities": {}}}))
                .await;
            assert_eq!(self.recv().await["method"], "initialized");
        }
    }

    struct Harness {
        requests: mpsc::UnboundedSender<HostRequest>,
        events: Receiver<SessionEvent>,
        changes: mpsc::UnboundedReceiver<String>,
        overlay: OverlayFileSystem,
        run: JoinHandle<()>,
    }

    impl Harness {
        fn start(config: SessionConfig) -> Self {
            let (events_tx, events) = crossbeam_channel::unbounded();
            let (changes_tx, changes) = mpsc::unbounded_channel();
            let overlay = OverlayFileSystem::new();
            let controller = SessionController::with_overlay(config, &overlay, events_tx)
                .unwrap()
                .on_change(move |text| {
                    let _ = changes_tx.send(text.to_string());
                });
            let (requests, requests_rx) = mpsc::unbounded_channel();
            let run = tokio::spawn(controller.run(requests_rx));
            Self {
                requests,
                events,
                changes,
                overlay,
                run,
            }
        }

        fn edit(&self, text: &str) {
            self.requests
                .send(HostRequest::BufferChanged {
                    text: text.to_string(),
                })
                .unwrap();
        }

        fn command(&self, name: &str, arguments: Vec<Value>) -> oneshot::Receiver<RemoteResult> {
            let (reply, receiver) = oneshot::channel();
            self.requests
                .send(HostRequest::ExecuteCommand {
                    name: name.to_string(),
                    arguments,
                    reply,
                })
                .unwrap();
            receiver
        }

        async fn wait_for_state(&self, wanted: ConnectionState) -> Vec<SessionEvent> {
            let mut seen = Vec::new();
            for _ in 0..500 {
                while let Ok(event) = self.events.try_recv() {
                    let reached =
                        matches!(event, SessionEvent::StateChanged { state } if state == wanted);
                    seen.push(event);
                    if reached {
                        return seen;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("connection never became {}", wanted);
        }

        async fn unmount(self) {
            self.requests.send(HostRequest::Unmount).unwrap();
            self.run.await.unwrap();
        }
    }

    fn config_for(listener: &TcpListener) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.endpoint.host = "127.0.0.1".to_string();
        config.endpoint.port = listener.local_addr().unwrap().port();
        config
    }

    async fn refused_config() -> SessionConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&listener);
        drop(listener);
        config
    }

    #[tokio::test]
    async fn test_mount_registers_overlay() {
        let overlay = OverlayFileSystem::new();
        let (events, _rx) = crossbeam_channel::unbounded();
        let config = SessionConfig::default().with_initial_content("x = 1");
        let uri = config.document_uri();

        let controller = SessionController::with_overlay(config, &overlay, events).unwrap();
        assert_eq!(controller.state(), ConnectionState::Idle);
        assert_eq!(overlay.read_file(&uri), Some("x = 1".to_string()));
    }

    #[tokio::test]
    async fn test_mount_rejects_document_in_use() {
        let overlay = OverlayFileSystem::new();
        let (events, _rx) = crossbeam_channel::unbounded();
        let first = SessionConfig::default().with_initial_content("first");
        let uri = first.document_uri();
        let _mounted = SessionController::with_overlay(first, &overlay, events.clone()).unwrap();

        let second = SessionConfig::default().with_initial_content("second");
        let result = SessionController::with_overlay(second, &overlay, events);
        assert!(matches!(result, Err(BridgeError::DocumentInUse(_))));
        assert_eq!(overlay.read_file(&uri), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_mount_rejects_invalid_glob() {
        let overlay = OverlayFileSystem::new();
        let (events, _rx) = crossbeam_channel::unbounded();
        let mut config = SessionConfig::default();
        config.file_watch_glob = "{".to_string();

        let result = SessionController::with_overlay(config, &overlay, events);
        assert!(matches!(result, Err(BridgeError::InvalidGlob(_))));
    }

    #[tokio::test]
    async fn test_edit_before_ready_is_sent_after_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut harness = Harness::start(config_for(&listener).with_initial_content("x = 1"));
        let mut service = Service::accept(&listener).await;

        let init = service.recv().await;
        assert_eq!(init["method"], "initialize");

        harness.edit("x = 2");
        assert_eq!(harness.changes.recv().await.unwrap(), "x = 2");

        service
            .send(json!({"jsonrpc": "2.0", "id": init["id"], "result": {"capabilities": {}}}))
            .await;
        assert_eq!(service.recv().await["method"], "initialized");

        let open = service.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["version"], 0);
        assert_eq!(open["params"]["textDocument"]["text"], "x = 1");

        let change = service.recv().await;
        assert_eq!(change["method"], "textDocument/didChange");
        assert_eq!(change["params"]["textDocument"]["version"], 1);
        assert_eq!(change["params"]["contentChanges"][0]["text"], "x = 2");

        harness.unmount().await;
        assert_eq!(service.recv().await["method"], "textDocument/didClose");
        assert_eq!(service.recv().await["method"], "shutdown");
        assert_eq!(service.recv().await["method"], "exit");
    }

    #[tokio::test]
    async fn test_edits_after_ready_increment_versions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut harness = Harness::start(config_for(&listener).with_initial_content("a"));
        let mut service = Service::accept(&listener).await;
        service.handshake().await;
        assert_eq!(service.recv().await["params"]["textDocument"]["text"], "a");

        harness.edit("ab");
        harness.edit("abc");

        for (text, version) in [("ab", 1), ("abc", 2)] {
            let change = service.recv().await;
            assert_eq!(change["params"]["textDocument"]["version"], version);
            assert_eq!(change["params"]["contentChanges"][0]["text"], text);
            assert_eq!(harness.changes.recv().await.unwrap(), text);
        }

        harness.unmount().await;
    }

    #[tokio::test]
    async fn test_restart_server_forwards_arguments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let harness = Harness::start(config_for(&listener));
        let mut service = Service::accept(&listener).await;
        service.handshake().await;
        service.recv().await; // didOpen

        let reply = harness.command("restartServer", vec![json!("file:///tmp/hello.py"), json!(1)]);

        let request = service.recv().await;
        assert_eq!(request["method"], "workspace/executeCommand");
        assert_eq!(request["params"]["command"], "pyright.restartserver");
        assert_eq!(request["params"]["arguments"], json!(["file:///tmp/hello.py", 1]));
        service
            .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": "restarted"}))
            .await;

        assert_eq!(reply.await.unwrap().unwrap(), json!("restarted"));
        harness.unmount().await;
    }

    #[tokio::test]
    async fn test_service_closes_before_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let harness = Harness::start(config_for(&listener));
        let mut service = Service::accept(&listener).await;
        assert_eq!(service.recv().await["method"], "initialize");
        service.socket.close(None).await.unwrap();

        let events = harness.wait_for_state(ConnectionState::Closed).await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged { state: ConnectionState::Ready })));

        let reply = harness.command("organizeImports", vec![]);
        let err = reply.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Precondition { state: ConnectionState::Closed, .. }
        ));

        harness.unmount().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        let harness = Harness::start(refused_config().await);

        let events = harness.wait_for_state(ConnectionState::Closed).await;
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Failure(_))));

        harness.unmount().await;
    }

    #[tokio::test]
    async fn test_read_only_rejects_edits() {
        let harness = Harness::start(refused_config().await.with_read_only(true));
        harness.edit("x = 3");
        let overlay = harness.overlay.clone();
        let uri = SessionConfig::default().document_uri();
        harness.wait_for_state(ConnectionState::Closed).await;

        let Harness { requests, mut changes, run, .. } = harness;
        requests.send(HostRequest::Unmount).unwrap();
        run.await.unwrap();

        assert!(changes.try_recv().is_err());
        assert!(!overlay.contains(&uri));
    }
}
