//! In-memory WebSocket pairs and a scripted language service for tests.

use crate::client::ConnectionManager;
use crate::handshake::HandshakeOptions;
use crate::messages::SessionEvent;
use crate::transport::{TransportReader, TransportSocket};
use crossbeam_channel::Receiver;
use futures::{SinkExt, StreamExt};
use ls_bridge_core::SessionConfig;
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Service side of an in-memory socket.
pub struct FakeService {
    socket: WebSocketStream<DuplexStream>,
}

impl FakeService {
    /// Next JSON message sent by the client.
    pub async fn recv(&mut self) -> Value {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) | None => panic!("client closed the socket"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("socket error: {}", e),
            }
        }
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.socket.send(Message::text(text.to_string())).await.unwrap();
    }

    pub async fn close(&mut self) {
        self.socket.close(None).await.unwrap();
    }
}

/// A connected client socket and the service end.
pub async fn socket_pair() -> (TransportSocket, FakeService) {
    let (client_io, service_io) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let service = WebSocketStream::from_raw_socket(service_io, Role::Server, None).await;
    (TransportSocket::new(client), FakeService { socket: service })
}

/// An idle connection with default options.
pub fn connection() -> (ConnectionManager, Receiver<SessionEvent>) {
    connection_for(&SessionConfig::default())
}

pub fn connection_for(config: &SessionConfig) -> (ConnectionManager, Receiver<SessionEvent>) {
    let options = HandshakeOptions::from_config(config).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    (ConnectionManager::new(options, tx), rx)
}

/// A connection that has sent `initialize` and waits for the answer.
pub async fn attached_connection() -> (
    ConnectionManager,
    Receiver<SessionEvent>,
    FakeService,
    TransportReader,
) {
    attached_connection_for(&SessionConfig::default()).await
}

pub async fn attached_connection_for(
    config: &SessionConfig,
) -> (
    ConnectionManager,
    Receiver<SessionEvent>,
    FakeService,
    TransportReader,
) {
    let (mut conn, events) = connection_for(config);
    let (socket, service) = socket_pair().await;
    conn.begin_connect().unwrap();
    let reader = conn.attach(socket).await.unwrap();
    (conn, events, service, reader)
}

/// A connection past the handshake. The service advertises
/// `pyright.organizeimports`.
pub async fn ready_connection() -> (
    ConnectionManager,
    Receiver<SessionEvent>,
    FakeService,
    TransportReader,
) {
    ready_connection_for(&SessionConfig::default()).await
}

pub async fn ready_connection_for(
    config: &SessionConfig,
) -> (
    ConnectionManager,
    Receiver<SessionEvent>,
    FakeService,
    TransportReader,
) {
    let (mut conn, events, mut service, reader) = attached_connection_for(config).await;

    let init = service.recv().await;
    conn.handle_message(json!({
        "jsonrpc": "2.0",
        "id": init["id"],
        "result": {
            "capabilities": {
                "textDocumentSync": 1,
                "executeCommandProvider": {"commands": ["pyright.organizeimports"]}
            }
        }
    }))
    .await
    .unwrap();
    assert_eq!(service.recv().await["method"], "initialized");
    assert!(conn.is_ready());

    (conn, events, service, reader)
}
