//! JSON-RPC transport over a WebSocket.
//!
//! Every text (or binary) frame carries exactly one JSON-RPC message, so
//! there is no `Content-Length` framing as with stdio servers.

use crate::error::TransportError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{self, Message};

/// JSON-RPC error code for methods the client does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful response. `null` results are sent explicitly.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (can be number or string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// Parses a JSON-RPC message to determine its type.
pub fn parse_message(value: &Value) -> Option<JsonRpcMessage> {
    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();

    let parsed = match (has_id, has_method) {
        (true, true) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Request),
        (true, false) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Response),
        (false, true) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Notification),
        (false, false) => return None,
    };
    parsed.ok()
}

/// Fires once when the underlying socket goes away.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    inner: Arc<CloseState>,
}

#[derive(Debug, Default)]
struct CloseState {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the transport closed. Returns true only for the first call.
    pub fn fire(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Waits until the transport is closed.
    pub async fn closed(&self) {
        let notified = self.inner.notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
type WsStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// One physical WebSocket connection to the language service.
pub struct TransportSocket {
    sink: WsSink,
    stream: WsStream,
    closed: CloseSignal,
}

impl TransportSocket {
    /// Opens a WebSocket to `url`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (socket, response) = tokio_tungstenite::connect_async(url).await?;
        log::debug!("WebSocket handshake completed with status {}", response.status());
        Ok(Self::new(socket))
    }

    /// Wraps an already established socket.
    pub fn new<S>(socket: S) -> Self
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
            closed: CloseSignal::new(),
        }
    }

    /// Returns the close signal shared by both halves.
    pub fn on_closed(&self) -> CloseSignal {
        self.closed.clone()
    }

    /// Splits the socket into separate read and write halves.
    pub fn split(self) -> (TransportReader, TransportWriter) {
        (
            TransportReader {
                stream: self.stream,
                closed: self.closed.clone(),
            },
            TransportWriter {
                sink: self.sink,
                closed: self.closed,
            },
        )
    }
}

/// Write half of the transport.
pub struct TransportWriter {
    sink: WsSink,
    closed: CloseSignal,
}

impl TransportWriter {
    /// Sends a JSON-RPC request.
    pub async fn send_request(
        &mut self,
        id: impl Into<RequestId>,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        };
        self.send_message(&serde_json::to_value(request)?).await
    }

    /// Sends a JSON-RPC notification.
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.send_message(&serde_json::to_value(notification)?).await
    }

    /// Sends a response to a server-initiated request.
    pub async fn send_response(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        self.send_message(&serde_json::to_value(response)?).await
    }

    /// Sends a raw JSON-RPC message as one text frame.
    async fn send_message(&mut self, message: &Value) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }

        let content = serde_json::to_string(message)?;
        log::trace!("Sent: {}", content);

        match self.sink.send(Message::text(content)).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.closed.fire();
                Err(TransportError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts the closing handshake and fires the close signal.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Ok(());
        }
        let result = self.sink.close().await;
        self.closed.fire();
        match result {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read half of the transport.
pub struct TransportReader {
    stream: WsStream,
    closed: CloseSignal,
}

impl TransportReader {
    /// Reads the next JSON-RPC message, skipping control frames.
    ///
    /// Returns [`TransportError::Closed`] once the peer has gone away. A
    /// socket error is returned as is; the following read reports the close.
    pub async fn read_message(&mut self) -> Result<Value, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.closed.fire();
                    return Err(TransportError::Closed);
                }
            };

            let value: Value = match frame {
                Message::Text(text) => serde_json::from_str(text.as_str())?,
                Message::Binary(bytes) => serde_json::from_slice(&bytes)?,
                Message::Close(frame) => {
                    log::debug!("Received close frame: {:?}", frame);
                    self.closed.fire();
                    return Err(TransportError::Closed);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            log::trace!("Received: {}", value);
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::socket_pair;
    use serde_json::json;

    #[test]
    fn test_parse_message_kinds() {
        let request = json!({"jsonrpc": "2.0", "id": 3, "method": "workspace/configuration", "params": {}});
        assert!(matches!(parse_message(&request), Some(JsonRpcMessage::Request(_))));

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert!(matches!(parse_message(&response), Some(JsonRpcMessage::Response(_))));

        let notification = json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {}});
        assert!(matches!(
            parse_message(&notification),
            Some(JsonRpcMessage::Notification(_))
        ));

        assert!(parse_message(&json!({"jsonrpc": "2.0"})).is_none());
    }

    #[test]
    fn test_response_serialization() {
        let ok = serde_json::to_value(JsonRpcResponse::success(RequestId::Number(7), Value::Null)).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 7, "result": null}));

        let err = JsonRpcResponse::failure(
            RequestId::String("a".to_string()),
            JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: "nope".to_string(),
                data: None,
            },
        );
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["error"]["code"], METHOD_NOT_FOUND);
        assert!(err.get("result").is_none());
    }

    #[tokio::test]
    async fn test_close_signal_fires_once() {
        let signal = CloseSignal::new();
        let waiter = signal.clone();
        let wait = tokio::spawn(async move { waiter.closed().await });

        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_closed());
        wait.await.unwrap();
        // Already closed: returns immediately.
        signal.closed().await;
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (socket, mut service) = socket_pair().await;
        let (_reader, mut writer) = socket.split();

        writer.send_request(1, "initialize", Some(json!({}))).await.unwrap();
        writer.send_notification("initialized", Some(json!({}))).await.unwrap();
        writer.send_notification("textDocument/didOpen", None).await.unwrap();

        assert_eq!(service.recv().await["method"], "initialize");
        assert_eq!(service.recv().await["method"], "initialized");
        let open = service.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert!(open.get("params").is_none());
    }

    #[tokio::test]
    async fn test_reader_keeps_order() {
        let (socket, mut service) = socket_pair().await;
        let (mut reader, _writer) = socket.split();

        for n in 0..3 {
            service
                .send(json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"n": n}}))
                .await;
        }

        for n in 0..3 {
            let message = reader.read_message().await.unwrap();
            assert_eq!(message["params"]["n"], n);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (socket, mut service) = socket_pair().await;
        let closed = socket.on_closed();
        let (mut reader, mut writer) = socket.split();

        service.close().await;
        assert!(matches!(reader.read_message().await, Err(TransportError::Closed)));
        assert!(closed.is_closed());

        let result = writer.send_notification("textDocument/didChange", None).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported() {
        let (socket, mut service) = socket_pair().await;
        let (mut reader, _writer) = socket.split();

        service.send_raw("not json").await;
        service
            .send(json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {}}))
            .await;

        assert!(matches!(reader.read_message().await, Err(TransportError::Malformed(_))));
        assert_eq!(reader.read_message().await.unwrap()["method"], "window/logMessage");
    }
}
