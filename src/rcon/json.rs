//! JSON-over-WebSocket RCON client for Rust-engine game servers.
//!
//! Credentials are embedded in the URL path
//! (`ws://host:port/password`); authentication is implicit in the
//! WebSocket handshake succeeding. Grounded directly on the teacher's
//! `rcon::RconClient` (`src/rcon.rs`): the `RconInner { sink, pending }`
//! split-sink/reader-task shape, the `AtomicI32` id counter, and the
//! `reader_loop` dispatch-by-identifier logic are carried over and
//! generalized to also surface unsolicited pushes (the teacher's version
//! only ever resolves matching commands).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HOST;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::error::RconError;
use crate::rcon::{MessageType, RconClient, RconEvent};

const MAX_RECV_BUFFER: usize = 1024 * 1024;
/// Placeholder body for an exec that timed out; per spec this resolves,
/// it never rejects.
const TIMEOUT_PLACEHOLDER: &str = "(no response — timed out)";

#[derive(Debug, Serialize)]
struct Request {
    #[serde(rename = "Identifier")]
    identifier: i32,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "Identifier")]
    identifier: i32,
    #[serde(rename = "Message")]
    #[serde(default)]
    message: String,
    #[serde(rename = "Type")]
    #[serde(default)]
    msg_type: WireMessageType,
}

#[derive(Debug, Deserialize, Default)]
enum WireMessageType {
    #[default]
    #[serde(rename = "Generic")]
    Generic,
    #[serde(rename = "Warning")]
    Warning,
    #[serde(rename = "Error")]
    Error,
    #[serde(other)]
    Unknown,
}

impl From<WireMessageType> for MessageType {
    fn from(value: WireMessageType) -> Self {
        match value {
            WireMessageType::Generic | WireMessageType::Unknown => MessageType::Generic,
            WireMessageType::Warning => MessageType::Warning,
            WireMessageType::Error => MessageType::Error,
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

struct PendingRequest {
    resolver: oneshot::Sender<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    New,
    Connecting,
    Authenticated,
    Closed,
}

struct Inner {
    state: ConnState,
    sink: Option<WsSink>,
    pending: HashMap<i32, PendingRequest>,
}

pub struct JsonRconClient {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
    next_id: AtomicI32,
    events: broadcast::Sender<RconEvent>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JsonRconClient {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            host: host.into(),
            port,
            password: password.into(),
            timeout,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnState::New,
                sink: None,
                pending: HashMap::new(),
            })),
            next_id: AtomicI32::new(1),
            events,
            reader_handle: Mutex::new(None),
        }
    }

    async fn reader_loop(mut stream: futures_util::stream::SplitStream<WsStream>, inner: Arc<Mutex<Inner>>, events: broadcast::Sender<RconEvent>) {
        let mut buffered = 0usize;

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    buffered += text.len();
                    if buffered > MAX_RECV_BUFFER {
                        let _ = events.send(RconEvent::Error("receive buffer exceeded cap".into()));
                        break;
                    }

                    let Ok(wire) = serde_json::from_str::<WireMessage>(&text) else {
                        let _ = events.send(RconEvent::Error(format!("malformed JSON-RCON frame: {text}")));
                        continue;
                    };

                    if wire.identifier > 0 {
                        let mut guard = inner.lock().await;
                        if let Some(pending) = guard.pending.remove(&wire.identifier) {
                            let _ = pending.resolver.send(wire.message);
                            continue;
                        }
                        drop(guard);
                        // Not a known pending id: falls through to the
                        // unknown-id safety valve below, same as id <= 0.
                    }

                    let kind: MessageType = wire.msg_type.into();
                    let _ = events.send(RconEvent::ServerMessage { body: wire.message, kind });
                }
                Ok(Message::Close(_)) => {
                    tracing::warn!("JSON RCON WebSocket closed by server");
                    break;
                }
                Err(e) => {
                    tracing::error!("JSON RCON WebSocket error: {}", e);
                    let _ = events.send(RconEvent::Error(e.to_string()));
                    break;
                }
                _ => {}
            }
        }

        let mut guard = inner.lock().await;
        guard.state = ConnState::Closed;
        guard.sink = None;
        for (_, pending) in guard.pending.drain() {
            drop(pending.resolver); // pending execs observe a closed channel
        }
        drop(guard);
        let _ = events.send(RconEvent::Closed);
    }

    fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RconClient for JsonRconClient {
    async fn connect(&self) -> Result<(), RconError> {
        {
            let guard = self.inner.lock().await;
            if guard.state == ConnState::Authenticated {
                return Ok(());
            }
            if guard.state == ConnState::Closed {
                // Closed is terminal per spec.md §3 — no resurrection.
                return Err(RconError::NotConnected);
            }
        }

        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        {
            let mut guard = self.inner.lock().await;
            guard.state = ConnState::Connecting;
            guard.sink = None;
            guard.pending.clear();
        }

        let url = format!("ws://{}:{}/{}", self.host, self.port, self.password);
        tracing::info!(host = %self.host, port = self.port, "connecting to JSON RCON at ws://{}:{}/***", self.host, self.port);

        // Credentials are a protocol constraint, not a choice; the `Host`
        // header must still be set to `host:port` for upgrades behind an
        // outbound proxy, per spec.md §6.
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| RconError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            HOST,
            format!("{}:{}", self.host, self.port)
                .parse()
                .map_err(|_| RconError::Transport("invalid host header".into()))?,
        );

        let connect_fut = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) = match timeout(self.timeout, connect_fut).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let mut guard = self.inner.lock().await;
                guard.state = ConnState::New;
                return Err(match &e {
                    tokio_tungstenite::tungstenite::Error::Http(resp)
                        if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
                    {
                        RconError::AuthRejected
                    }
                    _ => RconError::Transport(e.to_string()),
                });
            }
            Err(_) => {
                let mut guard = self.inner.lock().await;
                guard.state = ConnState::New;
                return Err(RconError::Timeout);
            }
        };

        let (sink, stream) = ws_stream.split();
        {
            let mut guard = self.inner.lock().await;
            guard.sink = Some(sink);
            guard.state = ConnState::Authenticated;
        }

        let inner = self.inner.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            JsonRconClient::reader_loop(stream, inner, events).await;
        });
        *self.reader_handle.lock().await = Some(handle);

        tracing::info!(host = %self.host, port = self.port, "JSON RCON connected");
        Ok(())
    }

    async fn exec(&self, command: &str) -> Result<String, RconError> {
        let id = self.allocate_id();
        let request = Request {
            identifier: id,
            message: command.to_string(),
            name: "rcon-bridge".to_string(),
        };
        let json = serde_json::to_string(&request).expect("Request always serializes");
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.inner.lock().await;
            if guard.state != ConnState::Authenticated {
                return Err(RconError::NotConnected);
            }
            guard.pending.insert(id, PendingRequest { resolver: tx });
            let sink = guard.sink.as_mut().ok_or(RconError::NotConnected)?;
            sink.send(Message::Text(json))
                .await
                .map_err(|e| RconError::Transport(e.to_string()))?;
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(RconError::ConnectionClosed),
            Err(_) => {
                let mut guard = self.inner.lock().await;
                guard.pending.remove(&id);
                Ok(TIMEOUT_PLACEHOLDER.to_string())
            }
        }
    }

    async fn destroy(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        let mut guard = self.inner.lock().await;
        guard.state = ConnState::Closed;
        guard.sink = None;
        guard.pending.clear();
        drop(guard);
        let _ = self.events.send(RconEvent::Closed);
    }

    fn subscribe(&self) -> broadcast::Receiver<RconEvent> {
        self.events.subscribe()
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.state == ConnState::Authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt as _, StreamExt as _};
    use tokio::net::TcpListener;

    async fn fixture_accept(listener: TcpListener) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    #[tokio::test]
    async fn push_interleaved_with_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = fixture_accept(listener).await;
            // First inbound exec for id 1.
            let msg = ws.next().await.unwrap().unwrap();
            let req: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            let id = req["Identifier"].as_i64().unwrap() as i32;

            // Unsolicited push first, then the real response.
            let push = serde_json::json!({"Identifier": -1, "Message": "player joined", "Type": "Generic"});
            ws.send(Message::Text(push.to_string())).await.unwrap();

            let response = serde_json::json!({"Identifier": id, "Message": "ok", "Type": "Generic"});
            ws.send(Message::Text(response.to_string())).await.unwrap();

            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let client = JsonRconClient::new(addr.ip().to_string(), addr.port(), "pw", Duration::from_secs(2));
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        let exec_result = client.exec("status").await.unwrap();
        assert_eq!(exec_result, "ok");

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            RconEvent::ServerMessage { body, kind } => {
                assert_eq!(body, "player joined");
                assert_eq!(kind, MessageType::Generic);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn exec_timeout_resolves_with_placeholder() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ws = fixture_accept(listener).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let client = JsonRconClient::new(addr.ip().to_string(), addr.port(), "pw", Duration::from_millis(200));
        client.connect().await.unwrap();
        let response = client.exec("status").await.unwrap();
        assert_eq!(response, TIMEOUT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn connect_after_destroy_fails_without_resurrection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ws = fixture_accept(listener).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let client = JsonRconClient::new(addr.ip().to_string(), addr.port(), "pw", Duration::from_secs(2));
        client.connect().await.unwrap();
        client.destroy().await;

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, RconError::NotConnected));
    }
}
