//! Binary Source-engine RCON client.
//!
//! Owns one TCP connection and a growing receive buffer, draining complete
//! frames in arrival order. Grounded on the teacher's `rcon::RconClient`
//! (`Arc<Mutex<Inner>>` + a spawned reader task dispatching by id) for the
//! general shape, and on the `sourcon` crate's auth/sentinel dance
//! (other_examples) for the Source-RCON wire protocol itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;

use crate::codec::{self, FrameReader, AUTH, AUTH_RESPONSE, EXEC_COMMAND, RESPONSE_VALUE, SENTINEL_ID};
use crate::error::RconError;
use crate::rcon::{RconClient, RconEvent};

/// Id cycle per spec: distinct ids in `1..9000` for concurrently-pending
/// commands; `9999` is the sentinel, `<= 0` is reserved for auth frames.
const ID_CYCLE_MAX: i32 = 9000;

/// Bound on the receive buffer, to resist a malformed or hostile server
/// that never terminates a frame.
const MAX_RECV_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    New,
    Connecting,
    Authenticated,
    Closed,
}

struct PendingEntry {
    body: String,
    resolver: oneshot::Sender<String>,
}

struct Inner {
    state: ConnState,
    write_half: Option<OwnedWriteHalf>,
    pending: HashMap<i32, PendingEntry>,
    /// Insertion order of still-pending ids, oldest first. The sentinel
    /// trick resolves whichever entry is oldest, per spec.md's documented
    /// (and only safe-when-serialized) behavior.
    order: VecDeque<i32>,
}

pub struct BinaryRconClient {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
    next_id: AtomicI32,
    /// Concurrent `exec` calls are not safe with oldest-pending sentinel
    /// resolution (see spec.md §4.2, §9's Open Question); this client
    /// enforces the recommended serialization itself.
    exec_lock: Mutex<()>,
    events: broadcast::Sender<RconEvent>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BinaryRconClient {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            host: host.into(),
            port,
            password: password.into(),
            timeout,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnState::New,
                write_half: None,
                pending: HashMap::new(),
                order: VecDeque::new(),
            })),
            next_id: AtomicI32::new(1),
            exec_lock: Mutex::new(()),
            events,
            reader_handle: Mutex::new(None),
        }
    }

    fn allocate_id(&self) -> i32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            if id >= ID_CYCLE_MAX {
                self.next_id.store(1, Ordering::SeqCst);
                continue;
            }
            return id;
        }
    }

    async fn write_frame(write_half: &mut OwnedWriteHalf, id: i32, kind: i32, body: &str) -> Result<(), RconError> {
        let frame = codec::encode(id, kind, body);
        write_half
            .write_all(&frame)
            .await
            .map_err(|e| RconError::Transport(e.to_string()))
    }

    /// Authentication handshake, performed before the persistent reader task
    /// is spawned. Reads directly off `read_half` so pre-auth garbage
    /// filtering (RESPONSE_VALUE with id -1 or 0, ignored) is trivially
    /// local to this function.
    async fn authenticate(
        read_half: &mut OwnedReadHalf,
        write_half: &mut OwnedWriteHalf,
        auth_id: i32,
        password: &str,
    ) -> Result<(), RconError> {
        Self::write_frame(write_half, auth_id, AUTH, password).await?;

        let mut reader = FrameReader::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = read_half
                .read(&mut buf)
                .await
                .map_err(|e| RconError::Transport(e.to_string()))?;
            if n == 0 {
                return Err(RconError::Transport("connection closed during auth".into()));
            }
            reader.push(&buf[..n]);

            while let Some(packet) = reader.next_frame()? {
                if packet.kind == AUTH_RESPONSE {
                    if packet.id == -1 {
                        return Err(RconError::AuthRejected);
                    }
                    if packet.id == auth_id {
                        return Ok(());
                    }
                }
                // RESPONSE_VALUE frames with id -1 or 0 are pre-auth
                // garbage and are silently ignored, per spec.
            }
        }
    }

    async fn reader_loop(
        mut read_half: OwnedReadHalf,
        inner: Arc<Mutex<Inner>>,
        events: broadcast::Sender<RconEvent>,
    ) {
        let mut reader = FrameReader::new();
        let mut buf = [0u8; 4096];

        'outer: loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = events.send(RconEvent::Error(e.to_string()));
                    break;
                }
            };

            if reader.len() + n > MAX_RECV_BUFFER {
                let _ = events.send(RconEvent::Error("receive buffer exceeded cap".into()));
                break;
            }
            reader.push(&buf[..n]);

            loop {
                match reader.next_frame() {
                    Ok(Some(packet)) => Self::dispatch(packet, &inner).await,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = events.send(RconEvent::Error(e.to_string()));
                        // Can't resynchronize a corrupt length-prefixed
                        // stream; drop everything buffered and keep reading
                        // in case the next bytes happen to realign.
                        continue 'outer;
                    }
                }
            }
        }

        let mut guard = inner.lock().await;
        guard.state = ConnState::Closed;
        guard.write_half = None;
        for (_, entry) in guard.pending.drain() {
            drop(entry.resolver); // pending execs observe a closed channel
        }
        guard.order.clear();
        drop(guard);
        let _ = events.send(RconEvent::Closed);
    }

    async fn dispatch(packet: codec::Packet, inner: &Arc<Mutex<Inner>>) {
        if packet.kind != RESPONSE_VALUE {
            return; // stray AUTH/AUTH_RESPONSE frames after auth: ignore
        }

        if packet.id == SENTINEL_ID {
            let mut guard = inner.lock().await;
            if let Some(oldest) = guard.order.pop_front() {
                if let Some(entry) = guard.pending.remove(&oldest) {
                    let _ = entry.resolver.send(entry.body);
                }
            }
            return;
        }

        if packet.id <= 0 {
            return; // stray pre-auth-style garbage arriving post-auth
        }

        let mut guard = inner.lock().await;
        if let Some(entry) = guard.pending.get_mut(&packet.id) {
            entry.body.push_str(&packet.body);
        }
    }
}

#[async_trait]
impl RconClient for BinaryRconClient {
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
            guard.write_half = None;
            guard.pending.clear();
            guard.order.clear();
        }

        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!(host = %self.host, port = self.port, "connecting to binary RCON");

        let connect_fut = async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| RconError::Transport(e.to_string()))?;
            let (mut read_half, mut write_half) = stream.into_split();
            let auth_id = self.allocate_id();
            Self::authenticate(&mut read_half, &mut write_half, auth_id, &self.password).await?;
            Ok::<_, RconError>((read_half, write_half))
        };

        let (read_half, write_half) = match timeout(self.timeout, connect_fut).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                let mut guard = self.inner.lock().await;
                guard.state = ConnState::New;
                return Err(e);
            }
            Err(_) => {
                let mut guard = self.inner.lock().await;
                guard.state = ConnState::New;
                return Err(RconError::Timeout);
            }
        };

        {
            let mut guard = self.inner.lock().await;
            guard.write_half = Some(write_half);
            guard.state = ConnState::Authenticated;
        }

        let inner = self.inner.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            BinaryRconClient::reader_loop(read_half, inner, events).await;
        });
        *self.reader_handle.lock().await = Some(handle);

        tracing::info!(host = %self.host, port = self.port, "binary RCON authenticated");
        Ok(())
    }

    async fn exec(&self, command: &str) -> Result<String, RconError> {
        let _serialize = self.exec_lock.lock().await;

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.inner.lock().await;
            if guard.state != ConnState::Authenticated {
                return Err(RconError::NotConnected);
            }
            let write_half = guard.write_half.as_mut().ok_or(RconError::NotConnected)?;
            Self::write_frame(write_half, id, EXEC_COMMAND, command).await?;
            Self::write_frame(write_half, SENTINEL_ID, RESPONSE_VALUE, "").await?;

            guard.pending.insert(id, PendingEntry { body: String::new(), resolver: tx });
            guard.order.push_back(id);
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(RconError::ConnectionClosed),
            Err(_) => {
                // Exec timeout resolves gracefully with whatever was
                // accumulated so far; it never errors.
                let mut guard = self.inner.lock().await;
                guard.order.retain(|pending_id| *pending_id != id);
                let body = guard.pending.remove(&id).map(|e| e.body).unwrap_or_default();
                Ok(body)
            }
        }
    }

    async fn destroy(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        let mut guard = self.inner.lock().await;
        guard.state = ConnState::Closed;
        guard.write_half = None;
        guard.pending.clear();
        guard.order.clear();
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
