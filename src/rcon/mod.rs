//! The unified RCON capability: a single contract both the binary
//! (Source-engine) and JSON (Rust-engine) clients implement, so the
//! session bridge stays protocol-agnostic except for push-event wiring.

pub mod binary;
pub mod json;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RconError;

pub use binary::BinaryRconClient;
pub use json::JsonRconClient;

/// Message severity as reported by the Rust-engine JSON protocol. Binary
/// clients never produce this — they never emit `RconEvent::ServerMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageType {
    Generic,
    Warning,
    Error,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Generic
    }
}

/// Events a client may push to subscribers outside of a direct `exec` call.
#[derive(Debug, Clone)]
pub enum RconEvent {
    /// Unsolicited server output. Only emitted by [`JsonRconClient`].
    ServerMessage { body: String, kind: MessageType },
    /// A transport or protocol error occurred; the connection may still be
    /// usable (e.g. a single malformed frame) or may be about to close.
    Error(String),
    /// The connection is gone for good.
    Closed,
}

/// Capability implemented by both RCON clients. This is the only surface
/// the session bridge consumes.
#[async_trait]
pub trait RconClient: Send + Sync {
    /// Open and authenticate. Idempotent when already connected.
    async fn connect(&self) -> Result<(), RconError>;

    /// Run one command to completion. At most one in-flight request per id;
    /// response ordering follows request issuance.
    async fn exec(&self, command: &str) -> Result<String, RconError>;

    /// Synchronous teardown. Subsequent operations fail with `NotConnected`.
    async fn destroy(&self);

    /// Subscribe to push events (server messages, errors, close). Callers
    /// typically hold one receiver for the lifetime of a session.
    fn subscribe(&self) -> broadcast::Receiver<RconEvent>;

    /// Whether the client currently believes it holds a live, authenticated
    /// connection.
    async fn is_connected(&self) -> bool;
}
