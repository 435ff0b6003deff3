//! Error taxonomy shared by both RCON clients and the session bridge.
//!
//! Transient, per-message errors never escape the session boundary (see
//! `session::Session`); these types exist so call sites can match on
//! semantics instead of string content.

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("operation timed out")]
    Timeout,
    #[error("authentication rejected by upstream")]
    AuthRejected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("client is not connected")]
    NotConnected,
    #[error("malformed frame from upstream: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("message was not valid JSON or did not match a known shape")]
    InvalidMessageFormat,
    #[error("command sent before authentication")]
    NotAuthenticated,
    #[error("command was empty")]
    EmptyCommand,
    #[error("command blocked by policy hook")]
    CommandBlocked,
    #[error(transparent)]
    Rcon(#[from] RconError),
}
