//! RCON bridge: terminates browser-facing WebSocket/SSE connections and
//! speaks either the binary Source-engine RCON protocol or the JSON-over-
//! WebSocket Rust-engine protocol upstream, handing back pre-rendered
//! display fragments through an injected [`Formatter`](formatter::Formatter).
//!
//! Shipped both as a binary (see `main.rs`) and as a library so the
//! session state machine, codecs, and clients can be exercised directly in
//! tests without standing up an actix server.

pub mod codec;
pub mod config;
pub mod error;
pub mod formatter;
pub mod rcon;
pub mod server;
pub mod session;
pub mod sse;
