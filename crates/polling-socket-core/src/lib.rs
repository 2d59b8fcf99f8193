//! Shared types for the long-poll socket transport.
//!
//! This crate has no opinion about which side of the connection you are on;
//! [`polling-socket-server`](https://docs.rs/polling-socket-server) and
//! [`polling-socket-client`](https://docs.rs/polling-socket-client) both
//! build on top of it. It exists so the wire-level vocabulary — session
//! ids, close codes, header names, and the message envelope — is defined
//! exactly once.

pub mod close;
pub mod http_header;
pub mod session_id;

pub use close::CloseCode;
pub use session_id::SessionId;

/// A single opaque, JSON-serializable application message.
///
/// The transport never looks inside a message; it only ever moves arrays
/// of these in and out of HTTP bodies.
pub type Message = serde_json::Value;
