//! Server side of the long-poll socket transport.
//!
//! [`SocketServer`] owns the session registry and configuration;
//! [`SocketService`] is the actix-web glue that turns HEAD/PATCH/DELETE
//! requests on the configured path into calls against it. Application code
//! that wants to talk to a specific client holds an `Arc<ServerSocket>`
//! (handed out via [`ServerEvent::Connection`]) and calls
//! [`ServerSocket::send`]/[`ServerSocket::close`] on it.

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use config::{ListenerSource, ServerConfig};
pub use error::ServerError;
pub use registry::SessionRegistry;
pub use server::{ServerEvent, SocketServer};
pub use service::SocketService;
pub use session::{ParkedOutcome, ServerSocket, SessionEvent, SessionState};
