//! Client side of the long-poll socket transport.
//!
//! [`ClientSocket`] drives the HEAD/PATCH/DELETE exchange against a
//! [`SocketHttpClient`] implementation; [`ReqwestSocketClient`] is the
//! default reqwest-backed one.

pub mod config;
pub mod driver;
pub mod error;
pub mod http;

pub use config::ClientConfig;
pub use driver::{ClientEvent, ClientSocket, ClientState};
pub use error::ClientSocketError;
pub use http::{HandshakeResponse, PollResponse, ReqwestSocketClient, SocketHttpClient};
