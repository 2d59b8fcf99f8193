use std::time::Duration;

use crate::error::ServerError;

/// Where the server gets its listening socket from. External collaborator
/// concern (listener setup) — this enum only records the caller's choice so
/// [`ServerConfig::validate`] can enforce "exactly one of the three".
#[derive(Debug, Default, Clone)]
pub enum ListenerSource {
    /// Bind a fresh listener on this port.
    Port(u16),
    /// The server does not own a listener; requests are dispatched to it by
    /// an externally owned HTTP server (e.g. mounted as an actix-web
    /// service).
    NoServer,
    #[default]
    /// Not yet decided; [`ServerConfig::validate`] rejects this.
    Unset,
}

/// Configuration for [`SocketServer`](crate::server::SocketServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listener: ListenerSource,
    pub host: String,
    /// Request path under which the socket protocol is served.
    pub path: String,
    /// Advertised to clients in the handshake; also the parked-response
    /// pool's capacity.
    pub max_connection_pool_size: usize,
    /// Coalescing window: how long to wait after the first `send()` before
    /// flushing the outbound buffer.
    pub buffer_time: Duration,
    /// If true, a PATCH bearing an unknown `socket-id` header creates a new
    /// session under that id instead of returning 404.
    pub allow_client_ids: bool,
    /// If true, the server keeps a set of live sessions reachable via
    /// [`SocketServer::clients`](crate::server::SocketServer::clients).
    pub client_tracking: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener: ListenerSource::Unset,
            host: "127.0.0.1".to_owned(),
            path: "/".to_owned(),
            max_connection_pool_size: 2,
            buffer_time: Duration::ZERO,
            allow_client_ids: false,
            client_tracking: true,
        }
    }
}

impl ServerConfig {
    /// Enforce "exactly one of `port`/`listener`/`no_server`" from the wire
    /// spec. Called once at server construction; a configuration conflict
    /// is a usage error, not a protocol error, so it is returned
    /// synchronously rather than surfaced as an event.
    pub fn validate(&self) -> Result<(), ServerError> {
        match self.listener {
            ListenerSource::Unset => Err(ServerError::ConflictingListenerConfig),
            _ => Ok(()),
        }
    }
}
