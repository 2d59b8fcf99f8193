use std::sync::Arc;

use polling_socket_core::SessionId;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    error::ServerError,
    registry::SessionRegistry,
    session::ServerSocket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Running,
    Closing,
    Closed,
}

/// Top-level event the server publishes to the application.
///
/// `Message`/`Close` events are per-session and are reached through
/// [`ServerSocket::subscribe`]; this channel only carries events that make
/// sense at server scope.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new session completed its handshake.
    Connection(Arc<ServerSocket>),
    /// The server finished shutting down. Fires exactly once, from
    /// [`SocketServer::close`].
    Close,
}

/// Process-wide registry of sessions plus the configuration shared by all
/// of them. This is the collaborator the HTTP glue (`SocketService`)
/// dispatches into; it owns no HTTP listener itself (listener lifecycle is
/// an external collaborator concern per the spec).
pub struct SocketServer {
    config: ServerConfig,
    registry: SessionRegistry,
    events: broadcast::Sender<ServerEvent>,
    state: Mutex<ServerState>,
    /// Cancelled exactly once, when the server finishes closing. Concurrent
    /// callers of [`SocketServer::close`] await this instead of racing the
    /// shutdown sequence themselves, the same coordination the teacher uses
    /// a `CancellationToken` for around its own service lifecycle.
    closed: CancellationToken,
}

impl SocketServer {
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
            events,
            state: Mutex::new(ServerState::Running),
            closed: CancellationToken::new(),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every live session, if `client_tracking` is enabled.
    /// Empty when tracking is disabled, even if sessions are live — the
    /// registry itself is always populated regardless of this flag; this
    /// is the opt-in convenience view the configuration knob controls.
    pub async fn clients(&self) -> Vec<Arc<ServerSocket>> {
        if !self.config.client_tracking {
            return Vec::new();
        }
        let mut sessions = Vec::new();
        self.registry.for_each(|_, session| sessions.push(session.clone())).await;
        sessions
    }

    async fn is_running(&self) -> bool {
        *self.state.lock().await == ServerState::Running
    }

    /// Generate a session id, create the session, insert it into the
    /// registry, and publish a [`ServerEvent::Connection`]. Used both for
    /// the normal HEAD handshake and for the `allow_client_ids` PATCH path.
    pub async fn create_session(&self, id: SessionId) -> Arc<ServerSocket> {
        let session = ServerSocket::new(id.clone(), &self.config, self.registry.clone());
        self.registry.set(id, session.clone()).await;
        let _ = self.events.send(ServerEvent::Connection(session.clone()));
        tracing::info!(session_id = %session.id(), "session opened");
        session
    }

    /// Whether this request should be dispatched at all: the server must
    /// be RUNNING and the configured path must match. The dispatcher is
    /// expected to check this before routing to handshake/poll/close.
    pub async fn accepts(&self, path: &str) -> bool {
        self.is_running().await && path == self.config.path
    }

    /// Graceful shutdown: stop accepting new sessions, terminate every
    /// live one, and notify anyone awaiting [`SocketServer::closed`].
    pub async fn close(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        match *state {
            ServerState::Closed => return Err(ServerError::NotRunning),
            ServerState::Closing => {
                drop(state);
                self.closed.cancelled().await;
                return Ok(());
            }
            ServerState::Running => {
                *state = ServerState::Closing;
            }
        }
        drop(state);

        self.registry.terminate_all().await;

        *self.state.lock().await = ServerState::Closed;
        let _ = self.events.send(ServerEvent::Close);
        self.closed.cancel();
        tracing::info!("server closed");
        Ok(())
    }

    /// Await an in-progress close initiated by another task.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
