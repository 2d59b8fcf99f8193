use std::{collections::HashMap, sync::Arc};

use polling_socket_core::SessionId;
use tokio::sync::RwLock;

use crate::session::ServerSocket;

/// Process-wide map from session id to session.
///
/// A session exists in the registry iff its state is OPEN or CLOSING
/// (invariant 1 of the spec); it is removed by
/// [`ServerSocket::terminate`](crate::session::ServerSocket::terminate),
/// the only path off the registry.
///
/// Guarded by an `RwLock` because, unlike the cooperative single-threaded
/// model the source protocol assumes, tokio's default runtime is
/// preemptive: lookups (reads) vastly outnumber inserts/removes (writes),
/// so a reader/writer lock fits the access pattern the dispatcher produces.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<ServerSocket>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, id: SessionId, session: Arc<ServerSocket>) {
        self.sessions.write().await.insert(id, session);
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<ServerSocket>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn delete(&self, id: &SessionId) -> Option<Arc<ServerSocket>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot-then-visit every live session. Takes a read lock for the
    /// duration of the snapshot only, so the callback may itself call back
    /// into the registry (e.g. to delete a session) without deadlocking.
    pub async fn for_each(&self, mut f: impl FnMut(&SessionId, &Arc<ServerSocket>)) {
        let sessions = self.sessions.read().await;
        for (id, session) in sessions.iter() {
            f(id, session);
        }
    }

    /// Snapshot every live session and terminate each one. Used on server
    /// shutdown.
    pub async fn terminate_all(&self) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.terminate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn session(id: SessionId) -> Arc<ServerSocket> {
        ServerSocket::new(id, &ServerConfig::default(), SessionRegistry::new())
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("abc");
        registry.set(id.clone(), session(id.clone())).await;
        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.len().await, 1);

        let removed = registry.delete(&id).await;
        assert!(removed.is_some());
        assert!(registry.get(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&SessionId::from("missing")).await.is_none());
    }
}
