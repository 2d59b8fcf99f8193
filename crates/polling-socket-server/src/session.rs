//! Per-session state machine: the outbound buffer, the parked-response
//! queue, the flush timer, and the OPEN/CLOSING/CLOSED lifecycle.

use std::{
    collections::VecDeque,
    sync::{Arc, Weak, atomic::{AtomicBool, Ordering}},
    time::Duration,
};

use polling_socket_core::{
    Message, SessionId,
    close::{self, CloseCode},
};
use tokio::sync::{Mutex, broadcast, oneshot};

use crate::{config::ServerConfig, registry::SessionRegistry};

/// The subset of [`ServerConfig`] a session needs, carried independently so
/// a session does not have to reach back into server-level fields like
/// `path` or `host`.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub max_connection_pool_size: usize,
    pub buffer_time: Duration,
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_connection_pool_size: config.max_connection_pool_size,
            buffer_time: config.buffer_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Events a session publishes to local listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(Message),
    Close { code: CloseCode, reason: Option<String> },
}

/// Outcome delivered to a parked response once it has something to say.
#[derive(Debug, Clone)]
pub enum ParkedOutcome {
    /// 200, body = JSON array of `messages`.
    Flush(Vec<Message>),
    /// 410, `Close-Code`/`Close-Reason` headers, body = JSON array of
    /// `messages`.
    Close {
        code: CloseCode,
        reason: Option<String>,
        messages: Vec<Message>,
    },
    /// 200, body `"[]"` — this response was bumped out of the pool to make
    /// room for a newer one.
    Evicted,
    /// The transport is being torn down unconditionally; write nothing and
    /// close the connection.
    Aborted,
}

/// Result of [`ServerSocket::poll`]: either an answer is ready immediately,
/// or the response must be parked and completed later.
pub enum PollOutcome {
    Immediate(ImmediateOutcome),
    Parked(oneshot::Receiver<ParkedOutcome>),
}

#[derive(Debug, Clone)]
pub enum ImmediateOutcome {
    /// 200, body = JSON array of `messages`.
    Flush(Vec<Message>),
    /// 410, final flush before the session terminates.
    Close {
        code: CloseCode,
        reason: Option<String>,
        messages: Vec<Message>,
    },
    /// Session was already CLOSED; abort without writing a body.
    Aborted,
}

struct Inner {
    state: SessionState,
    outbound: VecDeque<Message>,
    parked: VecDeque<oneshot::Sender<ParkedOutcome>>,
    flush_timer: Option<tokio::task::JoinHandle<()>>,
    close_info: Option<(CloseCode, Option<String>)>,
}

/// Server-side half of a single logical connection.
///
/// Lives in the [`SessionRegistry`] from construction until
/// [`terminate`](Self::terminate) removes it. All mutable state is behind a
/// single `tokio::sync::Mutex`, matching the spec's "one mutex per session"
/// guidance for a preemptively scheduled implementation.
pub struct ServerSocket {
    id: SessionId,
    options: SessionOptions,
    registry: SessionRegistry,
    self_ref: Weak<ServerSocket>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    close_fired: AtomicBool,
}

impl ServerSocket {
    /// Construct a new OPEN session. Does *not* insert it into `registry`
    /// — the caller does that (see
    /// [`SocketServer::handshake`](crate::server::SocketServer::handshake)), since
    /// construction and registration are observable as two separate steps
    /// by anything racing a lookup against the handshake.
    pub fn new(id: SessionId, config: &ServerConfig, registry: SessionRegistry) -> Arc<Self> {
        let options = SessionOptions::from(config);
        let (events, _) = broadcast::channel(64);
        Arc::new_cyclic(|self_ref| Self {
            id,
            options,
            registry,
            self_ref: self_ref.clone(),
            inner: Mutex::new(Inner {
                state: SessionState::Open,
                outbound: VecDeque::new(),
                parked: VecDeque::new(),
                flush_timer: None,
                close_info: None,
            }),
            events,
            close_fired: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit_close_once(&self, code: CloseCode, reason: Option<String>) {
        if self.close_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(SessionEvent::Close { code, reason });
    }

    /// Handle a PATCH: decode the request body as client→server messages,
    /// then decide whether to answer immediately or park the response.
    pub async fn poll(self: &Arc<Self>, body: &[u8]) -> PollOutcome {
        {
            let inner = self.inner.lock().await;
            if inner.state == SessionState::Closed {
                return PollOutcome::Immediate(ImmediateOutcome::Aborted);
            }
        }

        if let Ok(serde_json::Value::Array(items)) = serde_json::from_slice::<serde_json::Value>(body) {
            for item in items {
                let _ = self.events.send(SessionEvent::Message(item));
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closing {
            let (code, reason) = inner.close_info.clone().unwrap_or((close::NORMAL, None));
            let messages: Vec<Message> = std::mem::take(&mut inner.outbound).into_iter().collect();
            drop(inner);
            self.terminate().await;
            return PollOutcome::Immediate(ImmediateOutcome::Close {
                code,
                reason,
                messages,
            });
        }

        if !inner.outbound.is_empty() && inner.flush_timer.is_none() {
            let messages: Vec<Message> = std::mem::take(&mut inner.outbound).into_iter().collect();
            return PollOutcome::Immediate(ImmediateOutcome::Flush(messages));
        }

        // Drop any previously parked responses whose peer already
        // disconnected — otherwise a dead entry would occupy a pool slot
        // forever and trigger spurious evictions of live responses.
        inner.parked.retain(|tx| !tx.is_closed());

        let (tx, rx) = oneshot::channel();
        inner.parked.push_back(tx);
        if inner.parked.len() > self.options.max_connection_pool_size {
            if let Some(evicted) = inner.parked.pop_front() {
                let _ = evicted.send(ParkedOutcome::Evicted);
            }
        }
        PollOutcome::Parked(rx)
    }

    /// Called by the dispatcher if a parked response's underlying
    /// connection drops before it is ever completed (the peer went away).
    /// Removes the now-dead sender from the queue so it does not count
    /// against the pool capacity.
    pub async fn forget_parked(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.parked.retain(|tx| !tx.is_closed());
    }

    /// Queue a server→client message. Coalesces with any other `send()`
    /// calls within the configured `buffer_time` window into a single
    /// flush.
    pub async fn send(self: &Arc<Self>, message: Message) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Open {
            return;
        }
        inner.outbound.push_back(message);
        if inner.flush_timer.is_some() {
            return;
        }
        let weak = self.self_ref.clone();
        let duration = self.options.buffer_time;
        let handle = tokio::spawn(async move {
            if duration.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(duration).await;
            }
            if let Some(session) = weak.upgrade() {
                session.fire_flush_timer().await;
            }
        });
        inner.flush_timer = Some(handle);
    }

    async fn fire_flush_timer(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.flush_timer = None;
        let Some(parked) = inner.parked.pop_front() else {
            // No parked response to deliver to; the buffer stays put until
            // the next poll (which will see a non-empty buffer and answer
            // immediately).
            return;
        };
        let messages: Vec<Message> = std::mem::take(&mut inner.outbound).into_iter().collect();
        drop(inner);
        let _ = parked.send(ParkedOutcome::Flush(messages));
    }

    /// Initiate a graceful close from the application side.
    pub async fn close(self: &Arc<Self>, code: CloseCode, reason: Option<String>) {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Open {
            return;
        }
        inner.state = SessionState::Closing;
        inner.close_info = Some((code, reason.clone()));
        self.emit_close_once(code, reason.clone());

        if let Some(timer) = inner.flush_timer.take() {
            timer.abort();
        }
        let messages: Vec<Message> = std::mem::take(&mut inner.outbound).into_iter().collect();
        let parked = inner.parked.pop_front();
        drop(inner);

        if let Some(parked) = parked {
            let _ = parked.send(ParkedOutcome::Close {
                code,
                reason,
                messages,
            });
        }
        self.terminate().await;
    }

    /// Unconditional teardown: drop every remaining parked response,
    /// cancel the flush timer, and remove this session from the registry.
    pub async fn terminate(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Open {
            self.emit_close_once(close::NORMAL, Some("socket was terminated".to_owned()));
        }
        inner.state = SessionState::Closed;
        if let Some(timer) = inner.flush_timer.take() {
            timer.abort();
        }
        let parked: Vec<_> = inner.parked.drain(..).collect();
        drop(inner);

        for sender in parked {
            let _ = sender.send(ParkedOutcome::Aborted);
        }
        self.registry.delete(&self.id).await;
    }
}
