//! Client-side pool driver: handshake, the PATCH pool, outbound buffering,
//! and the close handshake — grounded in the teacher crate's
//! `transport::streamable_http_client` module, which drives the same
//! connect/poll/retry loop against a long-lived server connection.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use polling_socket_core::{Message, SessionId, close::CloseCode};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    error::ClientSocketError,
    http::{HandshakeResponse, PollResponse, SocketHttpClient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events the driver publishes to local listeners, mirroring the server
/// session's `SessionEvent`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Open,
    Message(Message),
    Close { code: CloseCode, reason: Option<String> },
}

struct Inner {
    state: ClientState,
    outbound: Vec<Message>,
    buffer_scheduler: Option<tokio::task::JoinHandle<()>>,
}

/// Client-side half of a single logical connection.
///
/// Wraps an [`SocketHttpClient`] implementation and drives the long-poll
/// pool against it. Cheap to clone: all shared state lives behind the
/// internal `Arc`.
#[derive(Clone)]
pub struct ClientSocket<C: SocketHttpClient> {
    url: Arc<str>,
    http: C,
    config: ClientConfig,
    session_id: Arc<Mutex<Option<SessionId>>>,
    server_max_pool: Arc<AtomicUsize>,
    pool_size: Arc<AtomicUsize>,
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ClientEvent>,
    /// Cancelled once the socket tears down, so the optional shutdown hook
    /// (§ `spawn_shutdown_hook_if_enabled`) doesn't outlive a socket that
    /// already closed through some other path.
    shutdown: CancellationToken,
}

impl<C: SocketHttpClient> ClientSocket<C> {
    /// Perform the HEAD handshake and, on success, start filling the pool.
    /// Returns the connected socket; failure to connect is reported as a
    /// `close` event on the returned socket's event stream rather than an
    /// `Err`, matching the spec's "closes with 1002" handling for
    /// handshake failures.
    pub async fn connect(url: impl Into<Arc<str>>, http: C, config: ClientConfig) -> Self {
        let url = url.into();
        let (events, _) = broadcast::channel(64);
        let socket = Self {
            url,
            http,
            config,
            session_id: Arc::new(Mutex::new(None)),
            server_max_pool: Arc::new(AtomicUsize::new(1)),
            pool_size: Arc::new(AtomicUsize::new(0)),
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Connecting,
                outbound: Vec::new(),
                buffer_scheduler: None,
            })),
            events,
            shutdown: CancellationToken::new(),
        };

        let headers: Arc<[(String, String)]> = socket.config.request_headers.clone().into();
        match socket.http.handshake(socket.url.clone(), headers).await {
            Ok(HandshakeResponse::Connected { session_id, max_pool_size }) => {
                *socket.session_id.lock().await = Some(session_id);
                socket.server_max_pool.store(max_pool_size, Ordering::SeqCst);
                {
                    let mut inner = socket.inner.lock().await;
                    inner.state = ClientState::Open;
                }
                tracing::info!(pool_size = max_pool_size, "socket connected");
                let _ = socket.events.send(ClientEvent::Open);
                socket.spawn_shutdown_hook_if_enabled();
                socket.pool_fill();
            }
            Ok(HandshakeResponse::HttpError { status, message }) => {
                tracing::warn!(status, %message, "handshake rejected");
                socket
                    .close_locally(
                        polling_socket_core::close::PROTOCOL_ERROR,
                        Some(format!("{status}: {message}")),
                    )
                    .await;
            }
            Ok(HandshakeResponse::Malformed) => {
                tracing::warn!("handshake response missing socket-id/max-pool-size headers");
                socket
                    .close_locally(
                        polling_socket_core::close::PROTOCOL_ERROR,
                        Some("server returned malformed data".to_owned()),
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "handshake transport failure");
                socket
                    .close_locally(
                        polling_socket_core::close::PROTOCOL_ERROR,
                        Some(format!("error while connecting: {err}")),
                    )
                    .await;
            }
        }

        socket
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ClientState {
        self.inner.lock().await.state
    }

    pub async fn buffered_amount(&self) -> usize {
        self.inner.lock().await.outbound.len()
    }

    fn cap(&self) -> usize {
        self.server_max_pool.load(Ordering::SeqCst).min(self.config.max_pool_size).max(1)
    }

    /// While OPEN and below capacity, start a new poll. Increments
    /// `pool_size` before spawning so a burst of calls cannot overshoot
    /// the cap.
    fn pool_fill(&self) {
        loop {
            let cap = self.cap();
            let previous = self.pool_size.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < cap { Some(n + 1) } else { None }
            });
            if previous.is_err() {
                break;
            }
            let socket = self.clone();
            tokio::spawn(async move {
                socket.poll_once().await;
            });
        }
    }

    async fn poll_once(&self) {
        if self.inner.lock().await.state != ClientState::Open {
            self.pool_size.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        let snapshot = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.outbound)
        };

        let Some(session_id) = self.session_id.lock().await.clone() else {
            self.pool_size.fetch_sub(1, Ordering::SeqCst);
            return;
        };
        let headers: Arc<[(String, String)]> = self.config.request_headers.clone().into();

        match self.http.poll(self.url.clone(), session_id, headers, snapshot.clone()).await {
            Ok(PollResponse::NotFound) => {
                tracing::info!("server reports unknown session; closing");
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.close_locally(
                    polling_socket_core::close::NORMAL,
                    Some("socket was closed by server".to_owned()),
                )
                .await;
            }
            Ok(PollResponse::ServerError) => {
                tracing::warn!("server reported an internal error");
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.close_locally(
                    polling_socket_core::close::PROTOCOL_ERROR,
                    Some("internal server error".to_owned()),
                )
                .await;
            }
            Ok(PollResponse::Other) => {
                // Non-success status other than 410/404/500: the snapshot
                // is not restored to the buffer (matches the source's
                // behavior on this branch) and the pool slot is kept.
                tracing::debug!("poll returned an unexpected status; retrying");
                self.pool_fill();
            }
            Ok(PollResponse::DecodeError) => {
                tracing::debug!("poll response body did not decode; retrying");
                self.pool_fill();
            }
            Ok(PollResponse::Flush(messages)) => {
                for message in messages {
                    let _ = self.events.send(ClientEvent::Message(message));
                }
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.pool_fill();
            }
            Ok(PollResponse::Close { code, reason, messages }) => {
                for message in messages {
                    let _ = self.events.send(ClientEvent::Message(message));
                }
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.close_locally(code, reason).await;
            }
            Err(err) => {
                tracing::debug!(error = %err, "poll transport error; will retry");
                {
                    let mut inner = self.inner.lock().await;
                    let mut restored = snapshot;
                    restored.append(&mut inner.outbound);
                    inner.outbound = restored;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                self.pool_fill();
            }
        }
    }

    /// Queue an outbound message. Errors if the socket is still
    /// CONNECTING; silently drops if CLOSING/CLOSED (matching the spec's
    /// documented asymmetry).
    pub async fn send(&self, message: Message) -> Result<(), ClientSocketError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ClientState::Connecting => return Err(ClientSocketError::SendWhileConnecting),
            ClientState::Closing | ClientState::Closed => return Ok(()),
            ClientState::Open => {}
        }
        inner.outbound.push(message);
        if inner.buffer_scheduler.is_some() {
            return Ok(());
        }
        let socket = self.clone();
        let duration = self.config.buffer_time;
        let handle = tokio::spawn(async move {
            if duration.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(duration).await;
            }
            {
                let mut inner = socket.inner.lock().await;
                inner.buffer_scheduler = None;
            }
            socket.pool_fill();
        });
        inner.buffer_scheduler = Some(handle);
        Ok(())
    }

    /// Application-initiated close: issues a DELETE (retried up to three
    /// times on transport error) before tearing down locally.
    pub async fn close(&self, code: CloseCode, reason: Option<String>) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, ClientState::Closing | ClientState::Closed) {
                return;
            }
            inner.state = ClientState::Closing;
        }
        let _ = self.events.send(ClientEvent::Close { code, reason: reason.clone() });

        if let Some(session_id) = self.session_id.lock().await.clone() {
            let headers: Arc<[(String, String)]> = self.config.request_headers.clone().into();
            for attempt in 0..3 {
                match self
                    .http
                    .close(self.url.clone(), session_id.clone(), headers.clone(), code, reason.clone())
                    .await
                {
                    Ok(()) => break,
                    Err(err) if attempt < 2 => {
                        tracing::debug!(error = %err, attempt, "close DELETE failed, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    Err(err) => tracing::warn!(error = %err, "close DELETE failed after retries"),
                }
            }
        }

        self.teardown().await;
    }

    /// Internal teardown path used when the server has already ended the
    /// session (404/410/500 on poll, or a failed handshake): no DELETE is
    /// issued.
    async fn close_locally(&self, code: CloseCode, reason: Option<String>) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, ClientState::Closing | ClientState::Closed) {
                return;
            }
            inner.state = ClientState::Closing;
        }
        let _ = self.events.send(ClientEvent::Close { code, reason });
        self.teardown().await;
    }

    async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ClientState::Closed;
        if let Some(handle) = inner.buffer_scheduler.take() {
            handle.abort();
        }
        self.shutdown.cancel();
    }

    fn spawn_shutdown_hook_if_enabled(&self) {
        if !self.config.close_on_shutdown {
            return;
        }
        let socket = self.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = tokio::signal::ctrl_c() => if result.is_ok() {
                    socket
                        .close(
                            polling_socket_core::close::GOING_AWAY,
                            Some("process shutting down".to_owned()),
                        )
                        .await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct MockHttp {
        handshake_result: Arc<StdMutex<Option<HandshakeResponse>>>,
        poll_results: Arc<StdMutex<Vec<PollResponse>>>,
        closes: Arc<StdMutex<Vec<CloseCode>>>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("mock transport error")]
    struct MockError;

    impl SocketHttpClient for MockHttp {
        type Error = MockError;

        async fn handshake(
            &self,
            _url: Arc<str>,
            _headers: Arc<[(String, String)]>,
        ) -> Result<HandshakeResponse, Self::Error> {
            Ok(self.handshake_result.lock().unwrap().take().unwrap())
        }

        async fn poll(
            &self,
            _url: Arc<str>,
            _session_id: SessionId,
            _headers: Arc<[(String, String)]>,
            _body: Vec<Message>,
        ) -> Result<PollResponse, Self::Error> {
            let mut results = self.poll_results.lock().unwrap();
            if results.is_empty() {
                // Keep the pool quiet once the scripted outcomes run out.
                Ok(PollResponse::Flush(Vec::new()))
            } else {
                Ok(results.remove(0))
            }
        }

        async fn close(
            &self,
            _url: Arc<str>,
            _session_id: SessionId,
            _headers: Arc<[(String, String)]>,
            code: CloseCode,
            _reason: Option<String>,
        ) -> Result<(), Self::Error> {
            self.closes.lock().unwrap().push(code);
            Ok(())
        }
    }

    fn connected_handshake() -> HandshakeResponse {
        HandshakeResponse::Connected {
            session_id: SessionId::from("s1"),
            max_pool_size: 2,
        }
    }

    #[tokio::test]
    async fn handshake_success_transitions_to_open_and_emits_open() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(Some(connected_handshake()))),
            ..Default::default()
        };
        let socket = ClientSocket::connect("http://x/s", http, ClientConfig {
            close_on_shutdown: false,
            ..Default::default()
        })
        .await;

        assert_eq!(socket.state().await, ClientState::Open);
    }

    #[tokio::test]
    async fn malformed_handshake_closes_with_protocol_error() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(Some(HandshakeResponse::Malformed))),
            ..Default::default()
        };
        let socket = ClientSocket::connect("http://x/s", http, ClientConfig {
            close_on_shutdown: false,
            ..Default::default()
        })
        .await;
        let mut events = socket.subscribe();

        assert_eq!(socket.state().await, ClientState::Closed);
        match events.recv().await.unwrap() {
            ClientEvent::Close { code, .. } => {
                assert_eq!(code, polling_socket_core::close::PROTOCOL_ERROR);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_poll_closes_with_code_1000() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(Some(connected_handshake()))),
            poll_results: Arc::new(StdMutex::new(vec![PollResponse::NotFound, PollResponse::NotFound])),
            ..Default::default()
        };
        let socket = ClientSocket::connect("http://x/s", http, ClientConfig {
            close_on_shutdown: false,
            ..Default::default()
        })
        .await;
        let mut events = socket.subscribe();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("close should fire")
            .unwrap();
        match event {
            ClientEvent::Close { code, .. } => assert_eq!(code, polling_socket_core::close::NORMAL),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(socket.state().await, ClientState::Closed);
    }

    #[tokio::test]
    async fn send_while_connecting_is_an_error() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(None)),
            ..Default::default()
        };
        let socket = ClientSocket {
            url: "http://x/s".into(),
            http,
            config: ClientConfig::default(),
            session_id: Arc::new(Mutex::new(None)),
            server_max_pool: Arc::new(AtomicUsize::new(1)),
            pool_size: Arc::new(AtomicUsize::new(0)),
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Connecting,
                outbound: Vec::new(),
                buffer_scheduler: None,
            })),
            events: broadcast::channel(16).0,
            shutdown: CancellationToken::new(),
        };

        let result = socket.send(serde_json::json!("x")).await;
        assert!(matches!(result, Err(ClientSocketError::SendWhileConnecting)));
    }

    #[tokio::test]
    async fn send_after_close_is_silently_dropped() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(Some(connected_handshake()))),
            closes: Arc::new(StdMutex::new(Vec::new())),
            ..Default::default()
        };
        let socket = ClientSocket::connect("http://x/s", http, ClientConfig {
            close_on_shutdown: false,
            ..Default::default()
        })
        .await;
        socket.close(polling_socket_core::close::NORMAL, None).await;

        let result = socket.send(serde_json::json!("x")).await;
        assert!(result.is_ok());
        assert_eq!(socket.buffered_amount().await, 0);
    }

    #[tokio::test]
    async fn concurrent_close_calls_emit_close_exactly_once() {
        let http = MockHttp {
            handshake_result: Arc::new(StdMutex::new(Some(connected_handshake()))),
            closes: Arc::new(StdMutex::new(Vec::new())),
            ..Default::default()
        };
        let socket = ClientSocket::connect("http://x/s", http, ClientConfig {
            close_on_shutdown: false,
            ..Default::default()
        })
        .await;
        let mut events = socket.subscribe();

        let a = socket.clone();
        let b = socket.clone();
        tokio::join!(
            a.close(polling_socket_core::close::NORMAL, None),
            b.close(polling_socket_core::close::GOING_AWAY, Some("shutting down".to_owned())),
        );

        let mut closes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::Close { .. }) {
                closes += 1;
            }
        }
        assert_eq!(closes, 1);
    }
}
