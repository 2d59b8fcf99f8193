/// Errors surfaced synchronously to the application embedding
/// [`SocketServer`](crate::server::SocketServer).
///
/// Protocol-level failures (bad/missing headers, unknown session) never
/// reach here — they are answered with a 4xx HTTP response directly by the
/// dispatcher. This enum is reserved for usage errors and lifecycle
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("exactly one of `port`, `listener`, or `no_server` must be set")]
    ConflictingListenerConfig,
    #[error("server is not running")]
    NotRunning,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
