/// Errors surfaced synchronously to the application driving
/// [`ClientSocket`](crate::driver::ClientSocket).
///
/// Transport-level failures (a single failed PATCH, a dropped connection)
/// never reach here — per the spec's error taxonomy they are either
/// retried silently or turned into a `close` event. This enum is reserved
/// for usage errors: calling an operation the current lifecycle state does
/// not allow.
#[derive(Debug, thiserror::Error)]
pub enum ClientSocketError {
    #[error("cannot send while the socket is still connecting")]
    SendWhileConnecting,
}
