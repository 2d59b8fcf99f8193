use std::time::Duration;

/// Configuration for [`ClientSocket::connect`](crate::driver::ClientSocket::connect).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local cap on concurrent in-flight PATCH requests. The driver
    /// actually maintains `min(server_max_pool, max_pool_size)`.
    pub max_pool_size: usize,
    /// Debounce window: how long `send()` waits before starting a flush
    /// PATCH, to let a burst of sends coalesce into one request.
    pub buffer_time: Duration,
    /// Headers applied to every request (handshake, poll, and close).
    pub request_headers: Vec<(String, String)>,
    /// If true, a process shutdown signal (Ctrl-C) triggers
    /// `close(1001, "process shutting down")` automatically.
    pub close_on_shutdown: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 2,
            buffer_time: Duration::ZERO,
            request_headers: Vec::new(),
            close_on_shutdown: true,
        }
    }
}
