/// WebSocket-style close code.
pub type CloseCode = u16;

/// Normal closure, initiated by either peer's application code.
pub const NORMAL: CloseCode = 1000;
/// A peer is going away (e.g. process shutdown).
pub const GOING_AWAY: CloseCode = 1001;
/// Protocol or transport-level failure.
pub const PROTOCOL_ERROR: CloseCode = 1002;

/// Parse a `close-code` header value, falling back to [`NORMAL`] on any
/// parse failure. This mirrors the source protocol's NaN guard: an
/// unparseable code is not an error, just a signal to use the default.
pub fn parse_close_code(raw: Option<&str>) -> CloseCode {
    raw.and_then(|s| s.parse::<CloseCode>().ok()).unwrap_or(NORMAL)
}
