//! Header and content-type names used by the wire protocol, gathered in one
//! place the way the teacher crate gathers its header constants in
//! `transport::common::http_header`.

pub const HEADER_SOCKET_ID: &str = "socket-id";
pub const HEADER_MAX_POOL_SIZE: &str = "max-pool-size";
pub const HEADER_CLOSE_CODE: &str = "close-code";
pub const HEADER_CLOSE_REASON: &str = "close-reason";

pub const JSON_MIME_TYPE: &str = "application/json";
