//! The HTTP operations the pool driver needs, abstracted behind a trait —
//! grounded in the teacher crate's `StreamableHttpClient` trait
//! (`transport::streamable_http_client::StreamableHttpClient`), which keeps
//! the driver's retry/state-machine logic independent of the concrete HTTP
//! stack. [`ReqwestSocketClient`] is the default, reqwest-backed
//! implementation.

use std::{future::Future, sync::Arc};

use polling_socket_core::{Message, SessionId, close::CloseCode};

/// Outcome of the HEAD handshake, already classified by status/headers so
/// the driver only has to match on it.
#[derive(Debug)]
pub enum HandshakeResponse {
    Connected { session_id: SessionId, max_pool_size: usize },
    HttpError { status: u16, message: String },
    Malformed,
}

/// Outcome of a PATCH poll, already classified by status and (where
/// applicable) JSON-decoded.
#[derive(Debug)]
pub enum PollResponse {
    /// 2xx with a body that decoded to a JSON array.
    Flush(Vec<Message>),
    /// 410 with a body that decoded to a JSON array.
    Close {
        code: CloseCode,
        reason: Option<String>,
        messages: Vec<Message>,
    },
    /// 404 — the server no longer has this session.
    NotFound,
    /// 500 — fatal server-side failure.
    ServerError,
    /// Any other non-success status.
    Other,
    /// 2xx/410 but the body did not decode to a JSON array.
    DecodeError,
}

/// HTTP operations the client driver needs. Implement this to back the
/// transport with something other than reqwest (a mock for tests, a
/// different HTTP stack, a unix-socket bridge).
pub trait SocketHttpClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handshake(
        &self,
        url: Arc<str>,
        headers: Arc<[(String, String)]>,
    ) -> impl Future<Output = Result<HandshakeResponse, Self::Error>> + Send;

    fn poll(
        &self,
        url: Arc<str>,
        session_id: SessionId,
        headers: Arc<[(String, String)]>,
        body: Vec<Message>,
    ) -> impl Future<Output = Result<PollResponse, Self::Error>> + Send;

    fn close(
        &self,
        url: Arc<str>,
        session_id: SessionId,
        headers: Arc<[(String, String)]>,
        code: CloseCode,
        reason: Option<String>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestSocketClient {
    client: reqwest::Client,
}

impl ReqwestSocketClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &[(String, String)],
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
}

impl SocketHttpClient for ReqwestSocketClient {
    type Error = reqwest::Error;

    async fn handshake(
        &self,
        url: Arc<str>,
        headers: Arc<[(String, String)]>,
    ) -> Result<HandshakeResponse, Self::Error> {
        let req = apply_headers(self.client.head(url.as_ref()), &headers);
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Ok(HandshakeResponse::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        let session_id = resp
            .headers()
            .get(polling_socket_core::http_header::HEADER_SOCKET_ID)
            .and_then(|v| v.to_str().ok())
            .map(SessionId::from);
        let max_pool_size = resp
            .headers()
            .get(polling_socket_core::http_header::HEADER_MAX_POOL_SIZE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        match (session_id, max_pool_size) {
            (Some(session_id), Some(max_pool_size)) => Ok(HandshakeResponse::Connected {
                session_id,
                max_pool_size: max_pool_size.max(1),
            }),
            _ => Ok(HandshakeResponse::Malformed),
        }
    }

    async fn poll(
        &self,
        url: Arc<str>,
        session_id: SessionId,
        headers: Arc<[(String, String)]>,
        body: Vec<Message>,
    ) -> Result<PollResponse, Self::Error> {
        let mut req = apply_headers(
            self.client.request(reqwest::Method::PATCH, url.as_ref()),
            &headers,
        )
        .header(
            polling_socket_core::http_header::HEADER_SOCKET_ID,
            session_id.as_str(),
        )
        .header(
            reqwest::header::CONTENT_TYPE,
            polling_socket_core::http_header::JSON_MIME_TYPE,
        );
        req = req.json(&body);

        let resp = req.send().await?;
        let status = resp.status();

        if status.as_u16() == 404 {
            return Ok(PollResponse::NotFound);
        }
        if status.as_u16() == 500 {
            return Ok(PollResponse::ServerError);
        }
        if !status.is_success() && status.as_u16() != 410 {
            return Ok(PollResponse::Other);
        }

        let close_code = resp
            .headers()
            .get(polling_socket_core::http_header::HEADER_CLOSE_CODE)
            .and_then(|v| v.to_str().ok())
            .map(polling_socket_core::close::parse_close_code);
        let close_reason = resp
            .headers()
            .get(polling_socket_core::http_header::HEADER_CLOSE_REASON)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let is_close = status.as_u16() == 410;

        let bytes = resp.bytes().await?;
        let messages = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Array(items)) => items,
            _ => return Ok(PollResponse::DecodeError),
        };

        if is_close {
            Ok(PollResponse::Close {
                code: close_code.unwrap_or(polling_socket_core::close::NORMAL),
                reason: close_reason,
                messages,
            })
        } else {
            Ok(PollResponse::Flush(messages))
        }
    }

    async fn close(
        &self,
        url: Arc<str>,
        session_id: SessionId,
        headers: Arc<[(String, String)]>,
        code: CloseCode,
        reason: Option<String>,
    ) -> Result<(), Self::Error> {
        let mut builder = apply_headers(self.client.delete(url.as_ref()), &headers)
            .header(
                polling_socket_core::http_header::HEADER_SOCKET_ID,
                session_id.as_str(),
            )
            .header(
                polling_socket_core::http_header::HEADER_CLOSE_CODE,
                code.to_string(),
            );
        if let Some(reason) = &reason {
            builder = builder.header(polling_socket_core::http_header::HEADER_CLOSE_REASON, reason);
        }
        builder.send().await?;
        Ok(())
    }
}
