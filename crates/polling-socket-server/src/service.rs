//! actix-web glue: turns HEAD/PATCH/DELETE requests on the configured path
//! into calls against [`SocketServer`] and [`ServerSocket`].
//!
//! Grounded in the teacher crate's
//! `transport::streamable_http_server::actix_web::StreamableHttpService`:
//! one struct wrapping the shared server state behind `Data<Arc<..>>`, a
//! `configure` function building an actix-web scope, and one async handler
//! per HTTP method.

use std::sync::Arc;

use actix_web::{
    HttpRequest, HttpResponse, Result,
    web::{self, Bytes, Data},
};
use polling_socket_core::{
    SessionId,
    close::parse_close_code,
    http_header::{HEADER_CLOSE_CODE, HEADER_CLOSE_REASON, HEADER_MAX_POOL_SIZE, HEADER_SOCKET_ID, JSON_MIME_TYPE},
};

use crate::{
    server::SocketServer,
    session::{ImmediateOutcome, ParkedOutcome, PollOutcome, ServerSocket},
};

/// Removes a parked response's slot if the handler future is dropped
/// before `rx` resolves — the peer closed the connection while the
/// response was held open and no further poll will arrive to trigger the
/// lazy `retain(!is_closed)` sweep in [`ServerSocket::poll`].
struct ParkedGuard {
    session: Arc<ServerSocket>,
    completed: bool,
}

impl Drop for ParkedGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let session = self.session.clone();
        tokio::spawn(async move {
            session.forget_parked().await;
        });
    }
}

/// Mountable actix-web service implementing the socket protocol on top of
/// a [`SocketServer`].
#[derive(Clone)]
pub struct SocketService {
    server: Arc<SocketServer>,
}

impl SocketService {
    pub fn new(server: Arc<SocketServer>) -> Self {
        Self { server }
    }

    pub fn configure(service: Arc<Self>) -> impl FnOnce(&mut web::ServiceConfig) {
        let path = service.server.config().path.clone();
        move |cfg: &mut web::ServiceConfig| {
            cfg.app_data(Data::new(service.clone())).service(
                web::resource(path)
                    .route(web::head().to(Self::handle_handshake))
                    .route(web::method(actix_web::http::Method::PATCH).to(Self::handle_poll))
                    .route(web::delete().to(Self::handle_close)),
            );
        }
    }

    async fn handle_handshake(
        req: HttpRequest,
        service: Data<Arc<SocketService>>,
    ) -> Result<HttpResponse> {
        if !service.server.accepts(req.path()).await {
            return Ok(HttpResponse::NotFound().finish());
        }
        let id = SessionId::generate();
        let session = service.server.create_session(id).await;
        tracing::debug!(session_id = %session.id(), "handshake");

        Ok(HttpResponse::Ok()
            .insert_header((HEADER_SOCKET_ID, session.id().as_str()))
            .insert_header((
                HEADER_MAX_POOL_SIZE,
                service.server.config().max_connection_pool_size.to_string(),
            ))
            .content_type(JSON_MIME_TYPE)
            .finish())
    }

    async fn handle_poll(
        req: HttpRequest,
        body: Bytes,
        service: Data<Arc<SocketService>>,
    ) -> Result<HttpResponse> {
        if !service.server.accepts(req.path()).await {
            return Ok(HttpResponse::NotFound().finish());
        }

        let Some(session_id) = header_str(&req, HEADER_SOCKET_ID) else {
            return Ok(HttpResponse::BadRequest().body("Missing Socket-Id"));
        };
        let session_id = SessionId::from(session_id);

        let session = match service.server.registry().get(&session_id).await {
            Some(session) => session,
            None if service.server.config().allow_client_ids => {
                service.server.create_session(session_id).await
            }
            None => return Ok(HttpResponse::NotFound().body("Invalid Socket-Id")),
        };

        match session.poll(&body).await {
            PollOutcome::Immediate(outcome) => Ok(immediate_response(outcome)),
            PollOutcome::Parked(rx) => {
                let mut guard = ParkedGuard {
                    session: session.clone(),
                    completed: false,
                };
                let result = rx.await;
                guard.completed = true;
                match result {
                    Ok(outcome) => Ok(parked_response(outcome)),
                    // Sender was dropped without sending, which only happens
                    // if the session was torn down through some path that
                    // doesn't itself send a terminal `ParkedOutcome` — treat
                    // it the same as an explicit abort.
                    Err(_) => Ok(HttpResponse::Ok().finish()),
                }
            }
        }
    }

    async fn handle_close(
        req: HttpRequest,
        service: Data<Arc<SocketService>>,
    ) -> Result<HttpResponse> {
        if !service.server.accepts(req.path()).await {
            return Ok(HttpResponse::NotFound().finish());
        }

        let Some(session_id) = header_str(&req, HEADER_SOCKET_ID) else {
            return Ok(HttpResponse::BadRequest().body("Missing Socket-Id"));
        };
        let session_id = SessionId::from(session_id);

        let Some(session) = service.server.registry().get(&session_id).await else {
            return Ok(HttpResponse::NotFound().body("Invalid Socket-Id"));
        };

        let code = parse_close_code(header_str(&req, HEADER_CLOSE_CODE));
        let reason = header_str(&req, HEADER_CLOSE_REASON).map(str::to_owned);

        tracing::info!(session_id = %session.id(), code, "close requested by client");
        session.close(code, reason).await;

        Ok(HttpResponse::Ok().finish())
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn immediate_response(outcome: ImmediateOutcome) -> HttpResponse {
    match outcome {
        ImmediateOutcome::Flush(messages) => {
            HttpResponse::Ok().content_type(JSON_MIME_TYPE).json(messages)
        }
        ImmediateOutcome::Close {
            code,
            reason,
            messages,
        } => close_response(code, reason, messages),
        ImmediateOutcome::Aborted => HttpResponse::Ok().finish(),
    }
}

fn parked_response(outcome: ParkedOutcome) -> HttpResponse {
    match outcome {
        ParkedOutcome::Flush(messages) => {
            HttpResponse::Ok().content_type(JSON_MIME_TYPE).json(messages)
        }
        ParkedOutcome::Close {
            code,
            reason,
            messages,
        } => close_response(code, reason, messages),
        ParkedOutcome::Evicted => HttpResponse::Ok().content_type(JSON_MIME_TYPE).body("[]"),
        ParkedOutcome::Aborted => HttpResponse::Ok().finish(),
    }
}

fn close_response(
    code: u16,
    reason: Option<String>,
    messages: Vec<serde_json::Value>,
) -> HttpResponse {
    let mut builder = HttpResponse::Gone();
    builder
        .insert_header((HEADER_CLOSE_CODE, code.to_string()))
        .content_type(JSON_MIME_TYPE);
    if let Some(reason) = reason {
        builder.insert_header((HEADER_CLOSE_REASON, reason));
    }
    builder.json(messages)
}
