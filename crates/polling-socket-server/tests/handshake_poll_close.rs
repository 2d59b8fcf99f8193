//! End-to-end exercises of the actix-web dispatcher, grounded in the
//! scenarios from the transport specification (handshake + echo, pool
//! overflow eviction, orderly close via DELETE).

use actix_web::{App, http::Method, test};
use polling_socket_core::http_header::{HEADER_MAX_POOL_SIZE, HEADER_SOCKET_ID};
use polling_socket_server::{ListenerSource, ServerConfig, SocketServer, SocketService};
use std::sync::Arc;

fn config(path: &str, pool: usize) -> ServerConfig {
    ServerConfig {
        listener: ListenerSource::NoServer,
        path: path.to_owned(),
        max_connection_pool_size: pool,
        ..Default::default()
    }
}

#[actix_web::test]
async fn handshake_returns_session_id_and_pool_size() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s").method(Method::HEAD).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get(HEADER_MAX_POOL_SIZE).unwrap(), "1");
    let session_id = resp.headers().get(HEADER_SOCKET_ID).unwrap().to_str().unwrap();
    assert_eq!(session_id.len(), 32);
}

#[actix_web::test]
async fn handshake_plus_echo() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server.clone()));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s").method(Method::HEAD).to_request();
    let resp = test::call_service(&app, req).await;
    let session_id = resp
        .headers()
        .get(HEADER_SOCKET_ID)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let session = server
        .registry()
        .get(&session_id.clone().into())
        .await
        .expect("session should exist after handshake");
    session.send(serde_json::json!("a")).await;

    let req = test::TestRequest::with_uri("/s")
        .method(Method::PATCH)
        .insert_header(("socket-id", session_id.as_str()))
        .set_payload("[]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, serde_json::json!(["a"]));
}

#[actix_web::test]
async fn poll_without_socket_id_is_bad_request() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s")
        .method(Method::PATCH)
        .set_payload("[]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn poll_with_unknown_socket_id_is_not_found() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s")
        .method(Method::PATCH)
        .insert_header(("socket-id", "nonexistent"))
        .set_payload("[]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn close_via_delete_then_poll_is_not_found() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server.clone()));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s").method(Method::HEAD).to_request();
    let resp = test::call_service(&app, req).await;
    let session_id = resp
        .headers()
        .get(HEADER_SOCKET_ID)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let req = test::TestRequest::with_uri("/s")
        .method(Method::DELETE)
        .insert_header(("socket-id", session_id.as_str()))
        .insert_header(("close-code", "1001"))
        .insert_header(("close-reason", "bye"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::with_uri("/s")
        .method(Method::PATCH)
        .insert_header(("socket-id", session_id.as_str()))
        .set_payload("[]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn unparseable_close_code_defaults_to_1000() {
    let server = SocketServer::new(config("/s", 1)).unwrap();
    let service = Arc::new(SocketService::new(server.clone()));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s").method(Method::HEAD).to_request();
    let resp = test::call_service(&app, req).await;
    let session_id = resp
        .headers()
        .get(HEADER_SOCKET_ID)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let session = server.registry().get(&session_id.clone().into()).await.unwrap();
    let mut events = session.subscribe();

    let req = test::TestRequest::with_uri("/s")
        .method(Method::DELETE)
        .insert_header(("socket-id", session_id.as_str()))
        .insert_header(("close-code", "not-a-number"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    match events.recv().await.unwrap() {
        polling_socket_server::SessionEvent::Close { code, .. } => assert_eq!(code, 1000),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[actix_web::test]
async fn pool_overflow_evicts_oldest_parked_response() {
    let server = SocketServer::new(config("/s", 2)).unwrap();
    let service = Arc::new(SocketService::new(server.clone()));
    let app = test::init_service(App::new().configure(SocketService::configure(service))).await;

    let req = test::TestRequest::with_uri("/s").method(Method::HEAD).to_request();
    let resp = test::call_service(&app, req).await;
    let session_id = resp
        .headers()
        .get(HEADER_SOCKET_ID)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let poll = |session_id: String| {
        let app = &app;
        async move {
            let req = test::TestRequest::with_uri("/s")
                .method(Method::PATCH)
                .insert_header(("socket-id", session_id))
                .set_payload("[]")
                .to_request();
            test::call_service(app, req).await
        }
    };

    let first = poll(session_id.clone());
    let second = poll(session_id.clone());
    let third = poll(session_id.clone());
    let (first, _second, _third) = tokio::join!(first, second, third);

    // The first (oldest) parked response should have been evicted with an
    // empty body once the third PATCH pushed the pool over capacity.
    let body: serde_json::Value = test::read_body_json(first).await;
    assert_eq!(body, serde_json::json!([]));
}
