//! HTTP server implementation using Axum.

use super::handlers;
use super::session::load_session;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use log_service_core::{AppContext, ShutdownListener};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the route table over `ctx`.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/log", post(handlers::write_log))
        .route("/logs", get(handlers::list_logs).delete(handlers::drop_logs))
        .route("/logs/:id", get(handlers::get_log).put(handlers::update_log))
        .route(
            "/session",
            get(handlers::session_info).delete(handlers::end_session),
        )
        .layer(from_fn_with_state(Arc::clone(&ctx), load_session))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(ctx)
}

/// Bound but not yet serving HTTP listener.
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Bind `addr`. A bind failure is returned to the caller, which treats it as fatal.
    pub async fn bind(addr: SocketAddr, ctx: Arc<AppContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("HTTP server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            router: router(ctx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` fires, then finish in-flight requests and return.
    pub async fn serve(self, shutdown: ShutdownListener) -> io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown.recv_owned())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use log_service_core::{SessionConfig, SessionManager, Shutdown, StoreClient, StoreOptions};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        router(AppContext::new(
            store,
            SessionManager::new(SessionConfig::default()),
        ))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_router().await;
        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "connected");
    }

    #[tokio::test]
    async fn test_write_then_read_log() {
        let app = test_router().await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/log", json!({"name": "event", "data": "payload"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().get(SET_COOKIE).is_some());

        let body = body_json(response).await;
        assert_eq!(body["error"], false);
        assert_eq!(body["message"], "logged");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(empty_request("GET", &format!("/logs/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let entry = body_json(response).await;
        assert_eq!(entry["name"], "event");
        assert_eq!(entry["data"], "payload");

        let response = app.oneshot(empty_request("GET", "/logs")).await.unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_is_404_with_envelope() {
        let app = test_router().await;
        let response = app
            .oneshot(empty_request("GET", "/logs/does-not-exist"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn test_corrupt_stored_record_is_server_error() {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        store
            .collection("logs")
            .insert("bad".to_string(), json!({"oops": 1}))
            .await
            .unwrap();
        let app = router(AppContext::new(
            store,
            SessionManager::new(SessionConfig::default()),
        ));

        let response = app.oneshot(empty_request("GET", "/logs/bad")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], true);
    }

    #[tokio::test]
    async fn test_malformed_body_is_client_error() {
        let app = test_router().await;
        let request = Request::builder()
            .method("POST")
            .uri("/log")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(body_json(response).await["error"], true);

        // The router keeps serving after a failed request.
        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_and_drop() {
        let app = test_router().await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/log", json!({"name": "a", "data": "1"})))
            .await
            .unwrap();
        let id = body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/logs/{}", id),
                json!({"name": "a", "data": "2"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], "2");

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/logs/missing", json!({"name": "b"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", "/logs"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["dropped"], 1);

        let response = app.oneshot(empty_request("GET", "/logs")).await.unwrap();
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_session_remembers_last_entry() {
        let app = test_router().await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/log", json!({"name": "s", "data": "d"})))
            .await
            .unwrap();
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("HttpOnly"));
        let cookie = set_cookie.split(';').next().unwrap().to_string();
        let id = body_json(response).await["data"]["id"].clone();

        let request = Request::builder()
            .uri("/session")
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        // Reading does not rewrite the cookie.
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(body_json(response).await["last_entry_id"], id);

        let request = Request::builder()
            .method("DELETE")
            .uri("/session")
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request = Request::builder()
            .uri("/session")
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(body_json(response).await["last_entry_id"], Value::Null);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        let ctx = AppContext::new(store, SessionManager::new(SessionConfig::default()));
        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), ctx)
            .await
            .unwrap();
        assert!(server.local_addr().port() > 0);

        let shutdown = Shutdown::new();
        let task = tokio::spawn(server.serve(shutdown.listener()));
        shutdown.trigger();

        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        let ctx = AppContext::new(store, SessionManager::new(SessionConfig::default()));
        assert!(HttpServer::bind(addr, ctx).await.is_err());
    }
}
