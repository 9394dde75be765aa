//! Admin API: block list reporting and control.
//!
//! - `GET /urls`: every URL seen, keyed by fingerprint
//! - `POST /block`, `POST /unblock`: body is a fingerprint
//! - `GET /status`: version and cache counters

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::cache::KeyedCache;
use crate::security::AccessPolicy;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub policy: Arc<AccessPolicy>,
    pub cache: Arc<KeyedCache>,
    pub api_key: Option<Arc<str>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/urls", get(list_urls))
        .route("/block", post(block))
        .route("/unblock", post(unblock))
        .route("/status", get(get_status))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::BlockListing;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn state(api_key: Option<&str>) -> (tempfile::TempDir, AdminState) {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyedCache::open(dir.path(), 1024).await.unwrap();
        let state = AdminState {
            policy: Arc::new(AccessPolicy::new()),
            cache: Arc::new(cache),
            api_key: api_key.map(Arc::from),
        };
        (dir, state)
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn block_and_unblock_flip_the_flag() {
        let (_dir, state) = state(None).await;
        state
            .policy
            .check_and_register("example.com/a?", BlockListing::new("127.0.0.1:1", "GET", "example.com/a"));
        let fp = crate::cache::Fingerprint::of("example.com/a?");
        let app = setup_admin_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/block")
                    .body(Body::from(format!("{fp}\n")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = json(response).await;
        assert_eq!(listing["blocked"], true);
        assert_eq!(listing["url"], "example.com/a");
        assert_eq!(listing["remoteAddr"], "127.0.0.1:1");

        let response = app
            .clone()
            .oneshot(Request::get("/urls").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let urls = json(response).await;
        assert_eq!(urls[fp.as_str()]["blocked"], true);

        let response = app
            .oneshot(Request::post("/unblock").body(Body::from(fp.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(json(response).await["blocked"], false);
        assert!(!state.policy.get(fp.as_str()).unwrap().blocked);
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_404() {
        let (_dir, state) = state(None).await;
        let app = setup_admin_router(state);

        let response = app
            .oneshot(Request::post("/block").body(Body::from("not-a-fingerprint")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_set() {
        let (_dir, state) = state(Some("secret")).await;
        let app = setup_admin_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/status")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = json(response).await;
        assert_eq!(status["cache"]["entries"], 0);
        assert_eq!(status["known_urls"], 0);
    }
}
