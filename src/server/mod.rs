//! HTTP admission server.
//!
//! # Endpoints
//!
//! - `POST /dispatch` - Validates a dispatch event and stores it write-once
//! - `GET /health` - Returns 200 if the server is running
//!
//! Conversion and delivery are not done inline: a stored event is picked up
//! by the raw-event watcher.

use std::sync::Arc;

use crate::core::AdmissionGate;

pub mod admission;
pub mod health;

pub use admission::admission_handler;
pub use health::health_handler;

/// Shared application state, passed to handlers via `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    gate: AdmissionGate,
}

impl AppState {
    pub fn new(gate: AdmissionGate) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { gate }),
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/dispatch", post(admission_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    use crate::storage::FsBlobStore;

    fn test_app() -> (axum::Router, TempDir) {
        let dir = tempdir().unwrap();
        let gate = AdmissionGate::new(Arc::new(FsBlobStore::new(dir.path())), "raw-json");
        (build_router(AppState::new(gate)), dir)
    }

    fn post_dispatch(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/dispatch")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn complete_event() -> String {
        serde_json::json!({
            "controlNumber": 101,
            "salesOrder": "SO123456",
            "containers": [{
                "loadId": "LOAD001", "containerType": "20RF",
                "items": [{"itemCode": "ITEM001", "quantity": 10, "cartonWeight": 2.5}]
            }],
            "deliveryAddress": {"street": "1 Main St", "city": "Springfield",
                                "state": "IL", "postalCode": "62701", "country": "US"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (app, _dir) = test_app();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn dispatch_valid_returns_200() {
        let (app, dir) = test_app();

        let response = app.oneshot(post_dispatch(complete_event())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["key"], "dispatch_101_SO123456.json");
        assert_eq!(
            body["message"],
            "JSON file dispatch_101_SO123456.json stored successfully."
        );
        assert!(dir
            .path()
            .join("raw-json/dispatch_101_SO123456.json")
            .exists());
    }

    #[tokio::test]
    async fn dispatch_missing_fields_returns_422() {
        let (app, dir) = test_app();

        let response = app
            .oneshot(post_dispatch(r#"{"controlNumber": 1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Validation Failed");
        assert_eq!(
            body["missingFields"],
            serde_json::json!(["salesOrder", "containers", "deliveryAddress"])
        );
        assert!(!dir.path().join("raw-json").exists());
    }

    #[tokio::test]
    async fn dispatch_garbage_returns_422() {
        let (app, _dir) = test_app();

        let response = app.oneshot(post_dispatch("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_body(response).await;
        let fields = body["missingFields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields[0].as_str().unwrap().starts_with("Invalid JSON format: "));
    }

    #[tokio::test]
    async fn dispatch_duplicate_returns_409() {
        let (app, _dir) = test_app();

        let first = app
            .clone()
            .oneshot(post_dispatch(complete_event()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_dispatch(complete_event())).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let body = json_body(second).await;
        assert_eq!(body["error"], "Conflict");
        assert_eq!(body["key"], "dispatch_101_SO123456.json");
    }
}
