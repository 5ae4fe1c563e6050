/// Common test utilities for integration tests
///
/// This module provides shared infrastructure for integration tests:
/// - A router over a fresh in-memory Record Store
/// - Request helpers returning status and parsed JSON body

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::Service as _;
use usrd_api::app::{build_router, AppState};
use usrd_api::config::{ApiConfig, Config, StoreBackend};
use usrd_shared::store::MemoryStore;
use usrd_shared::users::UserService;

/// Test context containing all necessary resources
pub struct TestContext {
    pub app: axum::Router,
    pub store: Arc<MemoryStore>,
    pub shutdown: CancellationToken,
}

impl TestContext {
    /// Creates a new test context with an empty store
    pub fn new() -> Self {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec!["*".to_string()],
            },
            store: StoreBackend::Memory,
            database: None,
        };

        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let state = AppState::new(UserService::new(store.clone()), config, shutdown.clone());

        Self {
            app: build_router(state),
            store,
            shutdown,
        }
    }

    /// Sends a request and returns the status with the JSON body (Null if empty)
    pub async fn send(&mut self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.call(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                panic!("Non-JSON body for {} {}: {}", method, uri, String::from_utf8_lossy(&bytes))
            })
        };

        (status, json)
    }

    pub async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body)).await
    }

    pub async fn put(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("PUT", uri, Some(body)).await
    }

    pub async fn patch(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("PATCH", uri, Some(body)).await
    }

    pub async fn delete(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send("DELETE", uri, None).await
    }

    /// Creates a user and returns its id
    pub async fn create_user(&mut self, body: Value) -> i64 {
        let (status, json) = self.post("/system/users", body).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", json);
        json["user"]["id"].as_i64().unwrap()
    }
}
