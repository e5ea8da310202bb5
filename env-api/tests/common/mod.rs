//! Common test utilities and helpers for env-api tests
//!
//! This module provides shared functionality for all test files to reduce code duplication
//! and improve maintainability of the test suite.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use env_api::{create_app_with_state, AppState};
use env_orchestrator::{CreateEnvironmentRequest, Environment, EnvironmentManager};
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

pub use env_orchestrator::test_utils::create_test_db;

/// Create a test app with the given database pool
pub async fn create_test_app(pool: SqlitePool) -> Router {
    env_api::create_app(pool)
        .await
        .expect("Failed to create test app")
}

/// Fixture: Create an environment directly through the orchestrator
pub async fn fixture_environment(pool: &SqlitePool, name: &str, tenant: &str) -> Environment {
    EnvironmentManager::new(pool.clone())
        .create(
            CreateEnvironmentRequest {
                name: name.to_string(),
            },
            tenant,
        )
        .await
        .expect("Failed to create fixture environment")
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// Identity headers as set by the authenticating proxy
pub fn identity<'a>(tenant: &'a str, user: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![
        ("x-tenant-id", tenant),
        ("x-user-id", user),
        ("x-auth-token", "test-token"),
    ]
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
}

impl TestClient {
    pub async fn new(pool: SqlitePool) -> Self {
        let app = create_test_app(pool).await;
        Self { app }
    }

    /// Create a client around prepared state (custom policy or engine)
    pub fn with_state(state: AppState) -> Self {
        Self {
            app: create_app_with_state(state),
        }
    }

    /// Create a new TestClient with a new in-memory DB
    pub async fn new_with_db() -> (Self, SqlitePool) {
        let pool = create_test_db().await;
        let client = Self::new(pool.clone()).await;
        (client, pool)
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        // Clone the app to allow reuse (Router is cheap to clone)
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.send("GET", uri, None, headers).await
    }

    pub async fn post(&self, uri: &str, body: &Value, headers: &[(&str, &str)]) -> Response<Body> {
        self.send("POST", uri, Some(body), headers).await
    }

    pub async fn put(&self, uri: &str, body: &Value, headers: &[(&str, &str)]) -> Response<Body> {
        self.send("PUT", uri, Some(body), headers).await
    }

    pub async fn delete(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.send("DELETE", uri, None, headers).await
    }

    /// Open a session on an environment and return its ID
    pub async fn configure(&self, env_id: &str, headers: &[(&str, &str)]) -> String {
        let response = self
            .post(
                &format!("/api/v1/environments/{}/configure", env_id),
                &Value::Null,
                headers,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let session: Value = extract_json_body(response).await;
        session["id"].as_str().unwrap().to_string()
    }

    /// Poll a deployment until the background engine has finished it
    pub async fn wait_for_deployment(
        &self,
        env_id: &str,
        deployment_id: &str,
        headers: &[(&str, &str)],
    ) -> Value {
        let uri = format!("/api/v1/environments/{}/deployments/{}", env_id, deployment_id);
        for _ in 0..100 {
            let response = self.get(&uri, headers).await;
            assert_eq!(response.status(), StatusCode::OK);

            let deployment: Value = extract_json_body(response).await;
            if !deployment["finished_at"].is_null() {
                return deployment;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Deployment {} did not finish", deployment_id);
    }
}
