//! Integration tests for the session workflow over HTTP
//!
//! Tests configure, show, description editing, deploy and delete, and how
//! concurrent sessions on one environment interact.

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{create_test_db, extract_json_body, fixture_environment, identity, TestClient};
use env_api::AppState;
use env_orchestrator::{DeploymentEngine, DeploymentJob, NewStatus, StatusReporter};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Notify;

fn session_uri(env_id: &str, session_id: &str) -> String {
    format!("/api/v1/environments/{}/sessions/{}", env_id, session_id)
}

struct FailingEngine;

#[async_trait]
impl DeploymentEngine for FailingEngine {
    async fn apply(&self, _job: &DeploymentJob, reporter: &StatusReporter) -> anyhow::Result<()> {
        reporter
            .report(NewStatus::warning("Provisioning network"))
            .await?;
        anyhow::bail!("network unreachable")
    }
}

/// Engine that holds the deployment open until released
struct GatedEngine {
    release: Arc<Notify>,
}

#[async_trait]
impl DeploymentEngine for GatedEngine {
    async fn apply(&self, _job: &DeploymentJob, _reporter: &StatusReporter) -> anyhow::Result<()> {
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_configure_and_show_session() {
    let (client, pool) = TestClient::new_with_db().await;
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let alice = identity("tenant-a", "alice");

    let session_id = client.configure(&env.id, &alice).await;

    let response = client.get(&session_uri(&env.id, &session_id), &alice).await;
    assert_eq!(response.status(), StatusCode::OK);
    let session: Value = extract_json_body(response).await;
    assert_eq!(session["state"], "open");
    assert_eq!(session["version"], 0);
    assert_eq!(session["user_id"], "alice");
    assert!(session.get("description").is_none());

    // The working copy starts as the environment's description
    let response = client
        .get(
            &format!("{}/description?path=/Objects/name", session_uri(&env.id, &session_id)),
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let name: Value = extract_json_body(response).await;
    assert_eq!(name, json!("web"));
}

#[tokio::test]
async fn test_session_access_checks() {
    let (client, pool) = TestClient::new_with_db().await;
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let other = fixture_environment(&pool, "other", "tenant-a").await;
    let alice = identity("tenant-a", "alice");

    let session_id = client.configure(&env.id, &alice).await;

    // Another user of the same tenant
    let response = client
        .get(&session_uri(&env.id, &session_id), &identity("tenant-a", "bob"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Another tenant
    let response = client
        .get(&session_uri(&env.id, &session_id), &identity("tenant-b", "alice"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Accessed through the wrong environment
    let response = client.get(&session_uri(&other.id, &session_id), &alice).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get(&session_uri(&env.id, "missing"), &alice).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Configuring another tenant's environment
    let response = client
        .post(
            &format!("/api/v1/environments/{}/configure", env.id),
            &Value::Null,
            &identity("tenant-b", "mallory"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(
            "/api/v1/environments/missing/configure",
            &Value::Null,
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_edit_and_deploy_session() {
    let (client, pool) = TestClient::new_with_db().await;
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let alice = identity("tenant-a", "alice");
    let bob = identity("tenant-a", "bob");

    let session_id = client.configure(&env.id, &alice).await;
    let stale_id = client.configure(&env.id, &bob).await;

    let services = json!([{"?": {"id": "svc-1"}, "name": "apache"}]);
    let response = client
        .put(
            &format!(
                "{}/description?path=/Objects/services",
                session_uri(&env.id, &session_id)
            ),
            &services,
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(
            &format!("{}/deploy", session_uri(&env.id, &session_id)),
            &Value::Null,
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deployment: Value = extract_json_body(response).await;
    assert_eq!(deployment["session_id"], json!(session_id));
    assert_eq!(deployment["description"]["Objects"]["services"], services);

    let deployment_id = deployment["id"].as_str().unwrap();
    let finished = client
        .wait_for_deployment(&env.id, deployment_id, &alice)
        .await;
    assert_eq!(finished["result"], "success");

    let response = client
        .get(
            &format!(
                "/api/v1/environments/{}/deployments/{}/statuses",
                env.id, deployment_id
            ),
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let statuses: Vec<Value> = extract_json_body(response).await;
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[1]["entity"], "service");
    assert_eq!(statuses[1]["entity_id"], "svc-1");
    assert!(statuses.iter().all(|s| s["level"] == "info"));

    let response = client
        .get(&format!("/api/v1/environments/{}", env.id), &alice)
        .await;
    let environment: Value = extract_json_body(response).await;
    assert_eq!(environment["version"], 1);
    assert_eq!(environment["status"], "ready");
    assert_eq!(environment["services"], services);

    let response = client
        .get(&format!("/api/v1/environments/{}/deployments", env.id), &alice)
        .await;
    let deployments: Vec<Value> = extract_json_body(response).await;
    assert_eq!(deployments.len(), 1);

    // The deployed session is closed
    let response = client.get(&session_uri(&env.id, &session_id), &alice).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = client.delete(&session_uri(&env.id, &session_id), &alice).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Bob's session was opened against version 0 and is now stale
    let response = client.get(&session_uri(&env.id, &stale_id), &bob).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = client
        .post(
            &format!("{}/deploy", session_uri(&env.id, &stale_id)),
            &Value::Null,
            &bob,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = client
        .put(
            &format!("{}/description?path=/Objects/services", session_uri(&env.id, &stale_id)),
            &json!([]),
            &bob,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A stale session can still be discarded
    let response = client.delete(&session_uri(&env.id, &stale_id), &bob).await;
    assert_eq!(response.status(), StatusCode::OK);
    let deleted: Value = extract_json_body(response).await;
    assert_eq!(deleted["state"], "deleted");
}

#[tokio::test]
async fn test_any_tenant_user_may_deploy() {
    let (client, pool) = TestClient::new_with_db().await;
    let env = fixture_environment(&pool, "web", "tenant-a").await;

    let session_id = client
        .configure(&env.id, &identity("tenant-a", "alice"))
        .await;

    let deploy_uri = format!("{}/deploy", session_uri(&env.id, &session_id));
    let response = client
        .post(&deploy_uri, &Value::Null, &identity("tenant-b", "mallory"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post(&deploy_uri, &Value::Null, &identity("tenant-a", "bob"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_failed_deployment_is_recorded() {
    let pool = create_test_db().await;
    let client =
        TestClient::with_state(AppState::new(pool.clone()).with_engine(Arc::new(FailingEngine)));
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let alice = identity("tenant-a", "alice");

    let session_id = client.configure(&env.id, &alice).await;
    let response = client
        .post(
            &format!("{}/deploy", session_uri(&env.id, &session_id)),
            &Value::Null,
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deployment: Value = extract_json_body(response).await;
    let deployment_id = deployment["id"].as_str().unwrap();

    let finished = client
        .wait_for_deployment(&env.id, deployment_id, &alice)
        .await;
    assert_eq!(finished["result"], "failure");

    let response = client
        .get(
            &format!(
                "/api/v1/environments/{}/deployments/{}/statuses",
                env.id, deployment_id
            ),
            &alice,
        )
        .await;
    let statuses: Vec<Value> = extract_json_body(response).await;
    assert_eq!(statuses[1]["level"], "warning");
    let last = statuses.last().unwrap();
    assert_eq!(last["level"], "error");
    assert!(last["text"].as_str().unwrap().contains("network unreachable"));

    // A new session can be opened once the failed deployment is closed
    client.configure(&env.id, &alice).await;
}

#[tokio::test]
async fn test_environment_is_locked_while_deploying() {
    let pool = create_test_db().await;
    let release = Arc::new(Notify::new());
    let client = TestClient::with_state(AppState::new(pool.clone()).with_engine(Arc::new(
        GatedEngine {
            release: release.clone(),
        },
    )));
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let alice = identity("tenant-a", "alice");
    let env_uri = format!("/api/v1/environments/{}", env.id);

    let session_id = client.configure(&env.id, &alice).await;
    let response = client
        .post(
            &format!("{}/deploy", session_uri(&env.id, &session_id)),
            &Value::Null,
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deployment: Value = extract_json_body(response).await;

    let response = client.get(&env_uri, &alice).await;
    let environment: Value = extract_json_body(response).await;
    assert_eq!(environment["status"], "deploying");

    let response = client
        .post(&format!("{}/configure", env_uri), &Value::Null, &alice)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client.delete(&env_uri, &alice).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client.delete(&session_uri(&env.id, &session_id), &alice).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    release.notify_one();
    let finished = client
        .wait_for_deployment(&env.id, deployment["id"].as_str().unwrap(), &alice)
        .await;
    assert_eq!(finished["result"], "success");

    let response = client.get(&env_uri, &alice).await;
    let environment: Value = extract_json_body(response).await;
    assert_eq!(environment["status"], "ready");

    let response = client.delete(&env_uri, &alice).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_statuses_of_foreign_deployment_not_found() {
    let (client, pool) = TestClient::new_with_db().await;
    let env = fixture_environment(&pool, "web", "tenant-a").await;
    let other = fixture_environment(&pool, "other", "tenant-a").await;
    let alice = identity("tenant-a", "alice");

    let session_id = client.configure(&env.id, &alice).await;
    let response = client
        .post(
            &format!("{}/deploy", session_uri(&env.id, &session_id)),
            &Value::Null,
            &alice,
        )
        .await;
    let deployment: Value = extract_json_body(response).await;
    let deployment_id = deployment["id"].as_str().unwrap();

    let response = client
        .get(
            &format!(
                "/api/v1/environments/{}/deployments/{}/statuses",
                other.id, deployment_id
            ),
            &alice,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(
            &format!("/api/v1/environments/{}/deployments", env.id),
            &identity("tenant-b", "bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
