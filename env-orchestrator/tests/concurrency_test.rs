//! Concurrency tests on a file-backed database
//!
//! These use the production pool from `db::create_pool`, so spawned tasks
//! run on separate connections and contend for the SQLite write lock.

use env_orchestrator::db::{create_pool, run_migrations};
use env_orchestrator::{
    CreateEnvironmentRequest, DeploymentManager, Environment, EnvironmentManager,
    OrchestratorError, SessionManager, SessionState,
};
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

const CONTENDERS: usize = 8;

async fn file_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = create_pool(&dir.path().join("env.db"))
        .await
        .expect("Failed to create pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    (dir, pool)
}

async fn fixture_environment(pool: &SqlitePool, name: &str) -> Environment {
    EnvironmentManager::new(pool.clone())
        .create(
            CreateEnvironmentRequest {
                name: name.to_string(),
            },
            "tenant-a",
        )
        .await
        .expect("Failed to create environment")
}

fn tally<T>(results: &[Result<T, OrchestratorError>]) -> (usize, usize) {
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let forbidden = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::Forbidden(_))))
        .count();
    (ok, forbidden)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deploys_of_one_session() {
    let (_dir, pool) = file_db().await;
    let sessions = SessionManager::new(pool.clone());
    let env = fixture_environment(&pool, "race").await;
    let session = sessions.create(&env.id, "alice").await.unwrap();

    let handles: Vec<_> = (0..CONTENDERS)
        .map(|i| {
            let sessions = sessions.clone();
            let id = session.id.clone();
            tokio::spawn(async move { sessions.deploy(&id, &format!("token-{}", i)).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(tally(&results), (1, CONTENDERS - 1));
    assert_eq!(
        DeploymentManager::new(pool).list(&env.id).await.unwrap().len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deploys_of_distinct_sessions() {
    let (_dir, pool) = file_db().await;
    let sessions = SessionManager::new(pool.clone());
    let env = fixture_environment(&pool, "race").await;

    let mut ids = Vec::new();
    for i in 0..CONTENDERS {
        let session = sessions.create(&env.id, &format!("user-{}", i)).await.unwrap();
        ids.push(session.id);
    }

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.deploy(&id, "token").await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(tally(&results), (1, CONTENDERS - 1));

    let mut deploying = 0;
    for id in &ids {
        if sessions.get(id).await.unwrap().state == SessionState::Deploying {
            deploying += 1;
        }
    }
    assert_eq!(deploying, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_environment_delete_racing_deploy() {
    let (_dir, pool) = file_db().await;
    let environments = EnvironmentManager::new(pool.clone());
    let sessions = SessionManager::new(pool.clone());

    for round in 0..20 {
        let env = fixture_environment(&pool, &format!("round-{}", round)).await;
        let session = sessions.create(&env.id, "alice").await.unwrap();

        let delete = {
            let environments = environments.clone();
            let id = env.id.clone();
            tokio::spawn(async move { environments.delete(&id, "tenant-a").await })
        };
        let deploy = {
            let sessions = sessions.clone();
            let id = session.id.clone();
            tokio::spawn(async move { sessions.deploy(&id, "token").await })
        };

        let delete = delete.await.unwrap();
        let deploy = deploy.await.unwrap();

        match (&delete, &deploy) {
            // Delete went first; the session vanished with the environment
            (Ok(()), Err(OrchestratorError::NotFound(_) | OrchestratorError::Forbidden(_))) => {}
            // Deploy went first; the environment is locked
            (Err(OrchestratorError::Forbidden(_)), Ok(_)) => {}
            other => panic!("Round {}: unexpected outcome {:?}", round, other),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_description_edits_are_all_kept() {
    let (_dir, pool) = file_db().await;
    let sessions = SessionManager::new(pool.clone());
    let env = fixture_environment(&pool, "edits").await;
    let session = sessions.create(&env.id, "alice").await.unwrap();

    let handles: Vec<_> = (0..CONTENDERS)
        .map(|i| {
            let sessions = sessions.clone();
            let id = session.id.clone();
            tokio::spawn(async move {
                sessions
                    .set_path(&id, &format!("/Objects/field_{}", i), json!(i))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().expect("Edit failed");
    }

    let stored = sessions.get(&session.id).await.unwrap();
    for i in 0..CONTENDERS {
        assert_eq!(stored.description["Objects"][format!("field_{}", i)], json!(i));
    }
    assert_eq!(stored.description["Objects"]["name"], json!("edits"));
}
