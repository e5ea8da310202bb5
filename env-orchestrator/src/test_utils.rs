use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Helper to create an in-memory test database with migrations applied
///
/// A single connection keeps every query on the same in-memory database and
/// serializes concurrent transactions.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    // The path is relative to the crate root: env-orchestrator/migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}
