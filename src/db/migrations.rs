//! Opening the ledger database and applying its schema.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// Applied to every pooled connection before first use.
const CONNECTION_PRAGMAS: [&str; 3] = [
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

/// Open (creating if needed) the SQLite database and bring its schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).ok();
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { prepare_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    let statements = apply_schema(&pool).await?;
    info!(path = %db_path, statements, "Ledger database ready");
    Ok(pool)
}

/// Every statement in `schema.sql` is `IF NOT EXISTS`; reapplying is a no-op.
async fn apply_schema(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements: Vec<&str> = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(statements.len())
}

async fn prepare_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    // WAL reports the mode it actually got; some filesystems refuse it.
    let mode: String = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    debug!(journal_mode = %mode, "SQLite connection opened");

    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(temp_dir: &TempDir) -> (SqlitePool, String) {
        let db_path = temp_dir
            .path()
            .join("state")
            .join("ledger.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, db_path)
    }

    async fn insert_record(pool: &SqlitePool, agent: &str, cycle: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO decision_records \
             (agent_id, cycle_number, time_ms, rationale, notes_json, created_at) \
             VALUES (?, ?, 0, '', '[]', 0)",
        )
        .bind(agent)
        .bind(cycle)
        .execute(pool)
        .await
        .map(|_| ())
    }

    async fn insert_action(pool: &SqlitePool, key: &str, agent: &str, cycle: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO trade_actions \
             (action_key, agent_id, cycle_number, seq, instrument, kind, price, quantity, \
              leverage, time_ms, confidence) \
             VALUES (?, ?, ?, 0, 'BTCUSDT', 'open_long', '60000', '1', 10, 0, 50)",
        )
        .bind(key)
        .bind(agent)
        .bind(cycle)
        .execute(pool)
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn test_one_record_per_agent_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, db_path) = open(&temp_dir).await;
        assert!(Path::new(&db_path).exists());

        insert_record(&pool, "alpha", 1).await.unwrap();
        insert_record(&pool, "beta", 1).await.unwrap();
        assert!(insert_record(&pool, "alpha", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_actions_need_their_record() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, _) = open(&temp_dir).await;

        assert!(insert_action(&pool, "k1", "alpha", 1).await.is_err());

        insert_record(&pool, "alpha", 1).await.unwrap();
        insert_action(&pool, "k1", "alpha", 1).await.unwrap();
        // Action keys are the idempotency key.
        assert!(insert_action(&pool, "k1", "alpha", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, db_path) = open(&temp_dir).await;
        insert_record(&pool, "alpha", 7).await.unwrap();
        assert_eq!(apply_schema(&pool).await.unwrap(), 4);
        pool.close().await;

        let reopened = init_db(&db_path).await.expect("reopen failed");
        let (cycle,): (i64,) = sqlx::query_as(
            "SELECT cycle_number FROM decision_records WHERE agent_id = 'alpha'",
        )
        .fetch_one(&reopened)
        .await
        .unwrap();
        assert_eq!(cycle, 7);

        let (indexes,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
        )
        .fetch_one(&reopened)
        .await
        .unwrap();
        assert_eq!(indexes, 2);
    }
}
