//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `records.rs` - decision records and their trade actions

mod records;

use sqlx::sqlite::SqlitePool;

pub use records::StoredRecord;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe for readiness checks.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
