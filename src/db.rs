use std::{str::FromStr, time::Duration};

use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{res, AppError, AppResult};

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&db_pool).await?;
    Ok(db_pool)
}

/// Applies the embedded schema. Safe to run against an existing database.
pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(res::SCHEMA).execute(db_pool).await?;
    Ok(())
}

/// Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn parse_id(raw: &str) -> AppResult<Uuid> {
    Ok(Uuid::parse_str(raw)?)
}

/// Order-independent key for anything stored once per pair of duos.
///
/// `low < high` always holds, so `PairKey::new(a, b) == PairKey::new(b, a)`
/// and the unique index on `(duo_a, duo_b)` sees a single row per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PairKey {
    pub low: Uuid,
    pub high: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> AppResult<PairKey> {
        if a == b {
            return Err(AppError::validation("a duo cannot be paired with itself"));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(PairKey { low, high })
    }

    pub(crate) fn columns(&self) -> (String, String) {
        (self.low.to_string(), self.high.to_string())
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);

    // One connection: every connection to `:memory:` is its own database.
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    migrate(&db_pool).await.unwrap();
    db_pool
}

/// File-backed WAL pool with several connections, for tests that need
/// writers racing on the same rows. The database lives as long as the
/// returned directory.
#[cfg(test)]
pub(crate) async fn test_file_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("duomatch.db").display());
    let db_pool = connect(&url, 8).await.unwrap();
    (dir, db_pool)
}
