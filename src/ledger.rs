//! Append-only record of one duo judging another.
//!
//! One row per ordered `(source, target)` pair. A different action for the
//! same pair replaces the old one, except that a matched pair can no longer
//! be downgraded to a dislike.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db, AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Like => "like",
            Action::Dislike => "dislike",
        }
    }

    fn parse(raw: &str) -> AppResult<Action> {
        match raw {
            "like" => Ok(Action::Like),
            "dislike" => Ok(Action::Dislike),
            other => Err(anyhow::anyhow!("unknown action {other:?} in ledger").into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// New row, or an existing row whose action changed.
    Written,
    /// The same action was already on file.
    Unchanged,
}

pub async fn record(
    db_pool: &SqlitePool,
    source_duo: Uuid,
    target_duo: Uuid,
    action: Action,
) -> AppResult<Recorded> {
    if source_duo == target_duo {
        return Err(AppError::validation("a duo cannot judge itself"));
    }
    let (low, high) = db::PairKey::new(source_duo, target_duo)?.columns();

    let result = sqlx::query(
        "INSERT INTO interactions (source_duo,target_duo,action,created_at) VALUES (?,?,?,?) \
         ON CONFLICT(source_duo,target_duo) DO UPDATE \
         SET action=excluded.action, created_at=excluded.created_at \
         WHERE interactions.action <> excluded.action \
         AND (excluded.action = 'like' \
              OR NOT EXISTS (SELECT 1 FROM matches WHERE duo_a=? AND duo_b=?))",
    )
    .bind(source_duo.to_string())
    .bind(target_duo.to_string())
    .bind(action.as_str())
    .bind(db::now_millis())
    .bind(low)
    .bind(high)
    .execute(db_pool)
    .await?;

    if result.rows_affected() > 0 {
        tracing::debug!(%source_duo, %target_duo, action = action.as_str(), "interaction recorded");
        return Ok(Recorded::Written);
    }

    match has(db_pool, source_duo, target_duo).await? {
        Some(existing) if existing == action => Ok(Recorded::Unchanged),
        _ => Err(AppError::validation("these duos have matched; a like can no longer be withdrawn")),
    }
}

pub async fn has(db_pool: &SqlitePool, source_duo: Uuid, target_duo: Uuid) -> AppResult<Option<Action>> {
    let action: Option<(String,)> =
        sqlx::query_as("SELECT action FROM interactions WHERE source_duo=? AND target_duo=?")
            .bind(source_duo.to_string())
            .bind(target_duo.to_string())
            .fetch_optional(db_pool)
            .await?;

    action.map(|(action,)| Action::parse(&action)).transpose()
}

/// Every duo `source_duo` has liked or disliked.
pub async fn interacted_targets(db_pool: &SqlitePool, source_duo: Uuid) -> AppResult<HashSet<Uuid>> {
    let targets: Vec<(String,)> = sqlx::query_as("SELECT target_duo FROM interactions WHERE source_duo=?")
        .bind(source_duo.to_string())
        .fetch_all(db_pool)
        .await?;

    targets.iter().map(|(target,)| db::parse_id(target)).collect()
}
