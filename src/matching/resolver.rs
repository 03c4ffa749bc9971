use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{self, PairKey},
    rooms::{self, ChatRoom},
    topics::{Event, Hub, MatchEvent, Topic},
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: Uuid,
    pub duos: PairKey,
    pub matched_at: i64,
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    NoMatch,
    /// This call inserted the match row.
    Created { matched: Match, room: ChatRoom },
    /// Another call (or an earlier attempt of this one) got there first.
    Existing { matched: Match, room: ChatRoom },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchOutcome::NoMatch)
    }
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: String,
    duo_a: String,
    duo_b: String,
    matched_at: i64,
}

impl TryFrom<MatchRow> for Match {
    type Error = AppError;

    fn try_from(row: MatchRow) -> AppResult<Match> {
        Ok(Match {
            id: db::parse_id(&row.id)?,
            duos: PairKey::new(db::parse_id(&row.duo_a)?, db::parse_id(&row.duo_b)?)?,
            matched_at: row.matched_at,
        })
    }
}

/// Runs after `source_duo` liked `target_duo`.
///
/// The match row is created by a single insert that both checks the two
/// likes and is guarded by the unique `(duo_a, duo_b)` index. A concurrent
/// downgrade to a dislike therefore either lands before it (no match) or is
/// refused by the ledger after it, and both sides liking at once still
/// leaves one row; whichever insert loses sees `Existing`. The room is
/// ensured on every resolved match so that a retried call still converges
/// on one room, while the `MatchCreated` event goes out only from the call
/// that created it.
pub async fn consider_match(
    db_pool: &SqlitePool,
    hub: &Hub,
    source_duo: Uuid,
    target_duo: Uuid,
) -> AppResult<MatchOutcome> {
    let key = PairKey::new(source_duo, target_duo)?;
    let (duo_a, duo_b) = key.columns();

    let result = sqlx::query(
        "INSERT INTO matches (id,duo_a,duo_b,matched_at) SELECT ?1,?2,?3,?4 \
         WHERE EXISTS (SELECT 1 FROM interactions WHERE source_duo=?2 AND target_duo=?3 AND action='like') \
         AND EXISTS (SELECT 1 FROM interactions WHERE source_duo=?3 AND target_duo=?2 AND action='like') \
         ON CONFLICT(duo_a,duo_b) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(&duo_a)
    .bind(&duo_b)
    .bind(db::now_millis())
    .execute(db_pool)
    .await?;
    let created = result.rows_affected() > 0;

    let Some(matched) = match_for_pair(db_pool, key).await? else {
        return Ok(MatchOutcome::NoMatch);
    };
    let room = rooms::ensure_room(db_pool, key.low, key.high, Some(matched.id)).await?.room;

    if !created {
        return Ok(MatchOutcome::Existing { matched, room });
    }

    tracing::info!(match_id = %matched.id, %duo_a, %duo_b, room_id = %room.id, "duos matched");
    let event = Event::MatchCreated(MatchEvent {
        match_id: matched.id,
        duos: key,
        room_id: room.id,
        matched_at: matched.matched_at,
    });
    for topic in [Topic::Duo(key.low), Topic::Duo(key.high), Topic::Room(room.id)] {
        hub.publish(topic, event.clone());
    }

    Ok(MatchOutcome::Created { matched, room })
}

pub async fn match_for_pair(db_pool: &SqlitePool, key: PairKey) -> AppResult<Option<Match>> {
    let (duo_a, duo_b) = key.columns();
    sqlx::query_as::<_, MatchRow>("SELECT id,duo_a,duo_b,matched_at FROM matches WHERE duo_a=? AND duo_b=?")
        .bind(duo_a)
        .bind(duo_b)
        .fetch_optional(db_pool)
        .await?
        .map(Match::try_from)
        .transpose()
}

/// A duo's matches, newest first.
pub async fn matches_for(db_pool: &SqlitePool, duo_id: Uuid) -> AppResult<Vec<Match>> {
    sqlx::query_as::<_, MatchRow>(
        "SELECT id,duo_a,duo_b,matched_at FROM matches WHERE duo_a=?1 OR duo_b=?1 \
         ORDER BY matched_at DESC, id DESC",
    )
    .bind(duo_id.to_string())
    .fetch_all(db_pool)
    .await?
    .into_iter()
    .map(Match::try_from)
    .collect()
}
