use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    caller::Caller,
    db::{self, PairKey},
    profiles::{self, Participant},
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub duos: PairKey,
    pub match_id: Option<Uuid>,
    pub name: String,
    pub participants: Vec<Participant>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct Ensured {
    pub room: ChatRoom,
    /// False when the room already existed.
    pub created: bool,
}

const ROOM_COLUMNS: &str =
    "id,duo_a,duo_b,match_id,name,participants,last_message,last_message_at,created_at";

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: String,
    duo_a: String,
    duo_b: String,
    match_id: Option<String>,
    name: String,
    participants: String,
    last_message: Option<String>,
    last_message_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<RoomRow> for ChatRoom {
    type Error = AppError;

    fn try_from(row: RoomRow) -> AppResult<ChatRoom> {
        Ok(ChatRoom {
            id: db::parse_id(&row.id)?,
            duos: PairKey::new(db::parse_id(&row.duo_a)?, db::parse_id(&row.duo_b)?)?,
            match_id: row.match_id.as_deref().map(db::parse_id).transpose()?,
            name: row.name,
            participants: serde_json::from_str(&row.participants)?,
            last_message: row.last_message,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        })
    }
}

/// Returns the single room for the pair, creating it if needed.
///
/// Concurrent callers race on the unique `(duo_a, duo_b)` index; the loser's
/// insert is ignored and both read back the same row.
pub async fn ensure_room(
    db_pool: &SqlitePool,
    duo: Uuid,
    other_duo: Uuid,
    match_id: Option<Uuid>,
) -> AppResult<Ensured> {
    let key = PairKey::new(duo, other_duo)?;
    let low = profiles::duo(db_pool, key.low).await?;
    let high = profiles::duo(db_pool, key.high).await?;
    let participants = profiles::participants(db_pool, &[&low, &high]).await?;
    let (duo_a, duo_b) = key.columns();

    let result = sqlx::query(
        "INSERT INTO chat_rooms (id,duo_a,duo_b,match_id,name,participants,created_at) \
         VALUES (?,?,?,?,?,?,?) ON CONFLICT(duo_a,duo_b) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(&duo_a)
    .bind(&duo_b)
    .bind(match_id.map(|id| id.to_string()))
    .bind(format!("{} & {}", low.title, high.title))
    .bind(serde_json::to_string(&participants)?)
    .bind(db::now_millis())
    .execute(db_pool)
    .await?;
    let created = result.rows_affected() > 0;

    if let (Some(match_id), false) = (match_id, created) {
        sqlx::query("UPDATE chat_rooms SET match_id=? WHERE duo_a=? AND duo_b=? AND match_id IS NULL")
            .bind(match_id.to_string())
            .bind(&duo_a)
            .bind(&duo_b)
            .execute(db_pool)
            .await?;
    }

    let room = room_for_pair(db_pool, key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("room for {duo_a}/{duo_b} vanished after upsert"))?;

    if created {
        tracing::info!(room_id = %room.id, %duo_a, %duo_b, "chat room created");
    }
    Ok(Ensured { room, created })
}

pub async fn room_for_pair(db_pool: &SqlitePool, key: PairKey) -> AppResult<Option<ChatRoom>> {
    let (duo_a, duo_b) = key.columns();
    sqlx::query_as::<_, RoomRow>(&format!(
        "SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE duo_a=? AND duo_b=?"
    ))
    .bind(duo_a)
    .bind(duo_b)
    .fetch_optional(db_pool)
    .await?
    .map(ChatRoom::try_from)
    .transpose()
}

pub async fn room(db_pool: &SqlitePool, room_id: Uuid) -> AppResult<ChatRoom> {
    sqlx::query_as::<_, RoomRow>(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id=?"))
        .bind(room_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("room {room_id}")))?
        .try_into()
}

/// Rooms of every duo `user_id` belongs to, most recently active first.
pub async fn rooms_for_user(db_pool: &SqlitePool, user_id: &str) -> AppResult<Vec<ChatRoom>> {
    sqlx::query_as::<_, RoomRow>(&format!(
        "SELECT {ROOM_COLUMNS} FROM chat_rooms \
         WHERE duo_a IN (SELECT id FROM duos WHERE member1=?1 OR member2=?1) \
            OR duo_b IN (SELECT id FROM duos WHERE member1=?1 OR member2=?1) \
         ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(db_pool)
    .await?
    .into_iter()
    .map(ChatRoom::try_from)
    .collect()
}

/// Members of either attached duo may read and post.
pub async fn authorize(db_pool: &SqlitePool, room: &ChatRoom, user_id: &str) -> AppResult<()> {
    for duo_id in [room.duos.low, room.duos.high] {
        if profiles::duo(db_pool, duo_id).await?.is_member(user_id) {
            return Ok(());
        }
    }
    Err(AppError::denied(format!("not a participant of room {}", room.id)))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<ChatRoom>> {
    let room = room(&db_pool, room_id).await?;
    authorize(&db_pool, &room, caller.user_id()).await?;
    Ok(Json(room))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn my_rooms(
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<Vec<ChatRoom>>> {
    Ok(Json(rooms_for_user(&db_pool, caller.user_id()).await?))
}
