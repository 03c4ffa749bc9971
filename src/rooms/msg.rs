use axum::{debug_handler, extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    caller::Caller,
    config::Config,
    db,
    profiles,
    topics::{Event, Hub, Topic},
    AppError, AppResult,
};

use super::{group, room};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    /// Insertion sequence; breaks ties between equal `created_at`.
    pub seq: i64,
    pub room_id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
}

const MESSAGE_COLUMNS: &str = "seq,id,room_id,sender_id,sender_name,content,created_at";

#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    room_id: String,
    sender_id: String,
    sender_name: String,
    content: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> AppResult<Message> {
        Ok(Message {
            id: db::parse_id(&row.id)?,
            seq: row.seq,
            room_id: db::parse_id(&row.room_id)?,
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

/// Stores a message and publishes it to the room's subscribers.
///
/// Writes to one room are sequenced: the insert, the `last_message` cache
/// update and the publish happen under the room's lock, and `created_at`
/// never goes below the room's latest message. History order and live
/// order are therefore the same.
pub async fn append(
    db_pool: &SqlitePool,
    hub: &Hub,
    room_id: Uuid,
    sender_id: &str,
    content: &str,
    max_len: usize,
) -> AppResult<Message> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::validation("message is empty"));
    }
    if content.chars().count() > max_len {
        return Err(AppError::validation(format!("message is longer than {max_len} characters")));
    }

    let room = room::room(db_pool, room_id).await?;
    room::authorize(db_pool, &room, sender_id).await?;
    let sender_name = profiles::user_name(db_pool, sender_id).await?;

    let topic = Topic::Room(room_id);
    let sequencer = hub.sequencer(topic);
    let turn = sequencer.lock().await;
    let stored = store_and_publish(db_pool, hub, room_id, sender_id, sender_name, content).await;
    drop(turn);
    drop(sequencer);
    hub.release(topic);

    let message = stored?;
    tracing::debug!(%room_id, seq = message.seq, "message appended");
    Ok(message)
}

/// Runs under the room's sequencer.
async fn store_and_publish(
    db_pool: &SqlitePool,
    hub: &Hub,
    room_id: Uuid,
    sender_id: &str,
    sender_name: String,
    content: &str,
) -> AppResult<Message> {
    let id = Uuid::now_v7();
    let mut tx = db_pool.begin().await?;
    let (seq, created_at): (i64, i64) = sqlx::query_as(
        "INSERT INTO messages (id,room_id,sender_id,sender_name,content,created_at) \
         VALUES (?,?,?,?,?, MAX(?, COALESCE((SELECT MAX(created_at) FROM messages WHERE room_id=?), 0))) \
         RETURNING seq,created_at",
    )
    .bind(id.to_string())
    .bind(room_id.to_string())
    .bind(sender_id)
    .bind(&sender_name)
    .bind(content)
    .bind(db::now_millis())
    .bind(room_id.to_string())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE chat_rooms SET last_message=?, last_message_at=? WHERE id=?")
        .bind(content)
        .bind(created_at)
        .bind(room_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let message = Message {
        id,
        seq,
        room_id,
        sender_id: sender_id.to_owned(),
        sender_name,
        content: content.to_owned(),
        created_at,
    };
    let delivered = hub.publish(Topic::Room(room_id), Event::MessageAppended(message.clone()));
    tracing::trace!(%room_id, seq, delivered, "message published");

    Ok(message)
}

/// All messages of a room, oldest first.
pub async fn history(db_pool: &SqlitePool, room_id: Uuid) -> AppResult<Vec<Message>> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? ORDER BY created_at, seq"
    ))
    .bind(room_id.to_string())
    .fetch_all(db_pool)
    .await?
    .into_iter()
    .map(Message::try_from)
    .collect()
}

/// Messages appended after the one with sequence `after_seq`, in append order.
pub(crate) async fn since(db_pool: &SqlitePool, room_id: Uuid, after_seq: i64) -> AppResult<Vec<Message>> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? AND seq>? ORDER BY seq"
    ))
    .bind(room_id.to_string())
    .bind(after_seq)
    .fetch_all(db_pool)
    .await?
    .into_iter()
    .map(Message::try_from)
    .collect()
}

pub(crate) async fn latest_seq(db_pool: &SqlitePool, room_id: Uuid) -> AppResult<i64> {
    let (seq,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM messages WHERE room_id=?")
        .bind(room_id.to_string())
        .fetch_one(db_pool)
        .await?;
    Ok(seq)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_msg(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    State(config): State<Config>,
    caller: Caller,
    Json(SendMessageQuery { content }): Json<SendMessageQuery>,
) -> AppResult<Json<Message>> {
    let message = append(&db_pool, &hub, room_id, caller.user_id(), &content, config.max_message_len).await?;
    Ok(Json(message))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_msgs(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<Vec<Message>>> {
    let room = room::room(&db_pool, room_id).await?;
    room::authorize(&db_pool, &room, caller.user_id()).await?;
    Ok(Json(history(&db_pool, room_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn grouped_msgs(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<Vec<Vec<Message>>>> {
    let room = room::room(&db_pool, room_id).await?;
    room::authorize(&db_pool, &room, caller.user_id()).await?;

    let messages = history(&db_pool, room_id).await?;
    let groups = group::group_bursts(&messages, group::BURST_GAP)
        .into_iter()
        .map(<[Message]>::to_vec)
        .collect();
    Ok(Json(groups))
}
