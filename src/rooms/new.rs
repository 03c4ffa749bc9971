use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{caller::Caller, profiles, AppResult};

use super::{room, ChatRoom};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    duo: Uuid,
    other_duo: Uuid,
}

/// "Message this duo": opens (or reopens) the pair's room without a match.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    caller: Caller,

    Json(NewRoomQuery { duo, other_duo }): Json<NewRoomQuery>,
) -> AppResult<Json<ChatRoom>> {
    profiles::duo(&db_pool, duo).await?.require_member(caller.user_id())?;

    let ensured = room::ensure_room(&db_pool, duo, other_duo, None).await?;
    Ok(Json(ensured.room))
}
