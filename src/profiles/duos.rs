use axum::{debug_handler, extract::{Path, State}, Json};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{caller::Caller, AppResult};

use super::Duo;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn my_duos(
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<Vec<Duo>>> {
    Ok(Json(super::duos_of_user(&db_pool, caller.user_id()).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn duo_page(
    Path(duo_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    _caller: Caller,
) -> AppResult<Json<Duo>> {
    Ok(Json(super::duo(&db_pool, duo_id).await?))
}
