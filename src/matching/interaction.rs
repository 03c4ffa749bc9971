use axum::{
    debug_handler,
    extract::{ws::{Message as Frame, WebSocketUpgrade}, Path, Query, State},
    response::Response,
    Json,
};
use futures_util::{SinkExt, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    caller::Caller,
    config::Config,
    ledger::{self, Action},
    profiles,
    rooms::ChatRoom,
    topics::{Hub, Topic},
    AppResult,
};

use super::{
    candidates::{self, CandidateQuery, DuoSummary},
    resolver::{self, Match, MatchOutcome},
};

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionQuery {
    source_duo: Uuid,
    target_duo: Uuid,
    action: Action,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionResponse {
    pub matched: bool,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched_with: Option<Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<ChatRoom>,
}

/// Records `user_id`'s judgement on behalf of `source_duo` and, for a like,
/// checks whether it completes a match.
pub async fn interact(
    db_pool: &SqlitePool,
    hub: &Hub,
    user_id: &str,
    source_duo: Uuid,
    target_duo: Uuid,
    action: Action,
) -> AppResult<InteractionResponse> {
    profiles::duo(db_pool, source_duo).await?.require_member(user_id)?;
    profiles::duo(db_pool, target_duo).await?;
    ledger::record(db_pool, source_duo, target_duo, action).await?;

    let outcome = match action {
        Action::Like => resolver::consider_match(db_pool, hub, source_duo, target_duo).await?,
        Action::Dislike => MatchOutcome::NoMatch,
    };

    Ok(match outcome {
        MatchOutcome::NoMatch => InteractionResponse { matched: false, matched_with: None, room: None },
        MatchOutcome::Created { matched, room } | MatchOutcome::Existing { matched, room } => {
            InteractionResponse { matched: true, matched_with: Some(matched), room: Some(room) }
        }
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn post_interaction(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    caller: Caller,

    Json(InteractionQuery { source_duo, target_duo, action }): Json<InteractionQuery>,
) -> AppResult<Json<InteractionResponse>> {
    let response = interact(&db_pool, &hub, caller.user_id(), source_duo, target_duo, action).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidatesQuery {
    duo: Uuid,
    radius_km: Option<f64>,
    limit: Option<usize>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_candidates(
    Query(CandidatesQuery { duo, radius_km, limit }): Query<CandidatesQuery>,
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    caller: Caller,
) -> AppResult<Json<Vec<DuoSummary>>> {
    profiles::duo(&db_pool, duo).await?.require_member(caller.user_id())?;

    let query = CandidateQuery {
        radius_km: radius_km.or(config.candidate_radius_km),
        limit,
    };
    let summaries: Vec<DuoSummary> = candidates::candidates(&db_pool, duo, query)
        .await?
        .map_ok(DuoSummary::from)
        .try_collect()
        .await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatchesQuery {
    duo: Uuid,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_matches(
    Query(MatchesQuery { duo }): Query<MatchesQuery>,
    State(db_pool): State<SqlitePool>,
    caller: Caller,
) -> AppResult<Json<Vec<Match>>> {
    profiles::duo(&db_pool, duo).await?.require_member(caller.user_id())?;
    Ok(Json(resolver::matches_for(&db_pool, duo).await?))
}

/// Pushes `MatchCreated` events for one of the caller's duos.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn duo_ws(
    Path(duo_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Hub>,
    caller: Caller,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    profiles::duo(&db_pool, duo_id).await?.require_member(caller.user_id())?;
    let mut rx = hub.subscribe(Topic::Duo(duo_id));

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut broadcast_task = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%duo_id, skipped, "duo subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if sender.send(Frame::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        // Inbound frames are ignored; the loop only watches for the close.
        loop {
            tokio::select! {
                _ = &mut broadcast_task => break,
                frame = receiver.next() => match frame {
                    Some(Ok(Frame::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                },
            }
        }

        broadcast_task.abort();
    }))
}
