//! Swiping: the interaction ledger's HTTP face, mutual-like detection and
//! the candidate deck.

mod candidates;
mod interaction;
mod resolver;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use candidates::{candidates, Candidate, CandidateQuery, DuoSummary};
pub use interaction::{interact, InteractionResponse};
pub use resolver::{consider_match, match_for_pair, matches_for, Match, MatchOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/interactions", post(interaction::post_interaction))
        .route("/candidates", get(interaction::get_candidates))
        .route("/matches", get(interaction::get_matches))
        .route("/matches/{uuid}/ws", get(interaction::duo_ws))
}
