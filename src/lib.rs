pub mod appresult;
pub mod caller;
pub mod config;
pub mod db;
pub mod geo;
pub mod ledger;
pub mod matching;
pub mod profiles;
pub mod res;
pub mod rooms;
pub mod topics;

#[cfg(test)]
mod fixtures;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};

use config::Config;
use topics::Hub;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: Hub,
    pub config: Config,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> AppState {
        AppState {
            db_pool,
            hub: Hub::new(config.topic_capacity),
            config,
        }
    }
}
