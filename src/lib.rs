pub mod auth;
pub mod config;
pub mod error;
pub mod grading;
pub mod handlers;
pub mod models;
pub mod mysql_store;
pub mod participant;
pub mod reconcile;
pub mod results;
pub mod routes;
pub mod state;
pub mod store;

use auth::InMemoryRevocations;
use config::Config;
use mysql_store::MySqlStore;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the application state for `config`.
///
/// A reachable `DATABASE_URL` selects MySQL (migrations are applied on
/// connect); otherwise the in-memory store is used.
pub async fn build_state(config: Config) -> anyhow::Result<state::AppState> {
    if let Some(db_url) = config.database_url.as_deref() {
        match MySqlPoolOptions::new().max_connections(5).connect(db_url).await {
            Ok(pool) => {
                sqlx::migrate!("./migrations").run(&pool).await?;
                info!("mysql connected and migrations applied");
                let store = Arc::new(MySqlStore::new(pool));
                return Ok(state::AppState::new(store, Arc::new(InMemoryRevocations::new()), config));
            }
            Err(err) => {
                warn!(
                    "mysql is unavailable ({}), backend continues in local in-memory mode",
                    err
                );
            }
        }
    }
    Ok(state::AppState::in_memory(config))
}
