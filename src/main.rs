use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cache;
mod chat;
mod config;
mod db;
mod error;
mod llm;
mod nlp;
mod pipeline;
mod query;
mod schema;
mod suggestions;
mod util;
mod web;

#[cfg(test)]
mod testing;

use crate::cache::ResponseCache;
use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::llm::providers::offline::OfflineProvider;
use crate::llm::LlmManager;
use crate::query::{DuckDbSource, HistoryStore, QueryExecutor};
use crate::schema::SchemaManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_format);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Initializing DuckDB connection pool for {}",
        config.database.connection_string
    );
    let db_manager = DuckDBConnectionManager::new(config.database.connection_string.clone())?;
    if db_manager.is_in_memory() {
        warn!("Using an in-memory database; its contents are lost on exit");
    }
    let pool = Pool::builder()
        .max_size(config.database.pool_size.max(1) as u32)
        .build(db_manager)?;

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = match LlmManager::new(&config.llm) {
        Ok(manager) => manager,
        Err(e) => {
            warn!("LLM backend unavailable ({}); continuing offline", e);
            LlmManager::with_provider(Arc::new(OfflineProvider::new()), config.llm.timeout())
        }
    };

    let history = Arc::new(HistoryStore::new());
    let executor = Arc::new(QueryExecutor::new(
        Arc::new(DuckDbSource::new(pool.clone())),
        history,
        config.database.query_timeout(),
    ));

    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(llm_manager),
        Arc::new(ResponseCache::new(config.cache.ttl())),
        Arc::new(SchemaManager::new(Some(pool))),
        executor,
    ));

    // Start the web server
    info!("Starting askgate server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
