use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// Liveness probe, outside the API prefix
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(handlers::api::health))
}

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Schema management
            .route("/schema/upload", post(handlers::api::upload_schema))
            .route("/schema/info", get(handlers::api::schema_info))

            // Natural language analysis
            .route("/nlp/parse-intent", post(handlers::api::parse_intent))
            .route("/nlp/extract-entities", post(handlers::api::extract_entities))
            .route("/nlp/generate-sql", post(handlers::api::generate_sql))
            .route("/ask", post(handlers::api::ask))

            // Query endpoints
            .route("/query/execute", post(handlers::api::execute_query))
            .route("/query/validate", post(handlers::api::validate_query))
            .route("/query/history", get(handlers::api::query_history))

            // Assistance and maintenance
            .route("/suggestions", post(handlers::api::suggestions))
            .route("/chat/message", post(handlers::api::chat_message))
            .route("/chat/conversation", get(handlers::api::chat_conversation))
            .route("/cache/clear", post(handlers::api::clear_cache))

            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
