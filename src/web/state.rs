use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::chat::ChatAssistant;
use crate::config::AppConfig;
use crate::llm::LlmManager;
use crate::pipeline::QueryPipeline;
use crate::query::{HistoryStore, QueryExecutor};
use crate::schema::SchemaManager;
use crate::suggestions::SuggestionEngine;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: QueryPipeline,
    pub suggestions: SuggestionEngine,
    pub chat: ChatAssistant,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Every store is built by the caller and handed in, so tests can swap any of them.
    pub fn new(
        config: AppConfig,
        llm: Arc<LlmManager>,
        cache: Arc<ResponseCache>,
        schemas: Arc<SchemaManager>,
        executor: Arc<QueryExecutor>,
    ) -> Self {
        Self {
            config,
            pipeline: QueryPipeline::new(llm, cache, schemas, executor),
            suggestions: SuggestionEngine::new(),
            chat: ChatAssistant::new(),
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn schemas(&self) -> &SchemaManager {
        self.pipeline.schemas()
    }

    pub fn history(&self) -> &HistoryStore {
        self.pipeline.executor().history()
    }

    pub fn cache(&self) -> &ResponseCache {
        self.pipeline.cache()
    }
}
