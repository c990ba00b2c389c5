use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::cache::ResponseCache;
use crate::error::PipelineError;
use crate::llm::LlmManager;
use crate::nlp::generator::Generation;
use crate::nlp::{
    Entity, EntityExtractor, IntentClassifier, QueryContext, QueryIntent, SqlGenerator, UserQuery,
};
use crate::query::models::{default_user, ExecuteRequest, QueryResult};
use crate::query::{QueryExecutor, QueryValidator, ValidationVerdict};
use crate::schema::SchemaManager;

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    pub schema_id: Option<String>,
    pub context: Option<QueryContext>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub query: UserQuery,
    pub sql_query: String,
    pub explanation: String,
    pub confidence: f64,
    pub suggested_modifications: Vec<String>,
    pub validation: ValidationVerdict,
    pub result: QueryResult,
}

/// Question in, recorded result out: schema, intent and entities, generation, admission,
/// execution, history.
pub struct QueryPipeline {
    schemas: Arc<SchemaManager>,
    intents: IntentClassifier,
    entities: EntityExtractor,
    generator: SqlGenerator,
    executor: Arc<QueryExecutor>,
    cache: Arc<ResponseCache>,
    llm: Arc<LlmManager>,
}

impl QueryPipeline {
    pub fn new(
        llm: Arc<LlmManager>,
        cache: Arc<ResponseCache>,
        schemas: Arc<SchemaManager>,
        executor: Arc<QueryExecutor>,
    ) -> Self {
        Self {
            intents: IntentClassifier::new(Arc::clone(&llm), Arc::clone(&cache)),
            entities: EntityExtractor::new(Arc::clone(&llm), Arc::clone(&cache)),
            generator: SqlGenerator::new(Arc::clone(&llm), Arc::clone(&cache)),
            schemas,
            executor,
            cache,
            llm,
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaManager> {
        &self.schemas
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn llm(&self) -> &Arc<LlmManager> {
        &self.llm
    }

    pub async fn parse_intent(&self, text: &str) -> QueryIntent {
        self.intents.classify(text).await
    }

    /// Schema context is best effort; without one only the completion service can help.
    pub async fn extract_entities(&self, text: &str, schema_id: Option<&str>) -> Vec<Entity> {
        let schema = self.schemas.resolve(schema_id).await.ok();
        self.entities.extract(text, schema.as_deref()).await
    }

    pub async fn generate_sql(
        &self,
        text: &str,
        schema_id: Option<&str>,
        context: Option<QueryContext>,
    ) -> Result<Generation, PipelineError> {
        let schema = self.schemas.resolve(schema_id).await?;
        let (intent, entities) = tokio::join!(
            self.intents.classify(text),
            self.entities.extract(text, Some(schema.as_ref()))
        );
        let query = UserQuery::new(text, context).with_analysis(intent, entities);
        self.generator.generate(&query, &schema).await
    }

    pub async fn validate(&self, sql: &str, schema_id: Option<&str>) -> ValidationVerdict {
        let schema = match schema_id {
            Some(_) => self.schemas.resolve(schema_id).await.ok(),
            None => None,
        };
        QueryValidator::validate(sql, schema.as_deref())
    }

    pub async fn execute(
        &self,
        request: ExecuteRequest,
        schema_id: Option<&str>,
    ) -> Result<QueryResult, PipelineError> {
        let schema = match schema_id {
            Some(_) => Some(self.schemas.resolve(schema_id).await?),
            None => None,
        };
        self.executor.execute(request, schema.as_deref()).await
    }

    #[instrument(skip(self, request), fields(user = %request.user_id, dry_run = request.dry_run))]
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse, PipelineError> {
        let schema = self.schemas.resolve(request.schema_id.as_deref()).await?;

        let (intent, entities) = tokio::join!(
            self.intents.classify(&request.query),
            self.entities.extract(&request.query, Some(schema.as_ref()))
        );
        let query = UserQuery::new(request.query, request.context).with_analysis(intent, entities);

        let generation = self.generator.generate(&query, &schema).await?;
        let query = query.attach_sql(&generation.sql);
        let validation = QueryValidator::validate(&generation.sql.sql, Some(schema.as_ref()));

        let result = self
            .executor
            .execute(
                ExecuteRequest {
                    sql: generation.sql.sql.clone(),
                    parameters: Vec::new(),
                    user_id: request.user_id,
                    dry_run: request.dry_run,
                },
                Some(schema.as_ref()),
            )
            .await?;

        info!(
            "Answered question {} with query {} ({} rows)",
            query.id, result.id, result.row_count
        );

        Ok(AskResponse {
            query,
            sql_query: generation.sql.sql,
            explanation: generation.sql.explanation,
            confidence: generation.sql.confidence,
            suggested_modifications: generation.suggested_modifications,
            validation,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionProvider;
    use crate::query::HistoryStore;
    use crate::testing::{CountingSource, ScriptedProvider, UnreachableProvider, SHOP_DDL};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        pipeline: QueryPipeline,
        source: Arc<CountingSource>,
        schema_id: String,
    }

    async fn harness(provider: Arc<dyn CompletionProvider>) -> Harness {
        let llm = Arc::new(LlmManager::with_provider(provider, Duration::from_millis(200)));
        let schemas = Arc::new(SchemaManager::new(None));
        let uploaded = schemas.upload(SHOP_DDL, Some("shop.sql")).await.unwrap();
        let source = Arc::new(CountingSource::with_rows(vec![json!({"count": 3})]));
        let executor = Arc::new(QueryExecutor::new(
            source.clone(),
            Arc::new(HistoryStore::new()),
            Duration::from_secs(1),
        ));
        Harness {
            pipeline: QueryPipeline::new(llm, Arc::new(ResponseCache::default()), schemas, executor),
            source,
            schema_id: uploaded.schema_id.unwrap(),
        }
    }

    fn ask(query: &str, dry_run: bool) -> AskRequest {
        AskRequest {
            query: query.to_string(),
            user_id: "ana".to_string(),
            schema_id: None,
            context: None,
            dry_run,
        }
    }

    #[tokio::test]
    async fn questions_run_end_to_end() {
        let provider = Arc::new(ScriptedProvider::always(
            r#"{"sql_query": "SELECT COUNT(*) AS count FROM orders;", "explanation": "Counts orders", "confidence": 0.9}"#,
        ));
        let harness = harness(provider.clone()).await;

        let response = harness.pipeline.ask(ask("count orders", false)).await.unwrap();

        assert_eq!(response.sql_query, "SELECT COUNT(*) AS count FROM orders;");
        assert!(response.validation.is_valid);
        assert_eq!(response.result.row_count, 1);
        assert!(
            response.query.generated_sql_id.is_some(),
            "generated SQL is attached to the question"
        );
        assert_eq!(harness.source.calls(), 1);
        assert_eq!(harness.pipeline.executor().history().count("ana").await, 1);
    }

    #[tokio::test]
    async fn dangerous_generations_are_stopped_at_the_gate() {
        let harness = harness(Arc::new(ScriptedProvider::always(
            r#"{"sql_query": "DELETE FROM orders;", "confidence": 0.9}"#,
        )))
        .await;

        let err = harness
            .pipeline
            .ask(ask("remove every order", false))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "policy_error");
        assert_eq!(harness.source.calls(), 0);
        assert_eq!(harness.pipeline.executor().history().count("ana").await, 1);
    }

    #[tokio::test]
    async fn generation_failures_propagate_without_execution() {
        let harness = harness(Arc::new(UnreachableProvider)).await;
        let err = harness.pipeline.ask(ask("show orders", true)).await.unwrap_err();
        assert_eq!(err.kind(), "generation_error");
        assert_eq!(harness.pipeline.executor().history().count("ana").await, 0);

        // intent and entities still answer through their fallbacks
        let intent = harness.pipeline.parse_intent("show orders").await;
        assert_eq!(intent.confidence, 0.7);
        let entities = harness
            .pipeline
            .extract_entities("show orders", Some(&harness.schema_id))
            .await;
        assert_eq!(entities[0].value, "orders");
    }

    #[tokio::test]
    async fn unknown_schema_ids_are_validation_errors() {
        let harness = harness(Arc::new(UnreachableProvider)).await;
        let mut request = ask("show orders", true);
        request.schema_id = Some("missing".to_string());
        let err = harness.pipeline.ask(request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
