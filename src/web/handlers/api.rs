use axum::{
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStats;
use crate::chat::{ChatReply, Conversation};
use crate::error::PipelineError;
use crate::nlp::{EntityType, QueryContext};
use crate::pipeline::{AskRequest, AskResponse};
use crate::query::executor::EXECUTION_FAILED_MESSAGE;
use crate::query::history::DEFAULT_HISTORY_LIMIT;
use crate::query::models::{
    default_user, ColumnDescriptor, ErrorEnvelope, ExecuteRequest, HistoryRecord, QueryStatus,
    ResultMetadata,
};
use crate::query::ValidationVerdict;
use crate::schema::{SchemaInfo, SchemaUploadResponse};
use crate::suggestions::Suggestion;
use crate::web::state::AppState;

// Errors

/// Pipeline failures rendered as `{error, message}` with a status per failure kind.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError(PipelineError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Policy(_) => StatusCode::FORBIDDEN,
            PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            PipelineError::Execution(detail) => {
                error!("Execution fault: {}", detail);
                EXECUTION_FAILED_MESSAGE.to_string()
            }
            PipelineError::Validation(msg)
            | PipelineError::Policy(msg)
            | PipelineError::Generation(msg)
            | PipelineError::Timeout(msg) => {
                warn!("Request failed with {}: {}", self.0.kind(), msg);
                msg.clone()
            }
        };

        (
            status,
            Json(json!({
                "error": self.0.kind(),
                "message": message,
            })),
        )
            .into_response()
    }
}

fn require_query(query: &str) -> Result<(), ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::bad_request("Query must not be empty"));
    }
    Ok(())
}

// Request and response types

#[derive(Debug, Deserialize)]
pub struct SchemaInfoParams {
    pub schema_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextQueryRequest {
    pub query: String,
    pub schema_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub intent: String,
    pub confidence: f64,
    pub explanation: String,
}

#[derive(Debug, Serialize)]
pub struct EntityView {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: f64,
    pub position: [usize; 2],
}

#[derive(Debug, Serialize)]
pub struct EntitiesResponse {
    pub entities: Vec<EntityView>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateSqlRequest {
    pub query: String,
    pub schema_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
    pub context: Option<QueryContext>,
}

impl GenerateSqlRequest {
    /// Folds the flat history and preferences fields into one context.
    fn context(&mut self) -> Option<QueryContext> {
        let mut context = self.context.take().unwrap_or_default();
        context
            .previous_queries
            .extend(self.conversation_history.drain(..));
        context.preferences.append(&mut self.preferences);
        (!context.is_empty()).then_some(context)
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateSqlResponse {
    pub sql_query: String,
    pub explanation: String,
    pub confidence: f64,
    pub suggested_modifications: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    #[serde(flatten)]
    pub request: ExecuteRequest,
    pub schema_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteQueryResponse {
    pub success: bool,
    pub data: Vec<Value>,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: usize,
    pub execution_time: f64,
    pub query_id: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    pub metadata: Option<ResultMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateQueryRequest {
    #[serde(alias = "sql")]
    pub sql_query: String,
    pub schema_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Deserialize)]
pub struct SuggestionsRequest {
    pub partial_query: String,
    pub schema_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub schema_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<Suggestion>,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub schema_count: usize,
    pub history_records: usize,
    pub cache: CacheStats,
    pub llm_backend: String,
    pub llm_available: bool,
}

// Schema

/// Accepts either a multipart form with a `file` field or the DDL text as the raw body.
pub async fn upload_schema(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<SchemaUploadResponse>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let (ddl, filename) = if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        read_file_field(&mut multipart).await?
    } else {
        let body = String::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        (body, None)
    };

    info!(
        "Uploading schema {} ({} bytes)",
        filename.as_deref().unwrap_or("<body>"),
        ddl.len()
    );
    let response = state.schemas().upload(&ddl, filename.as_deref()).await?;
    Ok(Json(response))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Option<String>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let text = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        return Ok((text, filename));
    }
    Err(ApiError::bad_request("Missing multipart field 'file'"))
}

pub async fn schema_info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SchemaInfoParams>,
) -> Result<Json<SchemaInfo>, ApiError> {
    let info = state.schemas().info(params.schema_id.as_deref()).await?;
    Ok(Json(info))
}

// Natural language

pub async fn parse_intent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TextQueryRequest>,
) -> Result<Json<IntentResponse>, ApiError> {
    require_query(&payload.query)?;
    let intent = state.pipeline.parse_intent(&payload.query).await;
    Ok(Json(IntentResponse {
        intent: intent.intent_type.to_string(),
        confidence: intent.confidence,
        explanation: intent.description,
    }))
}

pub async fn extract_entities(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TextQueryRequest>,
) -> Result<Json<EntitiesResponse>, ApiError> {
    require_query(&payload.query)?;
    let entities = state
        .pipeline
        .extract_entities(&payload.query, payload.schema_id.as_deref())
        .await;

    Ok(Json(EntitiesResponse {
        entities: entities
            .into_iter()
            .map(|entity| EntityView {
                entity_type: entity.entity_type,
                value: entity.value,
                confidence: entity.confidence,
                position: [entity.span.start, entity.span.end],
            })
            .collect(),
    }))
}

pub async fn generate_sql(
    State(state): State<Arc<AppState>>,
    Json(mut payload): Json<GenerateSqlRequest>,
) -> Result<Json<GenerateSqlResponse>, ApiError> {
    require_query(&payload.query)?;
    let context = payload.context();
    let generation = state
        .pipeline
        .generate_sql(&payload.query, payload.schema_id.as_deref(), context)
        .await?;

    Ok(Json(GenerateSqlResponse {
        sql_query: generation.sql.sql,
        explanation: generation.sql.explanation,
        confidence: generation.sql.confidence,
        suggested_modifications: generation.suggested_modifications,
        warnings: generation.sql.warnings,
    }))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    require_query(&payload.query)?;
    let response = state.pipeline.ask(payload).await?;
    Ok(Json(response))
}

// Query

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteQueryRequest>,
) -> Result<Json<ExecuteQueryResponse>, ApiError> {
    info!(
        "Executing query for {} (dry run: {})",
        payload.request.user_id, payload.request.dry_run
    );
    let result = state
        .pipeline
        .execute(payload.request, payload.schema_id.as_deref())
        .await?;

    Ok(Json(ExecuteQueryResponse {
        success: result.is_success(),
        query_id: result.id,
        data: result.data,
        columns: result.columns,
        row_count: result.row_count,
        execution_time: result.execution_time,
        status: result.status,
        error: result.error,
        metadata: result.metadata,
    }))
}

pub async fn validate_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateQueryRequest>,
) -> Json<ValidationVerdict> {
    Json(
        state
            .pipeline
            .validate(&payload.sql_query, payload.schema_id.as_deref())
            .await,
    )
}

pub async fn query_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryRecord>> {
    Json(
        state
            .history()
            .list(&params.user_id, params.limit, params.offset)
            .await,
    )
}

// Assistance

pub async fn suggestions(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SuggestionsRequest>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let schema = match payload.schema_id.as_deref() {
        Some(id) => Some(state.schemas().resolve(Some(id)).await?),
        None => state.schemas().resolve(None).await.ok(),
    };
    let history = match payload.user_id.as_deref() {
        Some(user) => state.history().list(user, DEFAULT_HISTORY_LIMIT, 0).await,
        None => Vec::new(),
    };

    let suggestions = state
        .suggestions
        .suggest(&payload.partial_query, schema.as_deref(), &history);
    Ok(Json(SuggestionsResponse { suggestions }))
}

// Chat assistant

pub async fn chat_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::bad_request("Message must not be empty"));
    }
    info!("Processing chat message for {}", payload.user_id);

    let schema = match payload.schema_id.as_deref() {
        Some(id) => Some(state.schemas().resolve(Some(id)).await?),
        None => state.schemas().resolve(None).await.ok(),
    };
    let reply = state
        .chat
        .respond(
            payload.conversation_id.as_deref(),
            &payload.user_id,
            &payload.message,
            schema.as_deref(),
        )
        .await;
    Ok(Json(reply))
}

pub async fn chat_conversation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Conversation>, ApiError> {
    state
        .chat
        .store()
        .get(&params.conversation_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::bad_request(format!("Unknown conversation id: {}", params.conversation_id))
        })
}

// Maintenance

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cleared = state.cache().clear().await;
    info!("Cleared {} cached responses", cleared);
    Json(json!({ "success": true, "cleared": cleared }))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();
    let llm = state.pipeline.llm();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        schema_count: state.schemas().count().await,
        history_records: state.history().total().await,
        cache: state.cache().stats().await,
        llm_backend: llm.backend().to_string(),
        llm_available: llm.is_available(),
    })
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
