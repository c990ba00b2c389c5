use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CachedResponse, Fingerprint, OperationKind, ResponseCache};
use crate::error::PipelineError;
use crate::llm::models::SqlReply;
use crate::llm::{strip_code_fence, CompletionRequest, LlmManager};
use crate::nlp::prompts::{sql_system_prompt, sql_user_prompt};
use crate::nlp::{clamp_confidence, GeneratedSql, UserQuery};
use crate::query::validator::contains_dangerous_operation;
use crate::schema::DatabaseSchema;

const LOW_CONFIDENCE: f64 = 0.5;

pub struct SqlGenerator {
    llm: Arc<LlmManager>,
    cache: Arc<ResponseCache>,
}

/// Generated query plus the service's improvement notes.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub sql: GeneratedSql,
    pub suggested_modifications: Vec<String>,
}

impl SqlGenerator {
    pub fn new(llm: Arc<LlmManager>, cache: Arc<ResponseCache>) -> Self {
        Self { llm, cache }
    }

    /// No fallback exists here: an unusable reply is a generation error and is not cached.
    pub async fn generate(
        &self,
        query: &UserQuery,
        schema: &DatabaseSchema,
    ) -> Result<Generation, PipelineError> {
        if query.text.trim().is_empty() {
            return Err(PipelineError::Generation("Query text is empty".to_string()));
        }

        let context_key = query
            .context
            .as_ref()
            .map(|c| c.fingerprint())
            .unwrap_or_default();
        let key = Fingerprint::new(OperationKind::Sql, &query.text, Some(&schema.id), &context_key);
        if let Some(CachedResponse::Sql(generation)) = self.cache.get(&key).await {
            debug!("Serving generated SQL {} from cache", generation.sql.id);
            return Ok(generation);
        }

        let request = CompletionRequest {
            system: sql_system_prompt(schema, query.context.as_ref()),
            user: sql_user_prompt(query),
            json: true,
        };
        let content = self.llm.complete(&request).await.into_result()?;

        let generation = parse_sql_reply(&content)?;
        info!(
            "Generated SQL {} with confidence {:.2}",
            generation.sql.id, generation.sql.confidence
        );

        self.cache
            .insert(key, CachedResponse::Sql(generation.clone()))
            .await;
        Ok(generation)
    }
}

fn parse_sql_reply(content: &str) -> Result<Generation, PipelineError> {
    let body = strip_code_fence(content);

    let reply = match serde_json::from_str::<SqlReply>(body) {
        Ok(reply) => reply,
        Err(e) if body.starts_with('{') || body.starts_with('[') => {
            warn!("Malformed JSON in SQL reply: {}", e);
            return Err(PipelineError::Generation(
                "Completion reply was not a valid JSON object".to_string(),
            ));
        }
        Err(_) => {
            let sql = extract_sql(content).ok_or_else(|| {
                PipelineError::Generation("Completion reply did not contain a query".to_string())
            })?;
            SqlReply {
                sql_query: Some(sql),
                explanation: None,
                confidence: None,
                suggested_modifications: Vec::new(),
            }
        }
    };

    let sql = reply
        .sql_query
        .map(|sql| sql.trim().to_string())
        .filter(|sql| !sql.is_empty())
        .ok_or_else(|| {
            PipelineError::Generation("Completion reply did not contain a query".to_string())
        })?;

    let confidence = clamp_confidence(reply.confidence.unwrap_or(LOW_CONFIDENCE));
    let mut warnings = Vec::new();
    if contains_dangerous_operation(&sql) {
        warn!("Generated SQL contains a potentially dangerous operation");
        warnings.push("Query contains potentially dangerous operations".to_string());
    }
    if confidence < LOW_CONFIDENCE {
        warnings.push("Low confidence in generated query; review before running".to_string());
    }

    Ok(Generation {
        sql: GeneratedSql {
            id: uuid::Uuid::new_v4().to_string(),
            sql,
            explanation: reply
                .explanation
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Generated from the question".to_string()),
            confidence,
            warnings,
        },
        suggested_modifications: reply.suggested_modifications,
    })
}

/// Pulls a statement out of a free-text reply: a ```sql block, then any fenced block,
/// then the first line that starts with a SQL keyword up to its terminating semicolon.
fn extract_sql(content: &str) -> Option<String> {
    if let Some(start) = content.find("```sql") {
        let after = &content[start + 6..];
        if let Some(end) = after.find("```") {
            let sql = after[..end].trim();
            if !sql.is_empty() {
                return Some(sql.to_string());
            }
        }
    }

    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        if let Some(end) = after.find("```") {
            let sql = after[..end].trim();
            if !sql.is_empty() {
                return Some(sql.to_string());
            }
        }
    }

    let sql_keywords = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];
    let lines: Vec<&str> = content.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim().to_uppercase();
        if !sql_keywords.iter().any(|kw| trimmed.starts_with(kw)) {
            continue;
        }

        let mut sql = line.trim().to_string();
        if sql.ends_with(';') {
            return Some(sql);
        }
        for next_line in &lines[i + 1..] {
            let next_line = next_line.trim();
            if next_line.starts_with("```") {
                break;
            }
            sql.push(' ');
            sql.push_str(next_line);
            if next_line.ends_with(';') {
                break;
            }
        }
        return Some(sql.trim().to_string());
    }

    None
}
