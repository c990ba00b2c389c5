use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::cache::{CachedResponse, Fingerprint, OperationKind, ResponseCache};
use crate::llm::models::{EntitiesReply, EntityReply, ReplyPosition};
use crate::llm::{strip_code_fence, CompletionOutcome, CompletionRequest, LlmManager};
use crate::nlp::prompts::{entity_system_prompt, entity_user_prompt};
use crate::nlp::{clamp_confidence, Entity, EntityType, Span};
use crate::schema::DatabaseSchema;

const TABLE_CONFIDENCE: f64 = 0.8;
const COLUMN_CONFIDENCE: f64 = 0.7;
const NUMBER_CONFIDENCE: f64 = 0.8;
const QUOTED_CONFIDENCE: f64 = 0.9;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("valid number pattern"));

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]*)"|'([^']*)'"#).expect("valid quoted string pattern")
});

pub struct EntityExtractor {
    llm: Arc<LlmManager>,
    cache: Arc<ResponseCache>,
}

impl EntityExtractor {
    pub fn new(llm: Arc<LlmManager>, cache: Arc<ResponseCache>) -> Self {
        Self { llm, cache }
    }

    /// Never fails: unusable completions fall back to literal and schema name matching.
    /// Only entities parsed from a completed call are cached.
    pub async fn extract(&self, text: &str, schema: Option<&DatabaseSchema>) -> Vec<Entity> {
        let key = Fingerprint::new(
            OperationKind::Entities,
            text,
            schema.map(|s| s.id.as_str()),
            "",
        );
        if let Some(CachedResponse::Entities(entities)) = self.cache.get(&key).await {
            return entities;
        }

        match self.extract_remote(text, schema).await {
            Some(entities) => {
                info!("Extracted {} entities", entities.len());
                self.cache
                    .insert(key, CachedResponse::Entities(entities.clone()))
                    .await;
                entities
            }
            None => {
                let entities = fallback_entities(text, schema);
                debug!("Fallback matching found {} entities", entities.len());
                entities
            }
        }
    }

    async fn extract_remote(
        &self,
        text: &str,
        schema: Option<&DatabaseSchema>,
    ) -> Option<Vec<Entity>> {
        if !self.llm.is_available() {
            return None;
        }

        let request = CompletionRequest {
            system: entity_system_prompt(schema),
            user: entity_user_prompt(text),
            json: true,
        };

        match self.llm.complete(&request).await {
            CompletionOutcome::Completed(content) => {
                let parsed = parse_entities_reply(&content, text);
                if parsed.is_none() {
                    warn!("Unparseable entity reply, using schema name matching");
                }
                parsed
            }
            CompletionOutcome::Failed(_) | CompletionOutcome::TimedOut(_) => None,
        }
    }
}

fn parse_entities_reply(content: &str, text: &str) -> Option<Vec<Entity>> {
    let reply: EntitiesReply = serde_json::from_str(strip_code_fence(content)).ok()?;
    let entities = reply
        .into_entities()
        .into_iter()
        .filter_map(|reply| reply_to_entity(reply, text));
    Some(dedupe(entities))
}

fn reply_to_entity(reply: EntityReply, text: &str) -> Option<Entity> {
    let entity_type = EntityType::parse(&reply.entity_type)?;
    let value = match reply.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    let value_len = value.chars().count();

    let span = match reply.position {
        Some(ReplyPosition::Range([start, end])) if start <= end => Span { start, end },
        Some(ReplyPosition::Offset(start)) => Span {
            start,
            end: start + value_len,
        },
        _ => {
            let start = char_offset_of(text, &value)?;
            Span {
                start,
                end: start + value_len,
            }
        }
    };

    Some(Entity {
        entity_type,
        value,
        confidence: clamp_confidence(reply.confidence.unwrap_or(0.5)),
        span,
    })
}

fn char_offset_of(text: &str, needle: &str) -> Option<usize> {
    let lowered = text.to_lowercase();
    let byte_idx = lowered.find(&needle.to_lowercase())?;
    Some(lowered[..byte_idx].chars().count())
}

/// Literal values (quoted text, then numbers outside quotes) plus, with a schema,
/// whitespace tokens matched against table names and then column names. Schema values
/// use the schema's spelling. Spans are char offsets; quoted text spans the contents
/// without the quotes. Results are ordered by position.
pub fn fallback_entities(text: &str, schema: Option<&DatabaseSchema>) -> Vec<Entity> {
    let mut entities = literal_values(text);

    if let Some(schema) = schema {
        for (span, token) in word_tokens(text) {
            for table in &schema.tables {
                if table.name.eq_ignore_ascii_case(&token) {
                    entities.push(Entity {
                        entity_type: EntityType::Table,
                        value: table.name.clone(),
                        confidence: TABLE_CONFIDENCE,
                        span,
                    });
                }
                for column in &table.columns {
                    if column.name.eq_ignore_ascii_case(&token) {
                        entities.push(Entity {
                            entity_type: EntityType::Column,
                            value: column.name.clone(),
                            confidence: COLUMN_CONFIDENCE,
                            span,
                        });
                    }
                }
            }
        }
    }

    entities.sort_by_key(|e| e.span.start);
    dedupe(entities)
}

fn literal_values(text: &str) -> Vec<Entity> {
    let char_at = |byte: usize| text[..byte].chars().count();
    let mut values = Vec::new();
    let mut quoted_bytes = Vec::new();

    for captures in QUOTED.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        quoted_bytes.push(whole.range());
        if let Some(inner) = captures.get(1).or_else(|| captures.get(2)) {
            values.push(Entity {
                entity_type: EntityType::Value,
                value: inner.as_str().to_string(),
                confidence: QUOTED_CONFIDENCE,
                span: Span {
                    start: char_at(inner.start()),
                    end: char_at(inner.end()),
                },
            });
        }
    }

    for number in NUMBER.find_iter(text) {
        if quoted_bytes.iter().any(|q| q.contains(&number.start())) {
            continue;
        }
        values.push(Entity {
            entity_type: EntityType::Value,
            value: number.as_str().to_string(),
            confidence: NUMBER_CONFIDENCE,
            span: Span {
                start: char_at(number.start()),
                end: char_at(number.end()),
            },
        });
    }

    values
}

/// Keeps the first entity seen for each (type, span).
fn dedupe(entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert((e.entity_type, e.span)))
        .collect()
}

fn word_tokens(text: &str) -> Vec<(Span, String)> {
    let chars: Vec<char> = text.chars().collect();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let mut start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let mut end = i;
        while start < end && !is_word(chars[start]) {
            start += 1;
        }
        while end > start && !is_word(chars[end - 1]) {
            end -= 1;
        }
        if start < end {
            tokens.push((Span { start, end }, chars[start..end].iter().collect()));
        }
    }

    tokens
}
