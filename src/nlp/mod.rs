pub mod entities;
pub mod generator;
pub mod intent;
pub mod prompts;

pub use entities::EntityExtractor;
pub use generator::SqlGenerator;
pub use intent::IntentClassifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Select,
    Aggregate,
    Filter,
    Join,
    Update,
    Delete,
    Create,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Select => "select",
            IntentType::Aggregate => "aggregate",
            IntentType::Filter => "filter",
            IntentType::Join => "join",
            IntentType::Update => "update",
            IntentType::Delete => "delete",
            IntentType::Create => "create",
        }
    }

    /// Case-insensitive; labels outside the enumeration are rejected.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "select" => Some(IntentType::Select),
            "aggregate" => Some(IntentType::Aggregate),
            "filter" => Some(IntentType::Filter),
            "join" => Some(IntentType::Join),
            "update" => Some(IntentType::Update),
            "delete" => Some(IntentType::Delete),
            "create" => Some(IntentType::Create),
            _ => None,
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f64,
    pub description: String,
}

impl QueryIntent {
    pub fn new(intent_type: IntentType, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            intent_type,
            confidence: clamp_confidence(confidence),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Table,
    Column,
    Value,
    Operator,
    Function,
}

impl EntityType {
    /// Accepts the plain labels plus the longer forms completion services tend to use
    /// (`TABLE_NAME`, `AGGREGATE_FUNCTION`, `NUMERIC_VALUE`, ...).
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "table" | "table_name" => Some(EntityType::Table),
            "column" | "column_name" => Some(EntityType::Column),
            "operator" => Some(EntityType::Operator),
            "function" | "aggregate_function" => Some(EntityType::Function),
            "value" | "numeric_value" | "text_value" | "date_range" => Some(EntityType::Value),
            _ => None,
        }
    }
}

/// Half-open character range `[start, end)` into the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: f64,
    pub span: Span,
}

/// Conversation state carried between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryContext {
    pub previous_queries: Vec<String>,
    pub selected_tables: Vec<String>,
    pub filters: BTreeMap<String, serde_json::Value>,
    pub preferences: BTreeMap<String, serde_json::Value>,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.previous_queries.is_empty()
            && self.selected_tables.is_empty()
            && self.filters.is_empty()
            && self.preferences.is_empty()
    }

    /// Stable serialization used in cache fingerprints. Maps are ordered, so equal
    /// contexts always serialize identically.
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuery {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Option<QueryIntent>,
    pub entities: Option<Vec<Entity>>,
    pub context: Option<QueryContext>,
    pub generated_sql_id: Option<String>,
}

impl UserQuery {
    pub fn new(text: impl Into<String>, context: Option<QueryContext>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            timestamp: Utc::now(),
            intent: None,
            entities: None,
            context,
            generated_sql_id: None,
        }
    }

    pub fn with_analysis(mut self, intent: QueryIntent, entities: Vec<Entity>) -> Self {
        self.intent = Some(intent);
        self.entities = Some(entities);
        self
    }

    /// Freezes the query: once generated SQL is attached the value is only read.
    pub fn attach_sql(mut self, generated: &GeneratedSql) -> Self {
        self.generated_sql_id = Some(generated.id.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub id: String,
    pub sql: String,
    pub explanation: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
