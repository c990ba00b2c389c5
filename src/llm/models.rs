use serde::{Deserialize, Serialize};

// Reply shapes the completion service is asked to return. Every field is optional or
// defaulted so a partial reply still parses; callers decide what is missing.

/// Reply to an intent classification prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentReply {
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default, alias = "description")]
    pub explanation: Option<String>,
}

/// Either a bare character offset or a `[start, end]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ReplyPosition {
    Offset(usize),
    Range([usize; 2]),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityReply {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: serde_json::Value,
    pub confidence: Option<f64>,
    pub position: Option<ReplyPosition>,
}

/// Entity replies come back either as a bare array or wrapped in `{"entities": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntitiesReply {
    List(Vec<EntityReply>),
    Wrapped { entities: Vec<EntityReply> },
}

impl EntitiesReply {
    pub fn into_entities(self) -> Vec<EntityReply> {
        match self {
            EntitiesReply::List(entities) => entities,
            EntitiesReply::Wrapped { entities } => entities,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlReply {
    #[serde(alias = "sql", alias = "query")]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub suggested_modifications: Vec<String>,
}
