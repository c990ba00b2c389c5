use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::schema::DatabaseSchema;
use crate::suggestions::{select_all, SuggestedAction};

const HELP_WORDS: &[&str] = &["help", "how", "what"];
const RETRIEVAL_WORDS: &[&str] = &["show", "display", "get", "find", "list"];
const AGGREGATION_WORDS: &[&str] = &["count", "total", "sum", "average"];
const SCHEMA_WORDS: &[&str] = &["schema", "table", "tables", "column", "columns", "structure"];

/// Tables offered as ready-made queries in one reply.
const MAX_TABLE_ACTIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Help,
    Clarification,
    SchemaInfo,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAction {
    pub text: String,
    pub action: SuggestedAction,
}

impl ChatAction {
    fn new(text: impl Into<String>, action: SuggestedAction) -> Self {
        Self {
            text: text.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub message: String,
    pub message_type: MessageType,
    pub suggested_actions: Vec<ChatAction>,
    pub metadata: Value,
}

/// In-memory conversations keyed by id, lost on restart.
pub struct ChatStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Appends a user turn and its reply under one lock so turns never interleave. A
    /// missing id starts a new conversation; an unseen id is adopted as given. Returns the
    /// conversation id and its message count.
    pub async fn record_exchange(
        &self,
        conversation_id: Option<&str>,
        user_id: &str,
        question: &str,
        answer: &str,
    ) -> (String, usize) {
        let id = conversation_id
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut conversations = self.conversations.write().await;
        let conversation = conversations.entry(id.clone()).or_insert_with(|| {
            debug!("Starting conversation {} for {}", id, user_id);
            Conversation {
                id: id.clone(),
                user_id: user_id.to_string(),
                messages: Vec::new(),
                created_at: now,
            }
        });

        conversation.messages.push(ChatMessage {
            role: ChatRole::User,
            content: question.to_string(),
            timestamp: now,
        });
        conversation.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: answer.to_string(),
            timestamp: Utc::now(),
        });

        (id, conversation.messages.len())
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword-driven assistant that steers free-form chat towards askable questions.
pub struct ChatAssistant {
    store: ChatStore,
}

impl ChatAssistant {
    pub fn new() -> Self {
        Self {
            store: ChatStore::new(),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub async fn respond(
        &self,
        conversation_id: Option<&str>,
        user_id: &str,
        message: &str,
        schema: Option<&DatabaseSchema>,
    ) -> ChatReply {
        let (text, message_type, suggested_actions) = compose_reply(message, schema);
        let (conversation_id, message_count) = self
            .store
            .record_exchange(conversation_id, user_id, message, &text)
            .await;
        info!(
            "Chat reply {:?} in conversation {} ({} messages)",
            message_type, conversation_id, message_count
        );

        ChatReply {
            conversation_id,
            message: text,
            message_type,
            suggested_actions,
            metadata: json!({
                "message_count": message_count,
                "schema_id": schema.map(|s| s.id.clone()),
            }),
        }
    }
}

impl Default for ChatAssistant {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked in order: help, retrieval, aggregation, schema questions, anything else.
fn compose_reply(
    message: &str,
    schema: Option<&DatabaseSchema>,
) -> (String, MessageType, Vec<ChatAction>) {
    let lowered = message.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

    if mentions(HELP_WORDS) {
        help_reply(schema)
    } else if mentions(RETRIEVAL_WORDS) {
        retrieval_reply(schema)
    } else if mentions(AGGREGATION_WORDS) {
        aggregation_reply(schema)
    } else if mentions(SCHEMA_WORDS) {
        schema_reply(&words, schema)
    } else {
        (
            format!(
                "I understand you said: '{}'. Tell me which data you are looking for and I \
                 can turn it into a query.",
                message.trim()
            ),
            MessageType::Text,
            vec![
                ChatAction::new(
                    "Be more specific",
                    SuggestedAction::RefineQuery {
                        hint: "Name a table, a column or a condition".to_string(),
                    },
                ),
                ChatAction::new("Show examples", SuggestedAction::ShowExamples),
            ],
        )
    }
}

fn help_reply(schema: Option<&DatabaseSchema>) -> (String, MessageType, Vec<ChatAction>) {
    let mut actions = vec![ChatAction::new("Show example questions", SuggestedAction::ShowExamples)];
    if let Some(table) = schema.and_then(|s| s.tables.first()) {
        actions.push(ChatAction::new(
            format!("Explain the {} table", table.name),
            SuggestedAction::ExplainTable {
                table: table.name.clone(),
            },
        ));
    }
    (
        "Ask me about your data in plain words, like 'Show me all users' or 'What is the \
         total order amount?'. I can also describe your schema."
            .to_string(),
        MessageType::Help,
        actions,
    )
}

fn retrieval_reply(schema: Option<&DatabaseSchema>) -> (String, MessageType, Vec<ChatAction>) {
    let actions = schema
        .map(|schema| {
            schema
                .tables
                .iter()
                .take(MAX_TABLE_ACTIONS)
                .map(|table| {
                    ChatAction::new(
                        format!("Show all {}", table.name),
                        SuggestedAction::GenerateSql {
                            sql: select_all(table),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    (
        "Which table or information are you looking for? For example: 'Show me all users \
         who registered last month'."
            .to_string(),
        MessageType::Clarification,
        actions,
    )
}

fn aggregation_reply(schema: Option<&DatabaseSchema>) -> (String, MessageType, Vec<ChatAction>) {
    let mut actions = Vec::new();
    if let Some(schema) = schema {
        if let Some(table) = schema.tables.first() {
            actions.push(ChatAction::new(
                format!("Count all {}", table.name),
                SuggestedAction::GenerateSql {
                    sql: format!("SELECT COUNT(*) AS total_{0} FROM {0};", table.name),
                },
            ));
        }
        let measure = schema.tables.iter().find_map(|table| {
            table
                .columns
                .iter()
                .find(|c| c.kind().is_numeric() && !c.primary_key && c.foreign_key.is_none())
                .map(|column| (table, column))
        });
        if let Some((table, column)) = measure {
            actions.push(ChatAction::new(
                format!("Total {} in {}", column.name, table.name),
                SuggestedAction::GenerateSql {
                    sql: format!(
                        "SELECT SUM({0}) AS total_{0} FROM {1};",
                        column.name, table.name
                    ),
                },
            ));
        }
    }
    (
        "What would you like to count or calculate? For example: 'Count total users' or \
         'Calculate the average order amount'."
            .to_string(),
        MessageType::Clarification,
        actions,
    )
}

fn schema_reply(
    words: &[&str],
    schema: Option<&DatabaseSchema>,
) -> (String, MessageType, Vec<ChatAction>) {
    let Some(schema) = schema.filter(|s| !s.tables.is_empty()) else {
        return (
            "No schema is loaded yet. Upload your CREATE TABLE statements and I can describe \
             the tables."
                .to_string(),
            MessageType::SchemaInfo,
            Vec::new(),
        );
    };

    let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    let mentioned: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| words.contains(&name.to_lowercase().as_str()))
        .collect();
    let explained = if mentioned.is_empty() {
        &names[..1]
    } else {
        &mentioned[..]
    };

    let mut actions: Vec<ChatAction> = explained
        .iter()
        .map(|name| {
            ChatAction::new(
                format!("Explain the {} table", name),
                SuggestedAction::ExplainTable {
                    table: name.to_string(),
                },
            )
        })
        .collect();
    if !schema.relationships.is_empty() {
        actions.push(ChatAction::new(
            "Show table relationships",
            SuggestedAction::ShowRelationships,
        ));
    }

    (
        format!(
            "Schema '{}' has {} tables: {}. Want me to explain one of them or show how they \
             relate?",
            schema.name,
            names.len(),
            names.join(", ")
        ),
        MessageType::SchemaInfo,
        actions,
    )
}
