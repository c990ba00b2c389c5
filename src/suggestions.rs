use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::query::models::HistoryRecord;
use crate::schema::model::{DataType, Table};
use crate::schema::DatabaseSchema;

pub const MAX_SUGGESTIONS: usize = 10;
const DEFAULT_ROW_LIMIT: usize = 10;

/// What the client can do with a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SuggestedAction {
    RunQuery { sql: String },
    RefineQuery { hint: String },
    ExplainTable { table: String },
    ShowRelationships,
    AddLimit { sql: String },
    GenerateSql { sql: String },
    ShowExamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Completion,
    Correction,
    Example,
    History,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub confidence: f64,
    pub action: SuggestedAction,
}

impl Suggestion {
    fn new(text: String, kind: SuggestionKind, confidence: f64, action: SuggestedAction) -> Self {
        Self {
            text,
            kind,
            confidence,
            action,
        }
    }
}

/// Suggestions for partially typed questions, built from the active schema and the
/// user's recent history.
pub struct SuggestionEngine {
    limit: usize,
}

impl SuggestionEngine {
    pub fn new() -> Self {
        Self {
            limit: MAX_SUGGESTIONS,
        }
    }

    pub fn suggest(
        &self,
        partial: &str,
        schema: Option<&DatabaseSchema>,
        history: &[HistoryRecord],
    ) -> Vec<Suggestion> {
        let lowered = partial.trim().to_lowercase();
        let first_word = lowered.split_whitespace().next().unwrap_or_default();

        let mut suggestions = match schema {
            None => vec![Suggestion::new(
                "Upload a schema to get table-specific suggestions".to_string(),
                SuggestionKind::Example,
                0.5,
                SuggestedAction::RefineQuery {
                    hint: "No schema is loaded".to_string(),
                },
            )],
            Some(schema) if lowered.chars().count() < 2 => default_suggestions(schema),
            Some(schema) => match first_word {
                "show" | "get" | "find" | "list" => retrieval_suggestions(schema),
                "count" | "total" | "sum" | "average" => aggregation_suggestions(schema),
                "update" | "change" | "modify" | "delete" | "remove" | "insert" | "add" => {
                    read_only_corrections(schema)
                }
                _ => general_suggestions(&lowered, schema),
            },
        };

        suggestions.extend(history_suggestions(history));

        let mut seen = HashSet::new();
        suggestions.retain(|s| seen.insert(s.text.clone()));
        suggestions.truncate(self.limit);
        suggestions
    }
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_suggestions(schema: &DatabaseSchema) -> Vec<Suggestion> {
    schema
        .tables
        .iter()
        .take(3)
        .flat_map(|table| {
            [
                Suggestion::new(
                    format!("Show me all {}", table.name),
                    SuggestionKind::Completion,
                    0.9,
                    SuggestedAction::RunQuery {
                        sql: select_all(table),
                    },
                ),
                Suggestion::new(
                    format!("Count total {}", table.name),
                    SuggestionKind::Completion,
                    0.9,
                    SuggestedAction::RunQuery {
                        sql: format!("SELECT COUNT(*) FROM {};", table.name),
                    },
                ),
            ]
        })
        .collect()
}

fn retrieval_suggestions(schema: &DatabaseSchema) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    for table in &schema.tables {
        suggestions.push(Suggestion::new(
            format!("Show me all {}", table.name),
            SuggestionKind::Completion,
            0.9,
            SuggestedAction::RunQuery {
                sql: select_all(table),
            },
        ));

        let recency = table
            .columns
            .iter()
            .find(|c| matches!(c.kind(), DataType::Timestamp | DataType::Date));
        if let Some(column) = recency {
            suggestions.push(Suggestion::new(
                format!("Show me recent {}", table.name),
                SuggestionKind::Completion,
                0.8,
                SuggestedAction::RunQuery {
                    sql: format!(
                        "SELECT * FROM {} ORDER BY {} DESC LIMIT {};",
                        table.name, column.name, DEFAULT_ROW_LIMIT
                    ),
                },
            ));
        }
    }
    suggestions
}

fn aggregation_suggestions(schema: &DatabaseSchema) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    for table in &schema.tables {
        suggestions.push(Suggestion::new(
            format!("Count total {}", table.name),
            SuggestionKind::Completion,
            0.9,
            SuggestedAction::RunQuery {
                sql: format!("SELECT COUNT(*) FROM {};", table.name),
            },
        ));

        // keys are numeric too, but summing them means nothing
        let measures = table
            .columns
            .iter()
            .filter(|c| c.kind().is_numeric() && !c.primary_key && c.foreign_key.is_none());
        for column in measures {
            suggestions.push(Suggestion::new(
                format!("Sum of {} in {}", column.name, table.name),
                SuggestionKind::Completion,
                0.8,
                SuggestedAction::RunQuery {
                    sql: format!("SELECT SUM({}) FROM {};", column.name, table.name),
                },
            ));
            suggestions.push(Suggestion::new(
                format!("Average {} in {}", column.name, table.name),
                SuggestionKind::Completion,
                0.8,
                SuggestedAction::RunQuery {
                    sql: format!("SELECT AVG({}) FROM {};", column.name, table.name),
                },
            ));
        }
    }
    suggestions
}

fn read_only_corrections(schema: &DatabaseSchema) -> Vec<Suggestion> {
    let mut suggestions = vec![Suggestion::new(
        "Only read queries can be run; ask to view the data instead".to_string(),
        SuggestionKind::Correction,
        0.9,
        SuggestedAction::RefineQuery {
            hint: "Data-modifying statements are rejected before execution".to_string(),
        },
    )];
    suggestions.extend(schema.tables.iter().take(3).map(|table| {
        Suggestion::new(
            format!("Show me all {}", table.name),
            SuggestionKind::Correction,
            0.7,
            SuggestedAction::RunQuery {
                sql: select_all(table),
            },
        )
    }));
    suggestions
}

fn general_suggestions(lowered: &str, schema: &DatabaseSchema) -> Vec<Suggestion> {
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 2)
        .collect();
    let mut suggestions = Vec::new();

    for table in &schema.tables {
        let name = table.name.to_lowercase();
        let mentioned = words
            .iter()
            .any(|w| name.starts_with(w) || w.starts_with(name.as_str()));
        if mentioned {
            suggestions.push(Suggestion::new(
                format!("Describe the {} table", table.name),
                SuggestionKind::Completion,
                0.8,
                SuggestedAction::ExplainTable {
                    table: table.name.clone(),
                },
            ));
            suggestions.push(Suggestion::new(
                format!("Show me all {}", table.name),
                SuggestionKind::Completion,
                0.7,
                SuggestedAction::RunQuery {
                    sql: select_all(table),
                },
            ));
        }
    }

    let wants_relations = words
        .iter()
        .any(|w| matches!(*w, "join" | "related" | "relationship" | "relationships" | "with"));
    if wants_relations && !schema.relationships.is_empty() {
        suggestions.push(Suggestion::new(
            "Show how the tables are related".to_string(),
            SuggestionKind::Example,
            0.7,
            SuggestedAction::ShowRelationships,
        ));
    }

    if suggestions.is_empty() {
        suggestions.push(Suggestion::new(
            "Name a table or column to narrow the question".to_string(),
            SuggestionKind::Example,
            0.5,
            SuggestedAction::RefineQuery {
                hint: format!(
                    "Known tables: {}",
                    schema
                        .tables
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
        ));
    }

    suggestions
}

/// Re-run recent successful queries; offer a LIMIT where one is missing.
fn history_suggestions(history: &[HistoryRecord]) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    for record in history.iter().filter(|r| r.success).take(3) {
        let sql = record.sql.trim();
        suggestions.push(Suggestion::new(
            format!("Run again: {}", sql),
            SuggestionKind::History,
            0.6,
            SuggestedAction::RunQuery {
                sql: sql.to_string(),
            },
        ));

        let upper = sql.to_uppercase();
        if upper.starts_with("SELECT") && !upper.contains(" LIMIT ") && !upper.contains("COUNT(") {
            suggestions.push(Suggestion::new(
                format!("Limit results of: {}", sql),
                SuggestionKind::History,
                0.5,
                SuggestedAction::AddLimit {
                    sql: with_limit(sql),
                },
            ));
        }
    }

    suggestions
}

pub(crate) fn select_all(table: &Table) -> String {
    format!("SELECT * FROM {} LIMIT {};", table.name, DEFAULT_ROW_LIMIT)
}

fn with_limit(sql: &str) -> String {
    format!(
        "{} LIMIT {};",
        sql.trim_end().trim_end_matches(';').trim_end(),
        DEFAULT_ROW_LIMIT
    )
}
