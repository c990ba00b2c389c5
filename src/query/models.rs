use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Timeout,
    ExecutionFailed,
}

/// Normalized failure returned to callers. Never carries driver text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub tables_used: Vec<String>,
    pub cacheable: bool,
    pub cost: f64,
    pub dry_run: bool,
    /// Style warnings from validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub data: Vec<Value>,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: usize,
    /// Seconds.
    pub execution_time: f64,
    pub status: QueryStatus,
    pub error: Option<ErrorEnvelope>,
    pub metadata: Option<ResultMetadata>,
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        self.status != QueryStatus::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub query_id: String,
    pub sql: String,
    pub parameters: Vec<Value>,
    pub user_id: String,
    pub executed_at: DateTime<Utc>,
    pub execution_time: f64,
    pub success: bool,
    pub row_count: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(alias = "sql_query")]
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub dry_run: bool,
}

pub fn default_user() -> String {
    "anonymous".to_string()
}

/// Rows returned by a data source, before the executor wraps them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Value>,
}
