//! Fixtures and test doubles shared by the unit tests.

use async_trait::async_trait;
use r2d2::Pool;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::db::db_pool::DuckDBConnectionManager;
use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
use crate::query::models::{ColumnDescriptor, RowSet};
use crate::query::source::{DataSource, SourceError};
use crate::schema::adapter::{column_id, table_id};
use crate::schema::model::{
    Column, DatabaseSchema, ForeignKey, Relationship, RelationshipType, Table,
};

pub const SHOP_DDL: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    email VARCHAR NOT NULL,
    created_at TIMESTAMP
);

CREATE TABLE orders (
    order_id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    amount DECIMAL(10,2) NOT NULL,
    status VARCHAR NOT NULL
);
"#;

fn column(table: &str, name: &str, data_type: &str, nullable: bool, primary_key: bool) -> Column {
    Column {
        id: column_id(table, name),
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        primary_key,
        foreign_key: None,
    }
}

/// The schema `SHOP_DDL` describes, built by hand.
pub fn sample_schema() -> DatabaseSchema {
    let mut user_id = column("orders", "user_id", "INTEGER", false, false);
    user_id.foreign_key = Some(ForeignKey {
        referenced_table: "users".to_string(),
        referenced_column: "id".to_string(),
    });

    DatabaseSchema {
        id: "sample".to_string(),
        name: "sample".to_string(),
        tables: vec![
            Table {
                id: table_id("users"),
                name: "users".to_string(),
                columns: vec![
                    column("users", "id", "INTEGER", false, true),
                    column("users", "name", "VARCHAR", false, false),
                    column("users", "email", "VARCHAR", false, false),
                    column("users", "created_at", "TIMESTAMP", true, false),
                ],
            },
            Table {
                id: table_id("orders"),
                name: "orders".to_string(),
                columns: vec![
                    column("orders", "order_id", "INTEGER", false, true),
                    user_id,
                    column("orders", "amount", "DECIMAL(10,2)", false, false),
                    column("orders", "status", "VARCHAR", false, false),
                ],
            },
        ],
        relationships: vec![Relationship {
            from_table: "users".to_string(),
            to_table: "orders".to_string(),
            relationship_type: RelationshipType::OneToMany,
        }],
    }
}

/// Single-connection pool over a fresh in-memory database.
pub fn memory_pool() -> Pool<DuckDBConnectionManager> {
    let manager = DuckDBConnectionManager::new(":memory:".to_string()).expect("in-memory database");
    Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("in-memory pool")
}

/// Replies with the same text every time and counts calls.
pub struct ScriptedProvider {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn always(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Refuses the first `failures` calls, then replies like `ScriptedProvider`.
pub struct FlakyProvider {
    failures: usize,
    reply: String,
    calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn failing_first(failures: usize, reply: &str) -> Self {
        Self {
            failures,
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FlakyProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LlmError::ConnectionError("connection reset".to_string()));
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Claims to be available but can never be reached.
pub struct UnreachableProvider;

#[async_trait]
impl CompletionProvider for UnreachableProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::ConnectionError("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

pub struct SlowProvider {
    delay: Duration,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl CompletionProvider for SlowProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok("SELECT 1;".to_string())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Returns fixed rows; columns are taken from the first row's keys.
pub struct CountingSource {
    rows: Vec<Value>,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for CountingSource {
    async fn run(&self, _sql: &str, _parameters: &[Value]) -> Result<RowSet, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let columns = self
            .rows
            .first()
            .and_then(Value::as_object)
            .map(|row| {
                row.keys()
                    .map(|name| ColumnDescriptor {
                        name: name.clone(),
                        data_type: "Int64".to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(RowSet {
            columns,
            rows: self.rows.clone(),
        })
    }

    fn name(&self) -> &str {
        "counting"
    }
}

pub struct FailingSource {
    message: String,
}

impl FailingSource {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl DataSource for FailingSource {
    async fn run(&self, _sql: &str, _parameters: &[Value]) -> Result<RowSet, SourceError> {
        Err(SourceError(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub struct SlowSource {
    delay: Duration,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DataSource for SlowSource {
    async fn run(&self, _sql: &str, _parameters: &[Value]) -> Result<RowSet, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(RowSet::default())
    }

    fn name(&self) -> &str {
        "slow"
    }
}
