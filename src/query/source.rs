use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use duckdb::Connection;
use r2d2::Pool;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::db::db_pool::DuckDBConnectionManager;
use crate::query::models::{ColumnDescriptor, RowSet};

/// Raw fault from a data source. Its text is for logs only and never reaches callers.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError(pub String);

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data source error: {}", self.0)
    }
}

impl Error for SourceError {}

impl From<duckdb::Error> for SourceError {
    fn from(err: duckdb::Error) -> Self {
        SourceError(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for SourceError {
    fn from(err: arrow::error::ArrowError) -> Self {
        SourceError(err.to_string())
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn run(&self, sql: &str, parameters: &[Value]) -> Result<RowSet, SourceError>;

    fn name(&self) -> &str;
}

/// DuckDB behind an r2d2 pool.
///
/// Each statement runs on its own worker thread over a private clone of a pooled
/// connection, and the pooled connection goes straight back to the pool. A caller that
/// stops waiting (a deadline) therefore never starves later statements, and the runtime
/// never waits on an abandoned statement at shutdown.
pub struct DuckDbSource {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbSource {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataSource for DuckDbSource {
    async fn run(&self, sql: &str, parameters: &[Value]) -> Result<RowSet, SourceError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let params: Vec<DuckValue> = parameters.iter().map(to_duck_value).collect();
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("askgate-query".to_string())
            .spawn(move || {
                let result = private_connection(&pool)
                    .and_then(|conn| run_statement(&conn, &sql, params));
                if tx.send(result).is_err() {
                    warn!("Abandoned statement finished after its caller gave up");
                }
            })
            .map_err(|e| SourceError(format!("Failed to start query worker: {}", e)))?;

        rx.await
            .map_err(|_| SourceError("Query worker stopped without a result".to_string()))?
    }

    fn name(&self) -> &str {
        "duckdb"
    }
}

/// Clones a pooled connection; the guard is dropped before the statement starts.
fn private_connection(pool: &Pool<DuckDBConnectionManager>) -> Result<Connection, SourceError> {
    let pooled = pool.get().map_err(|e| SourceError(e.to_string()))?;
    Ok(pooled.try_clone()?)
}

fn run_statement(conn: &Connection, sql: &str, params: Vec<DuckValue>) -> Result<RowSet, SourceError> {
    let mut stmt = conn.prepare(sql)?;
    let arrow_batch = stmt.query_arrow(duckdb::params_from_iter(params))?;
    let schema = arrow_batch.get_schema();

    let columns = schema
        .fields()
        .iter()
        .map(|field| ColumnDescriptor {
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
        })
        .collect::<Vec<_>>();

    let record_batches = arrow_batch.collect::<Vec<_>>();

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    for batch in &record_batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    let buffer = writer.into_inner();

    let rows: Vec<Value> = if buffer.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&buffer).map_err(|e| SourceError(e.to_string()))?
    };

    debug!("DuckDB returned {} rows in {} columns", rows.len(), columns.len());
    Ok(RowSet { columns, rows })
}

fn to_duck_value(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => DuckValue::BigInt(i),
            (None, Some(f)) => DuckValue::Double(f),
            (None, None) => DuckValue::Text(n.to_string()),
        },
        Value::String(s) => DuckValue::Text(s.clone()),
        other => DuckValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_pool;
    use serde_json::json;

    fn seeded_source() -> DuckDbSource {
        let pool = memory_pool();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TABLE users (id INTEGER, name VARCHAR);
                 INSERT INTO users VALUES (1, 'Ana'), (2, 'Bo'), (3, 'Cy');",
            )
            .unwrap();
        DuckDbSource::new(pool)
    }

    #[tokio::test]
    async fn rows_come_back_as_json_objects() {
        let source = seeded_source();
        let rows = source
            .run("SELECT id, name FROM users ORDER BY id;", &[])
            .await
            .unwrap();

        assert_eq!(rows.columns.len(), 2);
        assert_eq!(rows.columns[0].name, "id");
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[0], json!({"id": 1, "name": "Ana"}));
    }

    #[tokio::test]
    async fn parameters_are_bound_positionally() {
        let source = seeded_source();
        let rows = source
            .run("SELECT name FROM users WHERE id > ? AND name <> ?;", &[json!(1), json!("Cy")])
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![json!({"name": "Bo"})]);
    }

    #[tokio::test]
    async fn empty_results_keep_their_columns() {
        let source = seeded_source();
        let rows = source
            .run("SELECT id FROM users WHERE id < 0;", &[])
            .await
            .unwrap();
        assert!(rows.rows.is_empty());
        assert_eq!(rows.columns.len(), 1);
    }

    #[tokio::test]
    async fn faults_are_reported() {
        let source = seeded_source();
        assert!(source.run("SELECT nope FROM missing;", &[]).await.is_err());
    }
}
