use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::query::gate::AdmissionGate;
use crate::query::history::HistoryStore;
use crate::query::models::{
    ErrorCode, ErrorEnvelope, ExecuteRequest, HistoryRecord, QueryResult, QueryStatus,
    ResultMetadata, RowSet,
};
use crate::query::source::DataSource;
use crate::query::validator::referenced_tables;
use crate::schema::DatabaseSchema;

pub const EXECUTION_FAILED_MESSAGE: &str = "Query execution failed";

/// Runs admitted queries against the data source, or simulates them for a dry run.
/// Every call appends exactly one history record.
pub struct QueryExecutor {
    source: Arc<dyn DataSource>,
    history: Arc<HistoryStore>,
    timeout: Duration,
}

enum RunOutcome {
    Rows(RowSet),
    Fault(ErrorEnvelope),
}

impl QueryExecutor {
    pub fn new(source: Arc<dyn DataSource>, history: Arc<HistoryStore>, timeout: Duration) -> Self {
        Self {
            source,
            history,
            timeout,
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Rejections return a policy error; faults and timeouts come back as an error
    /// envelope inside an `Ok` result.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        schema: Option<&DatabaseSchema>,
    ) -> Result<QueryResult, PipelineError> {
        let query_id = uuid::Uuid::new_v4().to_string();
        let executed_at = Utc::now();
        let mut gate = AdmissionGate::new();

        let warnings = match gate.admit(&request.sql, schema) {
            Ok(verdict) => verdict.warnings.clone(),
            Err(err) => {
                self.record(&query_id, &request, executed_at, 0.0, false, 0, Some(err.to_string()))
                    .await;
                return Err(err);
            }
        };
        let tables_used = referenced_tables(&request.sql);

        gate.begin()?;

        if request.dry_run {
            gate.finish(true)?;
            info!("Dry run {} admitted for {}", query_id, request.user_id);
            self.record(&query_id, &request, executed_at, 0.0, true, 0, None)
                .await;
            return Ok(QueryResult {
                id: query_id,
                data: Vec::new(),
                columns: Vec::new(),
                row_count: 0,
                execution_time: 0.0,
                status: QueryStatus::Success,
                error: None,
                metadata: Some(ResultMetadata {
                    tables_used,
                    cacheable: false,
                    cost: 0.0,
                    dry_run: true,
                    warnings,
                }),
            });
        }

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.source.run(&request.sql, &request.parameters),
        )
        .await
        {
            Ok(Ok(rows)) => RunOutcome::Rows(rows),
            Ok(Err(fault)) => {
                error!("Query {} failed on {}: {}", query_id, self.source.name(), fault);
                RunOutcome::Fault(ErrorEnvelope {
                    code: ErrorCode::ExecutionFailed,
                    message: EXECUTION_FAILED_MESSAGE.to_string(),
                })
            }
            Err(_) => {
                warn!("Query {} exceeded its {:?} deadline", query_id, self.timeout);
                RunOutcome::Fault(ErrorEnvelope {
                    code: ErrorCode::Timeout,
                    message: format!(
                        "Query did not finish within {}s",
                        self.timeout.as_secs_f64()
                    ),
                })
            }
        };

        let success = matches!(outcome, RunOutcome::Rows(_));
        let execution_time = gate.finish(success)?.as_secs_f64();

        let result = match outcome {
            RunOutcome::Rows(rows) => {
                let row_count = rows.rows.len();
                info!("Query {} returned {} rows in {:.3}s", query_id, row_count, execution_time);
                QueryResult {
                    id: query_id.clone(),
                    row_count,
                    data: rows.rows,
                    columns: rows.columns,
                    execution_time,
                    status: if warnings.is_empty() {
                        QueryStatus::Success
                    } else {
                        QueryStatus::Warning
                    },
                    error: None,
                    metadata: Some(ResultMetadata {
                        tables_used,
                        cacheable: true,
                        cost: execution_time,
                        dry_run: false,
                        warnings,
                    }),
                }
            }
            RunOutcome::Fault(envelope) => QueryResult {
                id: query_id.clone(),
                data: Vec::new(),
                columns: Vec::new(),
                row_count: 0,
                execution_time,
                status: QueryStatus::Error,
                error: Some(envelope),
                metadata: Some(ResultMetadata {
                    tables_used,
                    cacheable: false,
                    cost: execution_time,
                    dry_run: false,
                    warnings,
                }),
            },
        };

        self.record(
            &query_id,
            &request,
            executed_at,
            execution_time,
            result.is_success(),
            result.row_count,
            result.error.as_ref().map(|e| e.message.clone()),
        )
        .await;

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        query_id: &str,
        request: &ExecuteRequest,
        executed_at: chrono::DateTime<Utc>,
        execution_time: f64,
        success: bool,
        row_count: usize,
        error_message: Option<String>,
    ) {
        self.history
            .append(HistoryRecord {
                query_id: query_id.to_string(),
                sql: request.sql.clone(),
                parameters: request.parameters.clone(),
                user_id: request.user_id.clone(),
                executed_at,
                execution_time,
                success,
                row_count,
                error_message,
            })
            .await;
    }
}
