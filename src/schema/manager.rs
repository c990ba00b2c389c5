use chrono::{DateTime, Utc};
use r2d2::Pool;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::introspect::{read_schema_info, LIVE_SCHEMA_ID};
use crate::error::PipelineError;
use crate::schema::adapter::{SchemaAdapter, SchemaError, SchemaInfo, SchemaMetadata};
use crate::schema::ddl::parse_ddl;
use crate::schema::model::DatabaseSchema;

#[derive(Debug, Clone, Serialize)]
pub struct SchemaUploadResponse {
    pub success: bool,
    pub schema_id: Option<String>,
    pub tables_count: usize,
    pub message: String,
}

struct StoredSchema {
    schema: Arc<DatabaseSchema>,
    filename: Option<String>,
    uploaded_at: DateTime<Utc>,
}

/// Process-lifetime registry of uploaded schemas plus access to the live database.
pub struct SchemaManager {
    schemas: RwLock<HashMap<String, StoredSchema>>,
    latest: RwLock<Option<String>>,
    pool: Option<Pool<DuckDBConnectionManager>>,
}

impl SchemaManager {
    pub fn new(pool: Option<Pool<DuckDBConnectionManager>>) -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
            pool,
        }
    }

    /// Parses schema-definition text and registers it under a fresh id.
    pub async fn upload(
        &self,
        ddl: &str,
        filename: Option<&str>,
    ) -> Result<SchemaUploadResponse, PipelineError> {
        let parsed = parse_ddl(ddl);
        if parsed.tables.is_empty() {
            return Err(SchemaError::Empty.into());
        }

        let schema_id = uuid::Uuid::new_v4().to_string();
        let name = filename
            .map(str::to_string)
            .unwrap_or_else(|| format!("schema-{}", &schema_id[..8]));
        let schema = SchemaAdapter::from_upload(&schema_id, &name, parsed)?;
        let tables_count = schema.tables.len();

        info!(
            "Registered schema {} ({}) with {} tables",
            schema_id, name, tables_count
        );

        self.schemas.write().await.insert(
            schema_id.clone(),
            StoredSchema {
                schema: Arc::new(schema),
                filename: filename.map(str::to_string),
                uploaded_at: Utc::now(),
            },
        );
        *self.latest.write().await = Some(schema_id.clone());

        Ok(SchemaUploadResponse {
            success: true,
            schema_id: Some(schema_id),
            tables_count,
            message: match filename {
                Some(file) => format!("Schema uploaded successfully from {}", file),
                None => "Schema uploaded successfully".to_string(),
            },
        })
    }

    pub async fn get(&self, schema_id: &str) -> Option<Arc<DatabaseSchema>> {
        self.schemas
            .read()
            .await
            .get(schema_id)
            .map(|stored| Arc::clone(&stored.schema))
    }

    pub async fn count(&self) -> usize {
        self.schemas.read().await.len()
    }

    /// An explicit id must exist. Without one, the latest upload wins, then the live database.
    pub async fn resolve(
        &self,
        schema_id: Option<&str>,
    ) -> Result<Arc<DatabaseSchema>, PipelineError> {
        if let Some(id) = schema_id {
            if id == LIVE_SCHEMA_ID {
                return self.introspect().await.map(Arc::new);
            }
            return self
                .get(id)
                .await
                .ok_or_else(|| PipelineError::Validation(format!("Unknown schema id: {}", id)));
        }

        let latest = self.latest.read().await.clone();
        if let Some(id) = latest {
            if let Some(schema) = self.get(&id).await {
                return Ok(schema);
            }
        }

        self.introspect().await.map(Arc::new)
    }

    pub async fn info(&self, schema_id: Option<&str>) -> Result<SchemaInfo, PipelineError> {
        match schema_id {
            Some(id) if id != LIVE_SCHEMA_ID => {
                let schemas = self.schemas.read().await;
                let stored = schemas.get(id).ok_or_else(|| {
                    PipelineError::Validation(format!("Unknown schema id: {}", id))
                })?;
                Ok(SchemaAdapter::to_info(
                    &stored.schema,
                    SchemaMetadata {
                        name: stored.schema.name.clone(),
                        source: "upload".to_string(),
                        filename: stored.filename.clone(),
                        uploaded_at: Some(stored.uploaded_at),
                    },
                ))
            }
            _ => self.introspect_info().await,
        }
    }

    pub async fn introspect(&self) -> Result<DatabaseSchema, PipelineError> {
        let info = self.introspect_info().await?;
        Ok(SchemaAdapter::from_info(info)?)
    }

    async fn introspect_info(&self) -> Result<SchemaInfo, PipelineError> {
        let Some(pool) = self.pool.clone() else {
            return Err(PipelineError::Validation(
                "No schema available; upload a schema first".to_string(),
            ));
        };

        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            read_schema_info(&conn).map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(e)) => {
                error!("Schema introspection failed: {}", e);
                Err(PipelineError::Execution(
                    "Failed to read the database schema".to_string(),
                ))
            }
            Err(join_err) => {
                warn!("Schema introspection task failed: {}", join_err);
                Err(PipelineError::Execution(
                    "Failed to read the database schema".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pool, SHOP_DDL};

    #[tokio::test]
    async fn upload_reports_tables_and_info_lists_columns() {
        let manager = SchemaManager::new(None);
        let response = manager.upload(SHOP_DDL, Some("shop.sql")).await.unwrap();
        assert!(response.success);
        assert_eq!(response.tables_count, 2);

        let schema_id = response.schema_id.unwrap();
        let info = manager.info(Some(&schema_id)).await.unwrap();
        assert_eq!(info.tables.len(), 2);
        assert!(info.tables.iter().all(|t| !t.columns.is_empty()));
        assert_eq!(info.metadata.filename.as_deref(), Some("shop.sql"));
        assert_eq!(info.relationships.len(), 1);
    }

    #[tokio::test]
    async fn text_without_tables_is_a_validation_error() {
        let manager = SchemaManager::new(None);
        let err = manager.upload("SELECT 1;", None).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_ids_and_missing_database_are_reported() {
        let manager = SchemaManager::new(None);
        assert!(matches!(
            manager.resolve(Some("nope")).await,
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(manager.resolve(None).await, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn resolve_prefers_latest_upload_then_live_database() {
        let pool = memory_pool();
        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE metrics (id INTEGER, value DOUBLE);")
            .unwrap();

        let manager = SchemaManager::new(Some(pool));
        let live = manager.resolve(None).await.unwrap();
        assert_eq!(live.id, LIVE_SCHEMA_ID);
        assert!(live.table("metrics").is_some());

        let uploaded = manager.upload(SHOP_DDL, None).await.unwrap();
        let resolved = manager.resolve(None).await.unwrap();
        assert_eq!(Some(resolved.id.clone()), uploaded.schema_id);
    }
}
