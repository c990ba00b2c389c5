use duckdb::Connection;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::schema::adapter::{ColumnInfo, RelationshipInfo, SchemaInfo, SchemaMetadata, TableInfo};

pub const LIVE_SCHEMA_ID: &str = "live";

/// Reads the runtime-info shape of every user table in the connected database.
pub fn read_schema_info(conn: &Connection) -> Result<SchemaInfo, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type, is_nullable
         FROM information_schema.columns
         WHERE table_schema NOT IN ('information_schema', 'pg_catalog')
         ORDER BY table_name, ordinal_position",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?, // table_name
            row.get::<_, String>(1)?, // column_name
            row.get::<_, String>(2)?, // data_type
            row.get::<_, String>(3)? == "YES", // is_nullable
        ))
    })?;

    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();
    for row in rows {
        let (table_name, column_name, data_type, nullable) = row?;
        if table_name.starts_with("duck_") || table_name.starts_with("sqlite_") {
            continue;
        }
        tables
            .entry(table_name.clone())
            .or_insert_with(|| TableInfo {
                id: None,
                name: table_name,
                columns: Vec::new(),
                primary_keys: Vec::new(),
                foreign_keys: Vec::new(),
            })
            .columns
            .push(ColumnInfo {
                id: None,
                name: column_name,
                data_type,
                nullable,
                primary_key: false,
            });
    }

    match read_primary_keys(conn) {
        Ok(keys) => {
            for (table_name, column_name) in keys {
                if let Some(table) = tables.get_mut(&table_name) {
                    table.primary_keys.push(column_name);
                }
            }
        }
        Err(e) => debug!("Primary key lookup unavailable: {}", e),
    }

    let tables: Vec<TableInfo> = tables.into_values().collect();
    let relationships = infer_relationships(&tables);
    info!(
        "Introspected {} tables and inferred {} relationships",
        tables.len(),
        relationships.len()
    );

    Ok(SchemaInfo {
        schema_id: LIVE_SCHEMA_ID.to_string(),
        tables,
        relationships,
        metadata: SchemaMetadata {
            name: "live database".to_string(),
            source: "introspection".to_string(),
            filename: None,
            uploaded_at: None,
        },
    })
}

fn read_primary_keys(conn: &Connection) -> Result<Vec<(String, String)>, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT kcu.table_name, kcu.column_name
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage kcu
           ON tc.constraint_name = kcu.constraint_name AND tc.table_name = kcu.table_name
         WHERE tc.constraint_type = 'PRIMARY KEY'",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    rows.collect()
}

/// Introspection does not expose foreign keys reliably, so parent/child links are
/// inferred from `<table>_id` columns that point at a table with an `id` column.
pub fn infer_relationships(tables: &[TableInfo]) -> Vec<RelationshipInfo> {
    let mut relationships: Vec<RelationshipInfo> = Vec::new();

    for table in tables {
        for column in &table.columns {
            let lowered = column.name.to_lowercase();
            let Some(stem) = lowered.strip_suffix("_id") else {
                continue;
            };
            let parent = tables.iter().find(|other| {
                let name = other.name.to_lowercase();
                (name == stem || name == format!("{}s", stem))
                    && other.columns.iter().any(|c| c.name.eq_ignore_ascii_case("id"))
            });
            let Some(parent) = parent else {
                continue;
            };
            if parent.name == table.name {
                continue;
            }

            let relationship = RelationshipInfo {
                from_table: parent.name.clone(),
                to_table: table.name.clone(),
                relationship_type: "one-to-many".to_string(),
            };
            if !relationships.contains(&relationship) {
                relationships.push(relationship);
            }
        }
    }

    relationships
}
