//! Reconciles the canonical [`DatabaseSchema`] with the two wire shapes it travels in:
//! the upload shape (per-column foreign keys, as parsed from DDL) and the runtime-info
//! shape (table-level key lists, as reported by introspection and the info endpoint).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use crate::error::PipelineError;
use crate::schema::model::{
    Column, DatabaseSchema, ForeignKey, Relationship, RelationshipType, Table,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    DuplicateTable(String),
    DuplicateColumn { table: String, column: String },
    DanglingForeignKey { table: String, column: String, target: String },
    DanglingRelationship { from: String, to: String },
    UnknownRelationshipType(String),
    Empty,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::DuplicateTable(name) => write!(f, "Duplicate table name: {}", name),
            SchemaError::DuplicateColumn { table, column } => {
                write!(f, "Duplicate column name {} in table {}", column, table)
            }
            SchemaError::DanglingForeignKey { table, column, target } => write!(
                f,
                "Foreign key {}.{} references unknown column {}",
                table, column, target
            ),
            SchemaError::DanglingRelationship { from, to } => {
                write!(f, "Relationship {} -> {} names an unknown table", from, to)
            }
            SchemaError::UnknownRelationshipType(kind) => {
                write!(f, "Unknown relationship type: {}", kind)
            }
            SchemaError::Empty => write!(f, "Schema does not define any tables"),
        }
    }
}

impl Error for SchemaError {}

impl From<SchemaError> for PipelineError {
    fn from(err: SchemaError) -> Self {
        PipelineError::Validation(err.to_string())
    }
}

// Upload shape

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: Option<UploadedForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedTable {
    pub name: String,
    pub columns: Vec<UploadedColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedRelationship {
    pub from_table: String,
    pub to_table: String,
    pub relationship_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UploadedSchema {
    pub tables: Vec<UploadedTable>,
    #[serde(default)]
    pub relationships: Vec<UploadedRelationship>,
}

// Runtime-info shape

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub from_table: String,
    pub to_table: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub name: String,
    pub source: String,
    pub filename: Option<String>,
    pub uploaded_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub schema_id: String,
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub relationships: Vec<RelationshipInfo>,
    #[serde(default)]
    pub metadata: SchemaMetadata,
}

pub fn table_id(table: &str) -> String {
    format!("tbl_{}", table.to_lowercase())
}

/// `col_<table>.<column>`; the dot keeps `a_b.c` and `a.b_c` apart.
pub fn column_id(table: &str, column: &str) -> String {
    format!("col_{}.{}", table.to_lowercase(), column.to_lowercase())
}

/// Accepts the canonical spellings plus `many-to-one`, which is flipped into
/// `one-to-many` so every relationship reads parent to child.
pub fn parse_relationship(
    from_table: &str,
    to_table: &str,
    kind: &str,
) -> Result<Relationship, SchemaError> {
    let normalized = kind.trim().to_lowercase().replace('_', "-");
    let (from_table, to_table, relationship_type) = match normalized.as_str() {
        "one-to-one" => (from_table, to_table, RelationshipType::OneToOne),
        "one-to-many" => (from_table, to_table, RelationshipType::OneToMany),
        "many-to-one" => (to_table, from_table, RelationshipType::OneToMany),
        "many-to-many" => (from_table, to_table, RelationshipType::ManyToMany),
        _ => return Err(SchemaError::UnknownRelationshipType(kind.to_string())),
    };

    Ok(Relationship {
        from_table: from_table.to_string(),
        to_table: to_table.to_string(),
        relationship_type,
    })
}

pub struct SchemaAdapter;

impl SchemaAdapter {
    pub fn from_upload(
        schema_id: &str,
        name: &str,
        uploaded: UploadedSchema,
    ) -> Result<DatabaseSchema, SchemaError> {
        let tables = uploaded
            .tables
            .into_iter()
            .map(|table| Table {
                id: table_id(&table.name),
                columns: table
                    .columns
                    .into_iter()
                    .map(|column| Column {
                        id: column_id(&table.name, &column.name),
                        name: column.name,
                        data_type: column.data_type,
                        nullable: column.nullable,
                        primary_key: column.primary_key,
                        foreign_key: column.foreign_key.map(|fk| ForeignKey {
                            referenced_table: fk.table,
                            referenced_column: fk.column,
                        }),
                    })
                    .collect(),
                name: table.name,
            })
            .collect();

        let relationships = uploaded
            .relationships
            .iter()
            .map(|r| parse_relationship(&r.from_table, &r.to_table, &r.relationship_type))
            .collect::<Result<Vec<_>, _>>()?;

        let schema = DatabaseSchema {
            id: schema_id.to_string(),
            name: name.to_string(),
            tables,
            relationships,
        };
        Self::validate(&schema)?;
        Ok(schema)
    }

    pub fn to_upload(schema: &DatabaseSchema) -> UploadedSchema {
        UploadedSchema {
            tables: schema
                .tables
                .iter()
                .map(|table| UploadedTable {
                    name: table.name.clone(),
                    columns: table
                        .columns
                        .iter()
                        .map(|column| UploadedColumn {
                            name: column.name.clone(),
                            data_type: column.data_type.clone(),
                            nullable: column.nullable,
                            primary_key: column.primary_key,
                            foreign_key: column.foreign_key.as_ref().map(|fk| {
                                UploadedForeignKey {
                                    table: fk.referenced_table.clone(),
                                    column: fk.referenced_column.clone(),
                                }
                            }),
                        })
                        .collect(),
                })
                .collect(),
            relationships: schema
                .relationships
                .iter()
                .map(|r| UploadedRelationship {
                    from_table: r.from_table.clone(),
                    to_table: r.to_table.clone(),
                    relationship_type: r.relationship_type.as_str().to_string(),
                })
                .collect(),
        }
    }

    /// Table-level `primary_keys`/`foreign_keys` lists are folded back onto columns.
    /// A column is a primary key if either the flag or the list says so.
    pub fn from_info(info: SchemaInfo) -> Result<DatabaseSchema, SchemaError> {
        let mut tables = Vec::with_capacity(info.tables.len());

        for table in info.tables {
            let table_ident = table.id.clone().unwrap_or_else(|| table_id(&table.name));
            let columns = table
                .columns
                .into_iter()
                .map(|column| {
                    let listed_pk = table
                        .primary_keys
                        .iter()
                        .any(|pk| pk.eq_ignore_ascii_case(&column.name));
                    let foreign_key = table
                        .foreign_keys
                        .iter()
                        .find(|fk| fk.column.eq_ignore_ascii_case(&column.name))
                        .map(|fk| ForeignKey {
                            referenced_table: fk.referenced_table.clone(),
                            referenced_column: fk.referenced_column.clone(),
                        });

                    Column {
                        id: column
                            .id
                            .unwrap_or_else(|| column_id(&table.name, &column.name)),
                        name: column.name,
                        data_type: column.data_type,
                        nullable: column.nullable,
                        primary_key: column.primary_key || listed_pk,
                        foreign_key,
                    }
                })
                .collect::<Vec<_>>();

            for fk in &table.foreign_keys {
                if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(&fk.column)) {
                    return Err(SchemaError::DanglingForeignKey {
                        table: table.name.clone(),
                        column: fk.column.clone(),
                        target: format!("{}.{}", fk.referenced_table, fk.referenced_column),
                    });
                }
            }

            tables.push(Table {
                id: table_ident,
                name: table.name,
                columns,
            });
        }

        let relationships = info
            .relationships
            .iter()
            .map(|r| parse_relationship(&r.from_table, &r.to_table, &r.relationship_type))
            .collect::<Result<Vec<_>, _>>()?;

        let schema = DatabaseSchema {
            id: info.schema_id,
            name: info.metadata.name,
            tables,
            relationships,
        };
        Self::validate(&schema)?;
        Ok(schema)
    }

    pub fn to_info(schema: &DatabaseSchema, metadata: SchemaMetadata) -> SchemaInfo {
        SchemaInfo {
            schema_id: schema.id.clone(),
            tables: schema
                .tables
                .iter()
                .map(|table| TableInfo {
                    id: Some(table.id.clone()),
                    name: table.name.clone(),
                    columns: table
                        .columns
                        .iter()
                        .map(|column| ColumnInfo {
                            id: Some(column.id.clone()),
                            name: column.name.clone(),
                            data_type: column.data_type.clone(),
                            nullable: column.nullable,
                            primary_key: column.primary_key,
                        })
                        .collect(),
                    primary_keys: table
                        .primary_keys()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    foreign_keys: table
                        .columns
                        .iter()
                        .filter_map(|column| {
                            column.foreign_key.as_ref().map(|fk| ForeignKeyInfo {
                                column: column.name.clone(),
                                referenced_table: fk.referenced_table.clone(),
                                referenced_column: fk.referenced_column.clone(),
                            })
                        })
                        .collect(),
                })
                .collect(),
            relationships: schema
                .relationships
                .iter()
                .map(|r| RelationshipInfo {
                    from_table: r.from_table.clone(),
                    to_table: r.to_table.clone(),
                    relationship_type: r.relationship_type.as_str().to_string(),
                })
                .collect(),
            metadata,
        }
    }

    /// Names compare case-insensitively, matching how unquoted SQL identifiers resolve.
    pub fn validate(schema: &DatabaseSchema) -> Result<(), SchemaError> {
        let mut table_names = HashSet::new();
        for table in &schema.tables {
            if !table_names.insert(table.name.to_lowercase()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }

            let mut column_names = HashSet::new();
            for column in &table.columns {
                if !column_names.insert(column.name.to_lowercase()) {
                    return Err(SchemaError::DuplicateColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }

        for table in &schema.tables {
            for column in &table.columns {
                let Some(fk) = &column.foreign_key else {
                    continue;
                };
                let target_exists = schema
                    .table(&fk.referenced_table)
                    .and_then(|t| t.column(&fk.referenced_column))
                    .is_some();
                if !target_exists {
                    return Err(SchemaError::DanglingForeignKey {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        target: format!("{}.{}", fk.referenced_table, fk.referenced_column),
                    });
                }
            }
        }

        for rel in &schema.relationships {
            if schema.table(&rel.from_table).is_none() || schema.table(&rel.to_table).is_none() {
                return Err(SchemaError::DanglingRelationship {
                    from: rel.from_table.clone(),
                    to: rel.to_table.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_schema;

    fn column(name: &str, data_type: &str) -> UploadedColumn {
        UploadedColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            primary_key: false,
            foreign_key: None,
        }
    }

    #[test]
    fn upload_round_trip_is_lossless() {
        let schema = sample_schema();
        let uploaded = SchemaAdapter::to_upload(&schema);
        let rebuilt = SchemaAdapter::from_upload(&schema.id, &schema.name, uploaded).unwrap();
        assert_eq!(rebuilt, schema);
    }

    #[test]
    fn info_round_trip_is_lossless() {
        let schema = sample_schema();
        let info = SchemaAdapter::to_info(
            &schema,
            SchemaMetadata {
                name: schema.name.clone(),
                ..SchemaMetadata::default()
            },
        );
        assert_eq!(info.tables[1].foreign_keys[0].column, "user_id");
        assert_eq!(info.tables[0].primary_keys, vec!["id".to_string()]);

        let rebuilt = SchemaAdapter::from_info(info).unwrap();
        assert_eq!(rebuilt, schema);
    }

    #[test]
    fn synthetic_ids_are_assigned_when_missing() {
        let info = SchemaInfo {
            schema_id: "live".to_string(),
            tables: vec![TableInfo {
                id: None,
                name: "Users".to_string(),
                columns: vec![ColumnInfo {
                    id: None,
                    name: "Id".to_string(),
                    data_type: "INTEGER".to_string(),
                    nullable: false,
                    primary_key: false,
                }],
                primary_keys: vec!["id".to_string()],
                foreign_keys: vec![],
            }],
            relationships: vec![],
            metadata: SchemaMetadata::default(),
        };

        let schema = SchemaAdapter::from_info(info).unwrap();
        let table = &schema.tables[0];
        assert_eq!(table.id, "tbl_users");
        assert_eq!(table.columns[0].id, "col_users.id");
        assert!(table.columns[0].primary_key);
    }

    #[test]
    fn underscored_names_get_distinct_column_ids() {
        let uploaded = UploadedSchema {
            tables: vec![
                UploadedTable { name: "a_b".to_string(), columns: vec![column("c", "INT")] },
                UploadedTable { name: "a".to_string(), columns: vec![column("b_c", "INT")] },
            ],
            relationships: vec![],
        };
        let schema = SchemaAdapter::from_upload("s", "s", uploaded).unwrap();

        let first = &schema.tables[0].columns[0].id;
        let second = &schema.tables[1].columns[0].id;
        assert_eq!(first, "col_a_b.c");
        assert_eq!(second, "col_a.b_c");
        assert_ne!(first, second);
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let uploaded = UploadedSchema {
            tables: vec![
                UploadedTable { name: "users".to_string(), columns: vec![column("id", "INT")] },
                UploadedTable { name: "USERS".to_string(), columns: vec![column("id", "INT")] },
            ],
            relationships: vec![],
        };
        let err = SchemaAdapter::from_upload("s", "s", uploaded).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTable("USERS".to_string()));
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let uploaded = UploadedSchema {
            tables: vec![UploadedTable {
                name: "users".to_string(),
                columns: vec![column("email", "TEXT"), column("email", "VARCHAR")],
            }],
            relationships: vec![],
        };
        let err = SchemaAdapter::from_upload("s", "s", uploaded).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));

        let pipeline_err: PipelineError = err.into();
        assert_eq!(pipeline_err.kind(), "validation_error");
    }

    #[test]
    fn dangling_foreign_keys_are_rejected() {
        let mut fk_column = column("customer_id", "INT");
        fk_column.foreign_key = Some(UploadedForeignKey {
            table: "customers".to_string(),
            column: "id".to_string(),
        });
        let uploaded = UploadedSchema {
            tables: vec![UploadedTable { name: "orders".to_string(), columns: vec![fk_column] }],
            relationships: vec![],
        };
        let err = SchemaAdapter::from_upload("s", "s", uploaded).unwrap_err();
        assert!(matches!(err, SchemaError::DanglingForeignKey { .. }));
    }

    #[test]
    fn many_to_one_is_flipped() {
        let rel = parse_relationship("orders", "users", "many_to_one").unwrap();
        assert_eq!(rel.from_table, "users");
        assert_eq!(rel.to_table, "orders");
        assert_eq!(rel.relationship_type, RelationshipType::OneToMany);

        assert!(parse_relationship("a", "b", "sideways").is_err());
    }
}
