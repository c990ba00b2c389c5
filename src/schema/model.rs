use serde::{Deserialize, Serialize};

/// Coarse classification of a declared column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Integer,
    BigInt,
    Double,
    Decimal,
    String,
    Boolean,
    Date,
    Timestamp,
    Unknown(String),
}

impl DataType {
    pub fn from_declared(declared: &str) -> Self {
        let base = declared
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match base.as_str() {
            "int" | "integer" | "int4" | "smallint" | "tinyint" | "serial" => DataType::Integer,
            "bigint" | "int8" | "bigserial" | "hugeint" => DataType::BigInt,
            "double" | "float" | "float8" | "real" | "float4" => DataType::Double,
            "decimal" | "numeric" | "money" => DataType::Decimal,
            "varchar" | "text" | "char" | "string" | "nvarchar" | "character" | "uuid" => {
                DataType::String
            }
            "boolean" | "bool" => DataType::Boolean,
            "date" => DataType::Date,
            "timestamp" | "datetime" | "timestamptz" => DataType::Timestamp,
            _ => DataType::Unknown(declared.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::BigInt | DataType::Double | DataType::Decimal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    /// Declared type exactly as the source spelled it.
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKey>,
}

impl Column {
    pub fn kind(&self) -> DataType {
        DataType::from_declared(&self.data_type)
    }

    pub fn to_sql_definition(&self) -> String {
        let mut definition = format!("{} {}", self.name, self.data_type);
        if !self.nullable {
            definition.push_str(" NOT NULL");
        }
        if self.primary_key {
            definition.push_str(" PRIMARY KEY");
        }
        if let Some(fk) = &self.foreign_key {
            definition.push_str(&format!(
                " REFERENCES {}({})",
                fk.referenced_table, fk.referenced_column
            ));
        }
        definition
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn to_create_table_sql(&self) -> String {
        let columns_sql: Vec<String> = self
            .columns
            .iter()
            .map(|col| col.to_sql_definition())
            .collect();

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.name,
            columns_sql.join(",\n    ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::OneToOne => "one-to-one",
            RelationshipType::OneToMany => "one-to-many",
            RelationshipType::ManyToMany => "many-to-many",
        }
    }
}

/// Tables are referenced by name only, so no table owns another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub to_table: String,
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub id: String,
    pub name: String,
    pub tables: Vec<Table>,
    pub relationships: Vec<Relationship>,
}

impl DatabaseSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.column(name).is_some())
    }

    pub fn to_ddl(&self) -> String {
        self.tables
            .iter()
            .map(|t| t.to_create_table_sql())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Markdown rendering handed to the completion service as schema context.
    pub fn to_prompt_context(&self) -> String {
        let mut context = format!("# DATABASE SCHEMA: {}\n\n", self.name);

        if self.tables.is_empty() {
            context.push_str("No tables defined.\n");
            return context;
        }

        for table in &self.tables {
            context.push_str(&format!("### Table: {}\n\n", table.name));
            context.push_str("| Column Name | Data Type | Nullable | Key |\n");
            context.push_str("|------------|-----------|----------|-----|\n");

            for column in &table.columns {
                let key = match (&column.foreign_key, column.primary_key) {
                    (_, true) => "PK".to_string(),
                    (Some(fk), false) => {
                        format!("FK -> {}.{}", fk.referenced_table, fk.referenced_column)
                    }
                    (None, false) => String::new(),
                };
                context.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    column.name,
                    column.data_type,
                    if column.nullable { "YES" } else { "NO" },
                    key
                ));
            }
            context.push('\n');
        }

        if !self.relationships.is_empty() {
            context.push_str("### Relationships\n\n");
            for rel in &self.relationships {
                context.push_str(&format!(
                    "- {} {} {}\n",
                    rel.from_table,
                    rel.relationship_type.as_str(),
                    rel.to_table
                ));
            }
        }

        context
    }
}
