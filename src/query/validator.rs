use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::schema::DatabaseSchema;

pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE", "INSERT", "UPDATE",
];

pub const DANGEROUS_OPERATION_ERROR: &str = "Query contains potentially dangerous operations";

pub const EMPTY_QUERY_ERROR: &str = "Query is empty";

/// Nominal estimate reported for admissible queries; a UI hint only.
pub const NOMINAL_EXECUTION_SECS: f64 = 0.1;

static DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:DROP|DELETE|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|INSERT|UPDATE)\b")
        .expect("valid denylist pattern")
});

static WILDCARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?\*|,\s*\*").expect("valid wildcard pattern")
});

static COMPARED_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:=|<>|\bI?LIKE)\s*([A-Za-z_][A-Za-z0-9_]*)(\s*[.(])?")
        .expect("valid comparison pattern")
});

static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][\w.]*)"#).expect("valid table reference pattern")
});

static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Za-z_]\w*)\s+AS\s*\(").expect("valid CTE pattern")
});

/// Words that may legitimately follow a comparison without quotes.
const VALUE_KEYWORDS: &[&str] = &[
    "TRUE", "FALSE", "NULL", "NOT", "ANY", "ALL", "SOME", "SELECT", "CASE", "INTERVAL", "DATE",
    "TIME", "TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "NOW", "EXISTS",
    "CAST",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub estimated_execution_time: f64,
}

/// Case-insensitive whole-word scan for denylisted operations. `created_at` and
/// `last_update` do not match; `DROP TABLE` or `delete from` do.
pub fn contains_dangerous_operation(sql: &str) -> bool {
    DANGEROUS.is_match(sql)
}

/// Lexical checks only; no parsing. The verdict depends on nothing but its arguments.
pub struct QueryValidator;

impl QueryValidator {
    pub fn validate(sql: &str, schema: Option<&DatabaseSchema>) -> ValidationVerdict {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        let trimmed = sql.trim();

        if trimmed.is_empty() {
            return ValidationVerdict {
                is_valid: false,
                errors: vec![EMPTY_QUERY_ERROR.to_string()],
                warnings,
                suggestions,
                estimated_execution_time: 0.0,
            };
        }

        let dangerous = contains_dangerous_operation(sql);
        if dangerous {
            errors.push(DANGEROUS_OPERATION_ERROR.to_string());
        }

        if !trimmed.ends_with(';') {
            warnings.push("Query should end with semicolon".to_string());
            suggestions.push("Add semicolon at the end".to_string());
        }

        let leading = trimmed
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default()
            .to_uppercase();
        if leading != "SELECT" && leading != "WITH" {
            warnings.push("Only SELECT queries are recommended for safety".to_string());
        }

        let masked = mask_literals(trimmed);

        if WILDCARD.is_match(&masked) {
            warnings.push("Using SELECT * may impact performance".to_string());
            suggestions.push("Specify explicit column names".to_string());
        }

        let bare = bare_identifiers(&masked, schema);
        if !bare.is_empty() {
            warnings.push(format!(
                "Unquoted identifier where a string literal is expected: {}",
                bare.join(", ")
            ));
            suggestions.push("Wrap text values in single quotes".to_string());
        }

        if let Some(schema) = schema {
            for table in unknown_tables(&masked, schema) {
                suggestions.push(format!(
                    "Table '{}' is not in schema '{}'; check the table name",
                    table, schema.name
                ));
            }
        }

        ValidationVerdict {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
            estimated_execution_time: if dangerous { 0.0 } else { NOMINAL_EXECUTION_SECS },
        }
    }
}

/// Table names after FROM/JOIN, schema qualifiers dropped, in first-seen order.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let masked = mask_literals(sql);
    let ctes: BTreeSet<String> = CTE_NAME
        .captures_iter(&masked)
        .map(|c| c[1].to_lowercase())
        .collect();

    let mut tables: Vec<String> = Vec::new();
    for captures in TABLE_REFERENCE.captures_iter(&masked) {
        let name = captures[1].rsplit('.').next().unwrap_or_default().to_string();
        if name.is_empty() || ctes.contains(&name.to_lowercase()) {
            continue;
        }
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            tables.push(name);
        }
    }
    tables
}

fn unknown_tables(masked: &str, schema: &DatabaseSchema) -> Vec<String> {
    referenced_tables(masked)
        .into_iter()
        // EXTRACT(YEAR FROM created_at) names a column, not a table
        .filter(|name| schema.table(name).is_none() && !schema.has_column(name))
        .collect()
}

fn bare_identifiers(masked: &str, schema: Option<&DatabaseSchema>) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for captures in COMPARED_WORD.captures_iter(masked) {
        if captures.get(2).is_some() {
            // qualified column or function call
            continue;
        }
        let word = &captures[1];
        let upper = word.to_uppercase();
        if VALUE_KEYWORDS.contains(&upper.as_str()) {
            continue;
        }
        if schema.is_some_and(|s| s.has_column(word) || s.table(word).is_some()) {
            continue;
        }
        if !found.iter().any(|w| w == word) {
            found.push(word.to_string());
        }
    }

    found
}

/// Blanks the contents of quoted strings and identifiers and drops `--` comments, so
/// pattern checks only see SQL structure.
fn mask_literals(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                masked.push(ch);
                masked.push(ch);
                while let Some(inner) = chars.next() {
                    if inner == ch {
                        // doubled quote is an escape
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        masked.push('\n');
                        break;
                    }
                }
            }
            _ => masked.push(ch),
        }
    }

    masked
}
