use regex::Regex;
use std::sync::LazyLock;

use crate::schema::adapter::{
    UploadedColumn, UploadedForeignKey, UploadedRelationship, UploadedSchema, UploadedTable,
};

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bCREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([`"\[\]\w.]+)\s*\("#)
        .expect("valid CREATE TABLE pattern")
});

static REFERENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bREFERENCES\s+([`"\[\]\w.]+)\s*\(\s*([`"\[\]\w]+)\s*\)"#)
        .expect("valid REFERENCES pattern")
});

static TABLE_FOREIGN_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^FOREIGN\s+KEY\s*\(\s*([`"\[\]\w]+)\s*\)"#).expect("valid FOREIGN KEY pattern")
});

static TABLE_PRIMARY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^PRIMARY\s+KEY\s*\(([^)]*)\)").expect("valid PRIMARY KEY pattern")
});

/// Words that end a column's declared type and start its constraints.
const CONSTRAINT_WORDS: &[&str] = &[
    "NOT", "NULL", "PRIMARY", "REFERENCES", "DEFAULT", "UNIQUE", "CHECK", "CONSTRAINT",
    "AUTO_INCREMENT", "AUTOINCREMENT", "COLLATE", "GENERATED", "IDENTITY",
];

/// Lexical `CREATE TABLE` reader. It does not validate SQL; anything it cannot
/// recognise as a column or key clause is skipped.
pub fn parse_ddl(ddl: &str) -> UploadedSchema {
    let mut tables = Vec::new();

    for captures in CREATE_TABLE.captures_iter(ddl) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Some(body) = balanced_body(&ddl[whole.end()..]) else {
            continue;
        };

        let table_name = unqualify(name.as_str());
        tables.push(parse_table(&table_name, body));
    }

    let relationships = infer_relationships(&tables);
    UploadedSchema { tables, relationships }
}

fn parse_table(name: &str, body: &str) -> UploadedTable {
    let mut columns: Vec<UploadedColumn> = Vec::new();
    let mut table_primary_keys = Vec::new();
    let mut table_foreign_keys = Vec::new();

    for item in split_top_level(body) {
        let mut item = item.trim();
        if item.is_empty() {
            continue;
        }

        // CONSTRAINT <name> <clause>
        if starts_with_word(item, "CONSTRAINT") {
            let mut parts = item.splitn(3, char::is_whitespace);
            parts.next();
            parts.next();
            item = parts.next().unwrap_or_default().trim();
        }

        if let Some(pk) = TABLE_PRIMARY_KEY.captures(item) {
            table_primary_keys.extend(pk[1].split(',').map(|c| strip_quotes(c.trim())));
            continue;
        }

        if let Some(fk) = TABLE_FOREIGN_KEY.captures(item) {
            if let Some(target) = REFERENCES.captures(item) {
                table_foreign_keys.push((
                    strip_quotes(&fk[1]),
                    UploadedForeignKey {
                        table: unqualify(&target[1]),
                        column: strip_quotes(&target[2]),
                    },
                ));
            }
            continue;
        }

        if ["UNIQUE", "CHECK", "INDEX", "KEY", "EXCLUDE"]
            .iter()
            .any(|word| starts_with_word(item, word))
        {
            continue;
        }

        if let Some(column) = parse_column(item) {
            columns.push(column);
        }
    }

    for column in &mut columns {
        if table_primary_keys
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(&column.name))
        {
            column.primary_key = true;
            column.nullable = false;
        }
        if let Some((_, fk)) = table_foreign_keys
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(&column.name))
        {
            column.foreign_key = Some(fk.clone());
        }
    }

    UploadedTable {
        name: name.to_string(),
        columns,
    }
}

fn parse_column(item: &str) -> Option<UploadedColumn> {
    let mut words = item.split_whitespace();
    let name = strip_quotes(words.next()?);

    let mut type_words = Vec::new();
    for word in words.by_ref() {
        let upper = word.to_uppercase();
        if CONSTRAINT_WORDS.contains(&upper.as_str()) {
            break;
        }
        type_words.push(upper);
    }
    if type_words.is_empty() {
        return None;
    }

    let upper = item.to_uppercase();
    let primary_key = upper.contains("PRIMARY KEY");
    let foreign_key = REFERENCES.captures(item).map(|target| UploadedForeignKey {
        table: unqualify(&target[1]),
        column: strip_quotes(&target[2]),
    });

    Some(UploadedColumn {
        name,
        data_type: type_words.join(" "),
        nullable: !upper.contains("NOT NULL") && !primary_key,
        primary_key,
        foreign_key,
    })
}

/// Each foreign key yields a parent-to-child relationship; a foreign key that is also
/// the table's sole primary key makes it one-to-one.
fn infer_relationships(tables: &[UploadedTable]) -> Vec<UploadedRelationship> {
    let mut relationships: Vec<UploadedRelationship> = Vec::new();

    for table in tables {
        let pk_count = table.columns.iter().filter(|c| c.primary_key).count();
        for column in &table.columns {
            let Some(fk) = &column.foreign_key else {
                continue;
            };
            let relationship_type = if column.primary_key && pk_count == 1 {
                "one-to-one"
            } else {
                "one-to-many"
            };
            let relationship = UploadedRelationship {
                from_table: fk.table.clone(),
                to_table: table.name.clone(),
                relationship_type: relationship_type.to_string(),
            };
            if !relationships.contains(&relationship) {
                relationships.push(relationship);
            }
        }
    }

    relationships
}

/// Returns the text up to the parenthesis closing the one already consumed.
fn balanced_body(rest: &str) -> Option<&str> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in rest.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas that are not nested inside parentheses, so `DECIMAL(10, 2)` stays whole.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(&body[start..]);
    items
}

fn starts_with_word(item: &str, word: &str) -> bool {
    item.split_whitespace()
        .next()
        .map(|first| first.eq_ignore_ascii_case(word))
        .unwrap_or(false)
}

fn strip_quotes(ident: &str) -> String {
    ident
        .trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'))
        .to_string()
}

fn unqualify(ident: &str) -> String {
    let stripped = strip_quotes(ident);
    stripped
        .rsplit('.')
        .next()
        .map(strip_quotes)
        .unwrap_or(stripped)
}
