use crate::nlp::{EntityType, QueryContext, UserQuery};
use crate::schema::DatabaseSchema;

/// Conversation turns forwarded to the SQL prompt.
pub const MAX_HISTORY_TURNS: usize = 3;

pub const INTENT_SYSTEM_PROMPT: &str = r#"
### Instructions:
You classify natural-language questions about a relational database by the SQL operation they ask for.
Choose exactly one intent:
- select: retrieve rows
- aggregate: summary statistics (count, sum, average, min, max)
- filter: rows restricted by conditions
- join: data combined from several tables
- update: modify existing rows
- delete: remove rows
- create: add tables or rows

### Response:
Return only a JSON object:
{"intent": "<one of the intents above>", "confidence": <0..1>, "explanation": "<one sentence>"}
"#;

pub fn intent_user_prompt(question: &str) -> String {
    format!("Query: {}", question)
}

pub fn entity_system_prompt(schema: Option<&DatabaseSchema>) -> String {
    let schema_section = match schema {
        Some(schema) => format!(
            "### Available tables and columns:\n{}\n",
            schema.to_prompt_context()
        ),
        None => String::new(),
    };

    format!(
        r#"
### Instructions:
Extract the entities from a natural-language database question that would help write SQL.
Entity types:
- table: a table named or implied
- column: a column named or implied
- value: a literal to filter by (numbers, quoted text, dates)
- operator: a comparison (=, >, <, LIKE, ...)
- function: an aggregate such as COUNT, SUM or AVG

{}
### Response:
Return only a JSON object:
{{"entities": [{{"type": "<type>", "value": "<text>", "confidence": <0..1>, "position": [<start>, <end>]}}]}}
Positions are character offsets into the question.
"#,
        schema_section
    )
}

pub fn entity_user_prompt(question: &str) -> String {
    format!("Query: {}", question)
}

pub fn sql_system_prompt(schema: &DatabaseSchema, context: Option<&QueryContext>) -> String {
    let mut prompt = String::from(
        r#"
### Instructions:
Your task is to convert a question into a SQL query for DuckDB, given a database schema.
Adhere to these rules:
- **Use the exact spelling of table and column names as provided in the schema**
- **Only generate read queries** (SELECT or WITH); never modify data or structure
- **Use Table Aliases** to prevent ambiguity when joining
- Add a LIMIT clause when the result could be large
- End your query with a semicolon

"#,
    );

    prompt.push_str(&schema.to_prompt_context());
    if !schema.tables.is_empty() {
        prompt.push_str("\n### DDL:\n```sql\n");
        prompt.push_str(&schema.to_ddl());
        prompt.push_str("\n```\n");
    }

    if let Some(context) = context {
        let start = context
            .previous_queries
            .len()
            .saturating_sub(MAX_HISTORY_TURNS);
        let recent = &context.previous_queries[start..];
        if !recent.is_empty() {
            prompt.push_str("\n### Previous conversation:\n");
            for turn in recent {
                prompt.push_str(&format!("- {}\n", turn));
            }
        }

        if !context.selected_tables.is_empty() {
            prompt.push_str(&format!(
                "\n### Tables the user selected:\n{}\n",
                context.selected_tables.join(", ")
            ));
        }

        if !context.filters.is_empty() {
            prompt.push_str("\n### Active filters:\n");
            for (name, value) in &context.filters {
                prompt.push_str(&format!("- {}: {}\n", name, value));
            }
        }

        if !context.preferences.is_empty() {
            prompt.push_str("\n### User preferences:\n");
            for (name, value) in &context.preferences {
                prompt.push_str(&format!("- {}: {}\n", name, value));
            }
        }
    }

    prompt.push_str(
        r#"
### Response:
Return only a JSON object:
{"sql_query": "<query>", "explanation": "<what it does>", "confidence": <0..1>, "suggested_modifications": ["<improvement>", ...]}
"#,
    );
    prompt
}

pub fn sql_user_prompt(query: &UserQuery) -> String {
    let mut prompt = format!("Convert this to SQL: {}", query.text);

    if let Some(intent) = &query.intent {
        prompt.push_str(&format!("\nDetected intent: {}", intent.intent_type));
    }

    let tables: Vec<&str> = query
        .entities
        .iter()
        .flatten()
        .filter(|e| e.entity_type == EntityType::Table)
        .map(|e| e.value.as_str())
        .collect();
    if !tables.is_empty() {
        prompt.push_str(&format!("\nMentioned tables: {}", tables.join(", ")));
    }

    prompt
}
