use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::query::models::HistoryRecord;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Append-only execution log keyed by user. Records are complete before they are
/// published and are never changed afterwards. In-memory only.
pub struct HistoryStore {
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn append(&self, record: HistoryRecord) {
        debug!(
            "History: {} {} for {}",
            record.query_id,
            if record.success { "succeeded" } else { "failed" },
            record.user_id
        );
        self.records
            .write()
            .await
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
    }

    /// Newest first by `executed_at`; equal timestamps keep the later append first.
    pub async fn list(&self, user_id: &str, limit: usize, offset: usize) -> Vec<HistoryRecord> {
        let records = self.records.read().await;
        let Some(user_records) = records.get(user_id) else {
            return Vec::new();
        };

        let mut ordered: Vec<(usize, &HistoryRecord)> = user_records.iter().enumerate().collect();
        ordered.sort_by(|(a_idx, a), (b_idx, b)| {
            b.executed_at
                .cmp(&a.executed_at)
                .then_with(|| b_idx.cmp(a_idx))
        });

        ordered
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub async fn count(&self, user_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn total(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn record(user: &str, sql: &str, minutes_ago: i64) -> HistoryRecord {
        HistoryRecord {
            query_id: uuid::Uuid::new_v4().to_string(),
            sql: sql.to_string(),
            parameters: vec![],
            user_id: user.to_string(),
            executed_at: Utc::now() - Duration::minutes(minutes_ago),
            execution_time: 0.01,
            success: true,
            row_count: 1,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn lists_newest_first_with_paging() {
        let store = HistoryStore::new();
        store.append(record("ana", "SELECT 2;", 20)).await;
        store.append(record("ana", "SELECT 1;", 30)).await;
        store.append(record("ana", "SELECT 3;", 10)).await;
        store.append(record("bo", "SELECT 9;", 0)).await;

        let all = store.list("ana", 10, 0).await;
        let sql: Vec<&str> = all.iter().map(|r| r.sql.as_str()).collect();
        assert_eq!(sql, vec!["SELECT 3;", "SELECT 2;", "SELECT 1;"]);

        let page = store.list("ana", 1, 1).await;
        assert_eq!(page[0].sql, "SELECT 2;");
        assert!(store.list("ana", 10, 5).await.is_empty());
        assert!(store.list("nobody", 10, 0).await.is_empty());
    }

    #[tokio::test]
    async fn equal_timestamps_list_the_later_append_first() {
        let store = HistoryStore::new();
        let first = record("ana", "first", 0);
        let mut second = record("ana", "second", 0);
        second.executed_at = first.executed_at;
        store.append(first).await;
        store.append(second).await;

        assert_eq!(store.list("ana", 10, 0).await[0].sql, "second");
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(HistoryStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let user = if i % 2 == 0 { "even" } else { "odd" };
                store.append(record(user, &format!("SELECT {};", i), 0)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count("even").await, 16);
        assert_eq!(store.count("odd").await, 16);
        assert_eq!(store.total().await, 32);
    }
}
