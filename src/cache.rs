use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::nlp::generator::Generation;
use crate::nlp::{Entity, QueryIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Intent,
    Entities,
    Sql,
}

/// Cache key: operation kind, normalized text, schema id and serialized context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    kind: OperationKind,
    text: String,
    schema_id: String,
    context: String,
}

impl Fingerprint {
    pub fn new(kind: OperationKind, text: &str, schema_id: Option<&str>, context: &str) -> Self {
        Self {
            kind,
            text: normalize_text(text),
            schema_id: schema_id.unwrap_or_default().to_string(),
            context: context.to_string(),
        }
    }
}

/// Trims and collapses runs of whitespace. Case is kept; identifiers can be case sensitive.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedResponse {
    Intent(QueryIntent),
    Entities(Vec<Entity>),
    Sql(Generation),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: CachedResponse,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-lifetime memo of completion-backed answers. Concurrent misses on the same key
/// may both call out; the later insert simply replaces the earlier one.
pub struct ResponseCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &Fingerprint) -> Option<CachedResponse> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {:?}", key.kind);
                Some(entry.response.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, key: Fingerprint, response: CachedResponse) {
        let mut entries = self.entries.write().await;
        if let Some(ttl) = self.ttl {
            entries.retain(|_, entry| entry.cached_at.elapsed() <= ttl);
        }
        entries.insert(
            key,
            CacheEntry {
                response,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        info!("Cleared {} cached responses", removed);
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(None)
    }
}
