//! Query Result Cache
//!
//! LRU cache of analytical results, scoped to one dataset version.
//! Partition files are write-once and the manifest version changes on
//! every publish, so a cached result is valid exactly as long as the
//! version it was computed against. On the first lookup with a newer
//! version the whole cache is dropped; stale entries can never be served.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::types::{AggregateRow, AuthSummaryRow, ConnectionActivityRow, TrendPoint};

/// Cached result payloads, one variant per operation family.
#[derive(Debug)]
pub enum CachedEntry {
    Aggregates(Vec<AggregateRow>),
    AuthSummary(Vec<AuthSummaryRow>),
    Connections(Vec<ConnectionActivityRow>),
    Trend(Vec<TrendPoint>),
    Rows(Vec<serde_json::Value>),
}

struct Inner {
    dataset_version: u64,
    entries: LruCache<String, Arc<CachedEntry>>,
}

pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            inner: Mutex::new(Inner {
                dataset_version: 0,
                entries: LruCache::new(capacity),
            }),
        }
    }

    /// Look up a result computed against `dataset_version`. A version
    /// newer than the cache's clears every entry first.
    pub async fn get(&self, dataset_version: u64, key: &str) -> Option<Arc<CachedEntry>> {
        let mut inner = self.inner.lock().await;
        if inner.dataset_version != dataset_version {
            tracing::debug!(
                old_version = inner.dataset_version,
                new_version = dataset_version,
                "dataset version changed, clearing query cache"
            );
            inner.entries.clear();
            inner.dataset_version = dataset_version;
            return None;
        }
        inner.entries.get(key).cloned()
    }

    pub async fn put(&self, dataset_version: u64, key: String, entry: Arc<CachedEntry>) {
        let mut inner = self.inner.lock().await;
        if inner.dataset_version != dataset_version {
            inner.entries.clear();
            inner.dataset_version = dataset_version;
        }
        inner.entries.put(key, entry);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
