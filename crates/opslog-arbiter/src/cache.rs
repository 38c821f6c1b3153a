//! Time-boxed results keyed by serialised parameters.
//!
//! A freshness cache, not a bounded-memory one: entries older than the TTL
//! are treated as absent and dropped when touched, and there is no size cap.
//! Callers are expected to use bounded key spaces.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    written_at: Instant,
}

pub struct ResultCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = entries
            .get(key)
            .map(|e| e.written_at.elapsed() < self.ttl)?;
        if fresh {
            entries.get(key).map(|e| e.value.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    /// Number of unexpired entries. Expired ones are purged as a side effect.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.written_at.elapsed() < self.ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `<operation>:<params as JSON>`. Two calls with equal parameters map to
/// the same key.
pub fn cache_key<P: Serialize + ?Sized>(operation: &str, params: &P) -> String {
    match serde_json::to_string(params) {
        Ok(json) => format!("{operation}:{json}"),
        Err(e) => {
            tracing::warn!(operation, error = %e, "cache key parameters did not serialise");
            operation.to_string()
        }
    }
}
