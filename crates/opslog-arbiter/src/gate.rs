//! Cache-then-arbitrate composition used by data-fetching callers.

use std::future::Future;
use std::time::Duration;

use crate::arbiter::{Arbiter, CallMode, Outcome};
use crate::cache::ResultCache;

/// A result cache in front of an [`Arbiter`].
///
/// Hits never reach the arbiter. Misses are arbitrated, and only successful
/// results are written back; errors and ceiling rejections are not cached.
pub struct FetchGate<V> {
    arbiter: Arbiter,
    cache: ResultCache<V>,
}

impl<V> FetchGate<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(arbiter: Arbiter, ttl: Duration) -> Self {
        Self {
            arbiter,
            cache: ResultCache::new(ttl),
        }
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn cache(&self) -> &ResultCache<V> {
        &self.cache
    }

    pub async fn fetch<E, F, Fut>(&self, key: &str, mode: CallMode, op: F) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Clone + Send + Sync + 'static,
    {
        if let Some(hit) = self.cache.get(key) {
            tracing::trace!(key, "cache hit");
            return Ok(hit);
        }
        let value = self.arbiter.call(key, mode, op).await?;
        self.cache.set(key, value.clone());
        Ok(value)
    }
}
