//! Cache Access Patterns
//!
//! `get_or_compute` and `stale_while_revalidate` on top of the namespaced
//! cache. Concurrent misses on `get_or_compute` each run their fetcher;
//! requests are not coalesced.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::namespaced::{CacheOptions, NamespacedCache};

/// Suffix of the sibling entry holding the "fresh until" epoch milliseconds.
pub const STALE_MARKER_SUFFIX: &str = ":stale";

/// Key of the freshness marker for `key`.
///
/// The marker lives in the same namespace as the value, so keys ending in
/// [`STALE_MARKER_SUFFIX`] are reserved for markers once a namespace is used
/// with [`NamespacedCache::stale_while_revalidate`].
pub fn stale_marker_key(key: &str) -> String {
    format!("{}{}", key, STALE_MARKER_SUFFIX)
}

// == SWR Options ==
/// Options for [`NamespacedCache::stale_while_revalidate`].
///
/// Each value is paired with a marker at `{key}:stale` in the same
/// namespace. Do not store your own entries under that suffix there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwrOptions {
    /// How long a stored value counts as fresh
    pub stale_time: Duration,
    /// TTL and namespace for both the value and its marker
    pub cache: CacheOptions,
}

impl SwrOptions {
    pub fn new(stale_time: Duration) -> Self {
        Self {
            stale_time,
            cache: CacheOptions::default(),
        }
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.cache.ttl = Some(seconds);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache.namespace = Some(namespace.into());
        self
    }
}

/// Clears the in-flight mark for a key when the revalidation task ends.
struct RevalidationGuard {
    in_flight: Arc<DashSet<String>>,
    key: String,
}

impl Drop for RevalidationGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

impl NamespacedCache {
    // == Get Or Compute ==
    /// Returns the cached value, or runs `fetcher`, caches its result and
    /// returns it. A fetcher error is returned as-is and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key, options).await {
            return Ok(cached);
        }

        let value = fetcher().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    // == Stale While Revalidate ==
    /// Serves cached data immediately and refreshes it in the background
    /// once it is older than `stale_time`.
    ///
    /// - fresh value: returned, fetcher not run
    /// - stale value: returned, fetcher spawned; its result replaces the
    ///   value and marker, its failure is logged
    /// - nothing cached: fetcher awaited, result stored and returned
    ///
    /// At most one background revalidation per key runs in this process.
    pub async fn stale_while_revalidate<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: &SwrOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if key.ends_with(STALE_MARKER_SUFFIX) {
            warn!(key = %key, "Key uses the reserved freshness marker suffix, bypassing cache");
            return fetcher().await;
        }

        if let Some(cached) = self.get::<T>(key, &options.cache).await {
            let fresh_until: Option<i64> = self
                .get_uncounted(&stale_marker_key(key), &options.cache)
                .await;
            let now = Utc::now().timestamp_millis();
            if fresh_until.is_some_and(|until| until > now) {
                return Ok(cached);
            }

            self.spawn_revalidation(key, fetcher, options);
            return Ok(cached);
        }

        let value = fetcher().await?;
        self.store_fresh(key, &value, options).await;
        Ok(value)
    }

    fn spawn_revalidation<T, E, F, Fut>(&self, key: &str, fetcher: F, options: &SwrOptions)
    where
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let guard_key = format!("{}:{}", options.cache.namespace(), key);
        if !self.revalidating.insert(guard_key.clone()) {
            debug!(key = %guard_key, "Revalidation already in flight");
            return;
        }
        let guard = RevalidationGuard {
            in_flight: self.revalidating.clone(),
            key: guard_key,
        };

        debug!(key = %guard.key, "Serving stale value, revalidating in background");
        let cache = self.clone();
        let key = key.to_string();
        let options = options.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match fetcher().await {
                Ok(value) => {
                    if cache.store_fresh(&key, &value, &options).await {
                        debug!(key = %key, "Background revalidation stored");
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Background revalidation failed");
                }
            }
        });
    }

    /// Stores `value` and a marker saying it is fresh for `stale_time`.
    async fn store_fresh<T: Serialize + Sync>(&self, key: &str, value: &T, options: &SwrOptions) -> bool {
        let fresh_until = Utc::now().timestamp_millis() + options.stale_time.as_millis() as i64;
        self.set(key, value, &options.cache).await
            && self.set(&stale_marker_key(key), &fresh_until, &options.cache).await
    }
}
