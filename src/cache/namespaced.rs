//! Namespaced Cache
//!
//! JSON-serialized values stored under `{namespace}:{key}`. The cache is
//! advisory: every method answers with a sentinel (`None` / `false`) when the
//! store is unavailable or misbehaves, and never returns an error.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::store::StoreAdapter;

/// Namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";
pub const ANALYTICS_NAMESPACE: &str = "analytics";
pub const VITALS_NAMESPACE: &str = "vitals";

const NAMESPACE_SEPARATOR: char = ':';

// == Cache Options ==
/// Per-call options. `ttl` in seconds; `None` stores without expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<u64>,
    pub namespace: Option<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Builds the store key for `key` in `namespace`.
///
/// Namespaces must be non-empty and colon-free so that flushing one never
/// reaches into another; `None` is returned otherwise.
pub fn qualified_key(namespace: &str, key: &str) -> Option<String> {
    if !is_valid_namespace(namespace) {
        return None;
    }
    Some(format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, key))
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && !namespace.contains(NAMESPACE_SEPARATOR)
}

// == Namespaced Cache ==
/// Cheap to clone; clones share the store connection, counters and
/// revalidation guards.
#[derive(Debug, Clone)]
pub struct NamespacedCache {
    pub(super) adapter: StoreAdapter,
    pub(super) stats: Arc<CacheStats>,
    pub(super) revalidating: Arc<DashSet<String>>,
}

impl NamespacedCache {
    pub fn new(adapter: StoreAdapter) -> Self {
        Self {
            adapter,
            stats: Arc::new(CacheStats::new()),
            revalidating: Arc::new(DashSet::new()),
        }
    }

    pub fn adapter(&self) -> &StoreAdapter {
        &self.adapter
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // == Get ==
    /// Fetches and deserializes `key`. `None` on miss, on a value that does
    /// not deserialize as `T`, or when the store is unavailable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> Option<T> {
        self.lookup(key, options, true).await
    }

    /// Like [`get`](Self::get) but leaves the hit and miss counters alone.
    /// Used for bookkeeping entries such as freshness markers.
    pub(super) async fn get_uncounted<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &CacheOptions,
    ) -> Option<T> {
        self.lookup(key, options, false).await
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &CacheOptions,
        counted: bool,
    ) -> Option<T> {
        let full_key = self.qualify(options.namespace(), key)?;
        let Some(connection) = self.adapter.connection().await else {
            self.stats.record_unavailable();
            return None;
        };

        let raw = match connection.backend().get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %full_key, "Cache miss");
                if counted {
                    self.stats.record_miss();
                }
                return None;
            }
            Err(err) => {
                self.adapter.report(&connection, &err);
                self.stats.record_unavailable();
                warn!(key = %full_key, error = %err, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key = %full_key, "Cache hit");
                if counted {
                    self.stats.record_hit();
                }
                Some(value)
            }
            Err(err) => {
                if counted {
                    self.stats.record_miss();
                }
                warn!(key = %full_key, error = %err, "Cached value failed to deserialize");
                None
            }
        }
    }

    // == Set ==
    /// Serializes and stores `value`. False on any failure, including a
    /// zero TTL.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> bool {
        let Some(full_key) = self.qualify(options.namespace(), key) else {
            return false;
        };
        if options.ttl == Some(0) {
            warn!(key = %full_key, "Refusing to cache with a zero TTL");
            return false;
        }

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %full_key, error = %err, "Value failed to serialize");
                return false;
            }
        };
        let Some(connection) = self.adapter.connection().await else {
            self.stats.record_unavailable();
            return false;
        };

        let ttl = options.ttl.map(Duration::from_secs);
        match connection.backend().set(&full_key, &payload, ttl).await {
            Ok(()) => {
                debug!(key = %full_key, ttl_seconds = ?options.ttl, "Cache set");
                self.stats.record_write();
                true
            }
            Err(err) => {
                self.adapter.report(&connection, &err);
                self.stats.record_unavailable();
                warn!(key = %full_key, error = %err, "Cache write failed");
                false
            }
        }
    }

    // == Delete ==
    /// True iff an entry was actually removed.
    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> bool {
        let Some(full_key) = self.qualify(namespace.unwrap_or(DEFAULT_NAMESPACE), key) else {
            return false;
        };
        let Some(connection) = self.adapter.connection().await else {
            self.stats.record_unavailable();
            return false;
        };

        match connection.backend().delete(&[full_key.clone()]).await {
            Ok(removed) => {
                debug!(key = %full_key, removed, "Cache delete");
                removed > 0
            }
            Err(err) => {
                self.adapter.report(&connection, &err);
                self.stats.record_unavailable();
                warn!(key = %full_key, error = %err, "Cache delete failed");
                false
            }
        }
    }

    // == Flush ==
    /// Removes every entry in the namespace. True even when nothing matched;
    /// false only when the store could not be reached or failed.
    pub async fn flush(&self, namespace: Option<&str>) -> bool {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let Some(prefix) = self.qualify(namespace, "") else {
            return false;
        };
        let Some(connection) = self.adapter.connection().await else {
            self.stats.record_unavailable();
            return false;
        };

        let result = match connection.backend().keys_with_prefix(&prefix).await {
            Ok(keys) => connection.backend().delete(&keys).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(removed) => {
                debug!(namespace = %namespace, removed, "Cache namespace flushed");
                true
            }
            Err(err) => {
                self.adapter.report(&connection, &err);
                self.stats.record_unavailable();
                warn!(namespace = %namespace, error = %err, "Cache flush failed");
                false
            }
        }
    }

    fn qualify(&self, namespace: &str, key: &str) -> Option<String> {
        let full_key = qualified_key(namespace, key);
        if full_key.is_none() {
            warn!(namespace = %namespace, "Invalid cache namespace");
        }
        full_key
    }
}
