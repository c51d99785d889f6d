//! In-Memory Store Backend
//!
//! Process-local key-value store with TTL expiration and a capacity bound.
//! Used when no remote store is configured, and by tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::backend::{Connector, StoreBackend, StoreError, StoreResult};

// == Memory Entry ==
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    expires_at: Option<u64>,
    /// Logical clock of the last read or write, unique per entry
    last_touch: u64,
}

impl MemoryEntry {
    /// An entry is expired once the current time reaches its expiration time.
    fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|expires| now_ms >= expires)
    }
}

// == Memory Store ==
/// Entries plus two ordered indexes: recency (`last_touch` -> key) and
/// expiry (`(expires_at, last_touch)`). Reads, writes and evictions are
/// O(log n); `keys_with_prefix` scans every entry.
#[derive(Debug)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
    recency: BTreeMap<u64, String>,
    expiry: BTreeSet<(u64, u64)>,
    max_entries: usize,
    clock: u64,
    evictions: u64,
}

impl MemoryStore {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            expiry: BTreeSet::new(),
            max_entries: max_entries.max(1),
            clock: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn get(&mut self, key: &str) -> Option<String> {
        let now = current_timestamp_ms();
        if self.entries.get(key)?.is_expired_at(now) {
            self.unlink(key);
            return None;
        }

        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.last_touch, tick);
        if let Some(expires_at) = entry.expires_at {
            self.expiry.remove(&(expires_at, previous));
            self.expiry.insert((expires_at, tick));
        }
        if let Some(owned_key) = self.recency.remove(&previous) {
            self.recency.insert(tick, owned_key);
        }
        Some(entry.value.clone())
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let now = current_timestamp_ms();
        if self.unlink(key).is_none() && self.entries.len() >= self.max_entries {
            self.evict(now);
        }

        let last_touch = self.tick();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64));
        if let Some(expires_at) = expires_at {
            self.expiry.insert((expires_at, last_touch));
        }
        self.recency.insert(last_touch, key.to_string());
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
                last_touch,
            },
        );
    }

    /// Removes `key` from the entries and both indexes.
    fn unlink(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_touch);
        if let Some(expires_at) = entry.expires_at {
            self.expiry.remove(&(expires_at, entry.last_touch));
        }
        Some(entry)
    }

    /// Frees one slot: an expired entry if any, otherwise the least recently used.
    fn evict(&mut self, now: u64) {
        if let Some(&(expires_at, tick)) = self.expiry.first() {
            if expires_at <= now {
                if let Some(key) = self.recency.get(&tick).cloned() {
                    self.unlink(&key);
                    return;
                }
            }
        }

        let victim = self.recency.first_key_value().map(|(_, key)| key.clone());
        if let Some(key) = victim {
            self.unlink(&key);
            self.evictions += 1;
            debug!(key = %key, "Evicted least recently used entry");
        }
    }

    fn delete(&mut self, keys: &[String]) -> u64 {
        let now = current_timestamp_ms();
        keys.iter()
            .filter_map(|key| self.unlink(key))
            .filter(|entry| !entry.is_expired_at(now))
            .count() as u64
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = current_timestamp_ms();
        self.entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn purge_expired_at(&mut self, now: u64) -> usize {
        let mut removed = 0;
        while let Some(&(expires_at, tick)) = self.expiry.first() {
            if expires_at > now {
                break;
            }
            match self.recency.get(&tick).cloned() {
                Some(key) => {
                    self.unlink(&key);
                }
                None => {
                    self.expiry.remove(&(expires_at, tick));
                }
            }
            removed += 1;
        }
        removed
    }
}

// == Memory Backend ==
/// Shared handle to an in-process store. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryBackend {
    /// Creates an empty store holding at most `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::new(max_entries))),
        }
    }

    // == Purge Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.store
            .write()
            .await
            .purge_expired_at(current_timestamp_ms())
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn evictions(&self) -> u64 {
        self.store.read().await.evictions
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.store.write().await.get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(StoreError::Backend("TTL must be greater than zero".to_string()));
        }
        self.store.write().await.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        Ok(self.store.write().await.delete(keys))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self.store.read().await.keys_with_prefix(prefix))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(&self) -> StoreResult<Arc<dyn StoreBackend>> {
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
