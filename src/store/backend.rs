//! Store Backend Traits
//!
//! The narrow key-value surface the namespaced cache needs, and the
//! connector that produces live backend handles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

// == Store Error ==
/// Failure talking to the key-value store.
///
/// `Clone` so one connect outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The connection is unusable; the adapter should reconnect
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store answered with an error; the connection is still usable
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Store Backend ==
/// Live handle to a key-value store.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value`; `ttl` of `None` means the entry never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Removes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Lists every live key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn ping(&self) -> StoreResult<()>;
}

// == Connector ==
/// Opens connections for the store adapter.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> StoreResult<Arc<dyn StoreBackend>>;

    /// Human-readable target, safe to log.
    fn describe(&self) -> String;
}
