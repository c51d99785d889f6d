//! Store Module
//!
//! Connection management and backends for the key-value store behind the cache.

mod adapter;
mod backend;
mod memory;
mod redis;

pub use adapter::{Connection, ReconnectPolicy, StoreAdapter};
pub use backend::{Connector, StoreBackend, StoreError, StoreResult};
pub use memory::{current_timestamp_ms, MemoryBackend};
pub use self::redis::{redact_url, RedisBackend, RedisConnector};
