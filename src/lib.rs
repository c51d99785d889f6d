//! Resilient Cache - retry, circuit breaking and namespaced caching
//!
//! Guards calls to unreliable dependencies and caches their results in a
//! remote or in-process store that is allowed to be down.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod resilience;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheOptions, NamespacedCache, SwrOptions};
pub use config::Config;
pub use resilience::{
    with_retry, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, RetryOptions, UpstreamError,
};
pub use store::StoreAdapter;
pub use tasks::spawn_cleanup_task;
