//! Cache Module
//!
//! Namespaced, TTL-based caching over the store adapter, plus the
//! get-or-compute and stale-while-revalidate access patterns.

mod namespaced;
mod patterns;
mod stats;


// Re-export public types
pub use namespaced::{
    qualified_key, CacheOptions, NamespacedCache, ANALYTICS_NAMESPACE, DEFAULT_NAMESPACE,
    VITALS_NAMESPACE,
};
pub use patterns::{stale_marker_key, SwrOptions, STALE_MARKER_SUFFIX};
pub use stats::{CacheStats, StatsSnapshot};
