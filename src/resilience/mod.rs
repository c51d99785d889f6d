//! Resilience Module
//!
//! Guards outbound calls to unreliable dependencies.
//!
//! - `with_retry`: bounded exponential backoff under an overall deadline
//! - `CircuitBreaker`: fails fast while a dependency keeps failing
//! - `UpstreamError`: the one typed error both return, with its classifier
//!
//! The two compose in either order:
//!
//! ```ignore
//! let breaker = registry.get_or_create("payments");
//! let invoice = breaker
//!     .execute(|| with_retry(|| gateway.fetch_invoice(id), RetryOptions::new(3, Duration::from_millis(100))))
//!     .await?;
//! ```

mod circuit_breaker;
mod error;
mod registry;
mod retry;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{classify_status, ErrorClass, UpstreamError, UpstreamResult};
pub use registry::BreakerRegistry;
pub use retry::{with_retry, RetryOptions, DEFAULT_BACKOFF_MULTIPLIER};
