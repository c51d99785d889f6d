//! Store Adapter
//!
//! Lazy-connecting, self-healing handle to the key-value store.
//!
//! The connection moves through one lifecycle shared by every caller:
//!
//! ```text
//! Disconnected --first use--> Connecting --ok--> Ready --connection error--> Disconnected
//!                                  |
//!                                  +--err--> Failed --backoff elapsed, next use--> Connecting
//! ```
//!
//! A connect runs in its own task; every caller arriving while it is in
//! flight awaits the same shared result, so concurrent cache calls never
//! open duplicate connections. Callers that find the store unavailable get
//! `None` and degrade; nothing here ever returns an error to the cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::backend::{Connector, StoreBackend, StoreError, StoreResult};

// == Reconnect Policy ==
/// Connect timeout and capped exponential backoff between failed connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub connect_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Wait imposed after the given number of consecutive failed connects.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

// == Connection ==
/// A ready backend handle, tagged with the connect that produced it.
#[derive(Clone)]
pub struct Connection {
    generation: u64,
    backend: Arc<dyn StoreBackend>,
}

impl Connection {
    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }
}

type PendingConnect = Shared<BoxFuture<'static, StoreResult<Connection>>>;

enum ConnectionState {
    Disconnected,
    Connecting {
        generation: u64,
        pending: PendingConnect,
    },
    Ready(Connection),
    Failed {
        error: StoreError,
        failures: u32,
        retry_at: Instant,
    },
}

impl ConnectionState {
    fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Ready(_) => "ready",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

struct AdapterInner {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    ready: AtomicBool,
    target: String,
}

// == Store Adapter ==
/// Shared store handle. Clones share one connection lifecycle.
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("target", &self.inner.target)
            .field("state", &self.state_label())
            .finish()
    }
}

impl StoreAdapter {
    /// Creates the adapter without connecting; the first cache call connects.
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let target = connector.describe();
        Self {
            inner: Arc::new(AdapterInner {
                connector,
                policy,
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                ready: AtomicBool::new(false),
                target,
            }),
        }
    }

    /// True while a live connection is held.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn state_label(&self) -> &'static str {
        self.inner.state.lock().label()
    }

    /// Error from the most recent failed connect, while in the failed state.
    pub fn last_error(&self) -> Option<String> {
        match &*self.inner.state.lock() {
            ConnectionState::Failed { error, .. } => Some(error.to_string()),
            _ => None,
        }
    }

    /// Redacted description of the store target.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    // == Connection ==
    /// Returns a ready connection, connecting or reconnecting if needed.
    ///
    /// Returns `None` when the store is unavailable: the connect failed, or
    /// the previous failure's backoff has not elapsed yet.
    pub async fn connection(&self) -> Option<Connection> {
        let pending = {
            let mut state = self.inner.state.lock();
            match &*state {
                ConnectionState::Ready(connection) => return Some(connection.clone()),
                ConnectionState::Connecting { pending, .. } => pending.clone(),
                ConnectionState::Failed {
                    retry_at, failures, ..
                } => {
                    if Instant::now() < *retry_at {
                        return None;
                    }
                    let failures = *failures;
                    self.begin_connect(&mut state, failures)
                }
                ConnectionState::Disconnected => self.begin_connect(&mut state, 0),
            }
        };

        match pending.await {
            Ok(connection) => Some(connection),
            Err(err) => {
                debug!(store = %self.inner.target, error = %err, "Cache store unavailable");
                None
            }
        }
    }

    fn begin_connect(&self, state: &mut ConnectionState, failures: u32) -> PendingConnect {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(store = %self.inner.target, generation, "Connecting to cache store");

        let task = tokio::spawn(self.inner.clone().run_connect(generation, failures));
        let inner = self.inner.clone();
        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    let result = Err(StoreError::Connection(format!(
                        "Connect task aborted: {}",
                        join_err
                    )));
                    inner.settle(generation, failures, &result);
                    result
                }
            }
        }
        .boxed()
        .shared();

        *state = ConnectionState::Connecting {
            generation,
            pending: pending.clone(),
        };
        pending
    }

    // == Report ==
    /// Tells the adapter an operation on `connection` failed.
    ///
    /// Connection-class errors drop the handle so the next call reconnects.
    /// Command errors leave the connection in place.
    pub fn report(&self, connection: &Connection, error: &StoreError) {
        if !error.is_connection() {
            return;
        }
        let mut state = self.inner.state.lock();
        if matches!(&*state, ConnectionState::Ready(current) if current.generation == connection.generation)
        {
            *state = ConnectionState::Disconnected;
            self.inner.ready.store(false, Ordering::Release);
            warn!(store = %self.inner.target, error = %error, "Cache store connection lost, will reconnect");
        }
    }

    /// Round-trips to the store. False when unavailable.
    pub async fn ping(&self) -> bool {
        let Some(connection) = self.connection().await else {
            return false;
        };
        match connection.backend().ping().await {
            Ok(()) => true,
            Err(err) => {
                self.report(&connection, &err);
                false
            }
        }
    }
}

impl AdapterInner {
    async fn run_connect(self: Arc<Self>, generation: u64, failures: u32) -> StoreResult<Connection> {
        let result = match tokio::time::timeout(self.policy.connect_timeout, self.connector.connect()).await {
            Ok(Ok(backend)) => Ok(Connection {
                generation,
                backend,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StoreError::Connection(format!(
                "Connect timed out after {}ms",
                self.policy.connect_timeout.as_millis()
            ))),
        };
        self.settle(generation, failures, &result);
        result
    }

    /// Publishes a connect outcome, unless a newer lifecycle replaced it.
    fn settle(&self, generation: u64, failures: u32, result: &StoreResult<Connection>) {
        let mut state = self.state.lock();
        let current = matches!(
            &*state,
            ConnectionState::Connecting { generation: g, .. } if *g == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(connection) => {
                *state = ConnectionState::Ready(connection.clone());
                self.ready.store(true, Ordering::Release);
                info!(store = %self.target, "Cache store connected");
            }
            Err(error) => {
                let failures = failures.saturating_add(1);
                let delay = self.policy.backoff(failures);
                *state = ConnectionState::Failed {
                    error: error.clone(),
                    failures,
                    retry_at: Instant::now() + delay,
                };
                self.ready.store(false, Ordering::Release);
                warn!(
                    store = %self.target,
                    error = %error,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Cache store connect failed"
                );
            }
        }
    }
}
