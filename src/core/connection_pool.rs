use crate::config::CacheConfig;
use crate::core::connection::{DialSettings, StoreConnection};
use crate::core::error::{CacheError, CacheResult};
use crate::core::metrics::{PoolMetrics, PoolMetricsSnapshot};
use async_trait::async_trait;
use bb8::{ErrorSink, Pool, RunError};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// bb8 needs a finite size; `max_active: 0` maps to this.
const UNBOUNDED_MAX_ACTIVE: u32 = u32::MAX;

/// Upper bound on how often idle connections are swept.
const MAX_REAPER_RATE: Duration = Duration::from_secs(30);

/// Connection manager for bb8 that dials, authenticates and selects the database
#[derive(Debug, Clone)]
pub struct StoreConnectionManager {
    settings: DialSettings,
    idle_timeout: Option<Duration>,
    metrics: Arc<PoolMetrics>,
}

impl StoreConnectionManager {
    pub fn new(
        settings: DialSettings,
        idle_timeout: Option<Duration>,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        Self {
            settings,
            idle_timeout,
            metrics,
        }
    }
}

#[async_trait]
impl bb8::ManageConnection for StoreConnectionManager {
    type Connection = StoreConnection;
    type Error = CacheError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.metrics.record_dial();
        StoreConnection::dial(&self.settings).await.map_err(|e| {
            self.metrics.record_dial_failure();
            warn!("Dial to {} failed: {}", self.settings.addr, e);
            e
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if let Some(limit) = self.idle_timeout {
            let idle = conn.idle_for();
            if idle >= limit {
                self.metrics.record_idle_expired();
                debug!("Connection idle for {:?}, discarding", idle);
                return Err(CacheError::IdleExpired(idle));
            }
        }

        conn.ping().await.map_err(|e| {
            self.metrics.record_probe_failure();
            debug!("Liveness probe failed, discarding connection: {}", e);
            e
        })
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

/// Keeps the most recent dial error so a timed-out borrow can report why.
///
/// bb8 also forwards failed checkout probes here. Those belong to whichever
/// borrower ran the probe and are dropped.
#[derive(Debug, Clone, Default)]
struct DialErrorSink {
    last: Arc<Mutex<Option<(Instant, CacheError)>>>,
}

impl DialErrorSink {
    fn take_since(&self, since: Instant) -> Option<CacheError> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.take() {
            Some((at, error)) if at >= since => Some(error),
            _ => None,
        }
    }
}

impl ErrorSink<CacheError> for DialErrorSink {
    fn sink(&self, error: CacheError) {
        if !error.is_dial_failure() {
            return;
        }
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some((Instant::now(), error));
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<CacheError>> {
        Box::new(self.clone())
    }
}

/// Occupancy of the pool at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle and borrowed.
    pub connections: u32,
    pub idle: u32,
    /// Connections currently borrowed by callers.
    pub in_use: usize,
}

/// Outcome of [`ConnectionPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every outstanding borrow came back within the grace period.
    pub drained: bool,
    /// Borrows still outstanding when the pool was closed.
    pub abandoned: usize,
}

struct PoolShared {
    pool: RwLock<Option<Pool<StoreConnectionManager>>>,
    closed: AtomicBool,
    max_idle: u32,
    in_use: AtomicUsize,
    returned: Notify,
    closing: Notify,
    dial_errors: DialErrorSink,
    metrics: Arc<PoolMetrics>,
}

/// Bounded set of store connections with borrow/return semantics.
///
/// Cloning is cheap and every clone refers to the same pool. Connections are
/// dialed lazily on first borrow. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a pool from configuration. No connection is dialed yet.
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let metrics = Arc::new(PoolMetrics::new(config.addr.clone()));
        let idle_timeout =
            (config.idle_timeout_secs > 0).then(|| Duration::from_secs(config.idle_timeout_secs));
        let manager = StoreConnectionManager::new(
            DialSettings::from(config),
            idle_timeout,
            Arc::clone(&metrics),
        );
        let dial_errors = DialErrorSink::default();

        let max_size = if config.max_active == 0 {
            UNBOUNDED_MAX_ACTIVE
        } else {
            config.max_active
        };
        let reaper_rate = idle_timeout.map_or(MAX_REAPER_RATE, |t| t.min(MAX_REAPER_RATE));

        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(None)
            .max_lifetime(None)
            .idle_timeout(idle_timeout)
            .reaper_rate(reaper_rate)
            .connection_timeout(Duration::from_millis(config.wait_timeout_ms))
            .test_on_check_out(true)
            .retry_connection(false)
            .error_sink(Box::new(dial_errors.clone()))
            .build_unchecked(manager);

        info!(
            "Connection pool for {} ready (max_active: {}, max_idle: {}, idle_timeout: {}s)",
            config.addr, config.max_active, config.max_idle, config.idle_timeout_secs
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                pool: RwLock::new(Some(pool)),
                closed: AtomicBool::new(false),
                max_idle: config.max_idle,
                in_use: AtomicUsize::new(0),
                returned: Notify::new(),
                closing: Notify::new(),
                dial_errors,
                metrics,
            }),
        })
    }

    /// Borrow a connection, waiting up to the configured wait timeout.
    ///
    /// A borrower still waiting when the pool is closed gets `PoolClosed`.
    pub async fn get(&self) -> CacheResult<PooledConnection> {
        let closing = self.shared.closing.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();

        let pool = self.handle()?;
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = &mut closing => return Err(CacheError::PoolClosed),
            result = pool.get_owned() => result,
        };

        match result {
            Ok(mut conn) if self.is_closed() => {
                conn.mark_broken();
                debug!("Pool closed while waiting, dropping the new connection");
                Err(CacheError::PoolClosed)
            }
            Ok(conn) => {
                self.shared.in_use.fetch_add(1, Ordering::SeqCst);
                self.shared.metrics.record_borrow();
                Ok(PooledConnection {
                    conn,
                    pool,
                    shared: Arc::clone(&self.shared),
                })
            }
            Err(RunError::User(e)) => Err(e),
            Err(RunError::TimedOut) => match self.shared.dial_errors.take_since(started) {
                Some(e) => Err(e),
                None => {
                    warn!(
                        "No connection to {} became available in time",
                        self.shared.metrics.endpoint()
                    );
                    Err(CacheError::PoolExhausted)
                }
            },
        }
    }

    fn handle(&self) -> CacheResult<Pool<StoreConnectionManager>> {
        if self.is_closed() {
            return Err(CacheError::PoolClosed);
        }
        self.shared
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CacheError::PoolClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let in_use = self.shared.in_use.load(Ordering::SeqCst);
        let guard = self.shared.pool.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(pool) => {
                let state = pool.state();
                PoolStatus {
                    connections: state.connections,
                    idle: state.idle_connections,
                    in_use,
                }
            }
            None => PoolStatus {
                connections: 0,
                idle: 0,
                in_use,
            },
        }
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Close immediately. Borrowed connections are discarded when they come back.
    pub fn close(&self) {
        self.stop_borrowing();
        self.release();
    }

    /// Stop new borrows, wait up to `grace` for outstanding ones, then close.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.stop_borrowing();

        let drained = tokio::time::timeout(grace, self.wait_for_returns())
            .await
            .is_ok();
        let abandoned = self.shared.in_use.load(Ordering::SeqCst);
        if drained {
            info!("All borrowed connections returned");
        } else {
            warn!(
                "Grace period of {:?} elapsed with {} connection(s) still borrowed",
                grace, abandoned
            );
        }

        self.release();
        ShutdownReport { drained, abandoned }
    }

    fn stop_borrowing(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.closing.notify_waiters();
    }

    async fn wait_for_returns(&self) {
        loop {
            let notified = self.shared.returned.notified();
            if self.shared.in_use.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let pool = self
            .shared
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            let state = pool.state();
            info!(
                "Closing connection pool for {} ({} open, {} idle)",
                self.shared.metrics.endpoint(),
                state.connections,
                state.idle_connections
            );
            drop(pool);
        }
    }
}

/// A borrowed connection. Dropping it returns the connection to the idle set,
/// or closes it when it is broken, the pool is closed, or `max_idle` is reached.
pub struct PooledConnection {
    conn: bb8::PooledConnection<'static, StoreConnectionManager>,
    pool: Pool<StoreConnectionManager>,
    shared: Arc<PoolShared>,
}

impl Deref for PooledConnection {
    type Target = StoreConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let keep = !self.conn.is_broken()
            && !self.shared.closed.load(Ordering::SeqCst)
            && self.pool.state().idle_connections < self.shared.max_idle;

        if keep {
            self.conn.touch();
            self.shared.metrics.record_return();
        } else {
            // bb8 drops the connection once has_broken reports it
            self.conn.mark_broken();
            self.shared.metrics.record_discard();
            debug!("Discarding connection on return");
        }

        if self.shared.in_use.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.returned.notify_waiters();
        }
    }
}
