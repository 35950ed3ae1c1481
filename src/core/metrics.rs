use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one connection pool.
#[derive(Debug)]
pub struct PoolMetrics {
    endpoint: String,

    // Dial counters
    dials: AtomicU64,
    dial_failures: AtomicU64,
    probe_failures: AtomicU64,
    idle_expired: AtomicU64,

    // Borrow counters
    borrows: AtomicU64,
    returns: AtomicU64,
    discards: AtomicU64,
}

/// Snapshot of pool metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub endpoint: String,
    pub dials: u64,
    pub dial_failures: u64,
    pub probe_failures: u64,
    /// Idle connections closed at checkout for exceeding the idle timeout.
    pub idle_expired: u64,
    pub borrows: u64,
    pub returns: u64,
    pub discards: u64,
}

impl PoolMetricsSnapshot {
    /// Every borrow has been either returned to the idle set or discarded.
    pub fn is_balanced(&self) -> bool {
        self.borrows == self.returns + self.discards
    }
}

impl PoolMetrics {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            dials: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            idle_expired: AtomicU64::new(0),
            borrows: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            discards: AtomicU64::new(0),
        }
    }

    pub fn record_dial(&self) {
        self.dials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_expired(&self) {
        self.idle_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_borrow(&self) {
        self.borrows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            endpoint: self.endpoint.clone(),
            dials: self.dials.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            idle_expired: self.idle_expired.load(Ordering::Relaxed),
            borrows: self.borrows.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
        }
    }
}
