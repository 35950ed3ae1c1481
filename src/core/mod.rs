pub mod client;
pub mod codec;
pub mod connection;
pub mod connection_pool;
pub mod error;
pub mod hash;
pub mod lifecycle;
pub mod metrics;

// Re-export the caller-facing surface
pub use client::{CacheClient, Ttl, WholeDatabase};
pub use codec::{parse_bool, Codec, CodecError, JsonCodec, Scalar};
pub use connection::{DialSettings, StoreConnection};
pub use connection_pool::{
    ConnectionPool, PoolStatus, PooledConnection, ShutdownReport, StoreConnectionManager,
};
pub use error::{CacheError, CacheResult};
pub use lifecycle::{termination_signal, LifecycleManager};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
