//! Test scenarios for integration testing
//!
//! Each module contains tests for specific functionality:
//! - scalar: get/set, TTL, counters and key operations
//! - hash: hash-field operations and struct mapping
//! - blocking: list pushes and blocking pop
//! - pool: borrow/return accounting, dial failures and liveness probes
//! - lifecycle: graceful shutdown

pub mod blocking;
pub mod hash;
pub mod pool;
