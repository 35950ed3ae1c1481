pub mod config;
pub mod core;

// Re-export main components for easy access
pub use config::{CacheConfig, ConfigError, Network};
pub use crate::core::*;
