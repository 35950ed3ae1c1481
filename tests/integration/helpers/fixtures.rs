//! Client and configuration fixtures pointed at a mock store

use super::mock_store::MockStore;
use tcache::{CacheClient, CacheConfig};

/// Configuration aimed at `store`, with short timeouts suited to tests
pub fn config_for(store: &MockStore) -> CacheConfig {
    CacheConfig {
        addr: store.addr().to_string(),
        wait_timeout_ms: 1000,
        dial_timeout_ms: 500,
        shutdown_grace_ms: 500,
        ..Default::default()
    }
}

/// Client on `store` with the given key prefix
pub fn client_for(store: &MockStore, prefix: &str) -> CacheClient {
    let config = CacheConfig {
        prefix: prefix.to_string(),
        ..config_for(store)
    };
    CacheClient::new(&config).expect("client should build from a valid config")
}

/// Wait until no connection is borrowed, up to one second
pub async fn settle(client: &CacheClient) {
    for _ in 0..100 {
        if client.pool().status().in_use == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
