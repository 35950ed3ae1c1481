//! Connection pool integration tests
//!
//! Borrow/return accounting, dial handshake failures, liveness probes and
//! idle retention against the mock store.

use crate::integration::{client_for, config_for, settle, MockStore, MockStoreBuilder};
use rstest::rstest;
use std::time::Duration;
use tcache::{CacheClient, CacheConfig, CacheError, ConnectionPool};

// ============================================================================
// Borrow / Return Tests
// ============================================================================

#[tokio::test]
async fn test_connections_are_dialed_lazily_and_reused() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");
    assert_eq!(store.accepted_connections(), 0);

    for i in 0..10 {
        client.set("k", i, 0).await.unwrap();
    }

    assert_eq!(store.accepted_connections(), 1);
    // Every reuse is preceded by a liveness probe
    assert!(store.command_count("PING") >= 9);
    let status = client.pool().status();
    assert_eq!(status.connections, 1);
    assert_eq!(status.idle, 1);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_borrow_return_balance_across_errors() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");
    client.set("word", "abc", 0).await.unwrap();

    let _ = client.get_int("word").await;
    let _ = client.incr("word").await;
    let _ = client.blpop("word", 1).await;
    let _ = client.hget("word", "field").await;
    let _ = client.hmset("word", &42, 0).await;
    let _ = tokio::time::timeout(Duration::from_millis(50), client.blpop("queue", 0)).await;
    client.del("word").await.unwrap();

    settle(&client).await;
    let status = client.pool().status();
    let metrics = client.pool().metrics();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.connections, status.idle);
    assert!(metrics.is_balanced(), "unbalanced: {:?}", metrics);
    assert_eq!(metrics.discards, 1);
}

#[rstest]
#[case(1)]
#[case(3)]
#[tokio::test]
async fn test_pool_exhaustion(#[case] max_active: u32) {
    let store = MockStore::new().await.unwrap();
    let config = CacheConfig {
        max_active,
        wait_timeout_ms: 200,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    let mut held = Vec::new();
    for _ in 0..max_active {
        held.push(client.pool().get().await.unwrap());
    }
    assert_eq!(client.pool().status().in_use, max_active as usize);

    assert!(matches!(
        client.get("k").await,
        Err(CacheError::PoolExhausted)
    ));

    // A returned connection frees a slot
    held.pop();
    assert_eq!(client.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_waiting_borrower_gets_returned_connection() {
    let store = MockStore::new().await.unwrap();
    let config = CacheConfig {
        max_active: 1,
        wait_timeout_ms: 2000,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    let held = client.pool().get().await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);
    });

    client.set("k", "v", 0).await.unwrap();
    assert_eq!(store.accepted_connections(), 1);
}

#[tokio::test]
async fn test_max_idle_caps_retained_connections() {
    let store = MockStore::new().await.unwrap();
    let config = CacheConfig {
        max_idle: 1,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    let a = client.pool().get().await.unwrap();
    let b = client.pool().get().await.unwrap();
    let c = client.pool().get().await.unwrap();
    assert_eq!(store.accepted_connections(), 3);

    drop(a);
    drop(b);
    drop(c);

    let status = client.pool().status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.connections, 1);
    let metrics = client.pool().metrics();
    assert_eq!(metrics.returns, 1);
    assert_eq!(metrics.discards, 2);
}

// ============================================================================
// Dial Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_password_is_sent_on_dial() {
    let store = MockStoreBuilder::new()
        .password("s3cret")
        .build()
        .await
        .unwrap();
    let config = CacheConfig {
        password: Some("s3cret".to_string()),
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    client.set("k", "v", 0).await.unwrap();
    assert_eq!(store.command_count("AUTH"), 1);
    assert_eq!(store.get_stored_value(0, "k"), Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_auth_rejected() {
    let store = MockStoreBuilder::new()
        .password("s3cret")
        .build()
        .await
        .unwrap();
    let config = CacheConfig {
        password: Some("wrong".to_string()),
        wait_timeout_ms: 300,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    let result = client.get("k").await;
    assert!(
        matches!(result, Err(CacheError::AuthFailed(_))),
        "unexpected: {:?}",
        result
    );
    assert_eq!(client.pool().status().in_use, 0);
    assert!(client.pool().metrics().dial_failures >= 1);
}

#[tokio::test]
async fn test_select_rejected() {
    let store = MockStoreBuilder::new().databases(2).build().await.unwrap();
    let config = CacheConfig {
        db: 5,
        wait_timeout_ms: 300,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    let result = client.set("k", "v", 0).await;
    assert!(
        matches!(result, Err(CacheError::SelectFailed(_))),
        "unexpected: {:?}",
        result
    );
    assert_eq!(client.pool().status().in_use, 0);
}

#[tokio::test]
async fn test_unreachable_store() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let pool = ConnectionPool::new(&CacheConfig {
        addr,
        wait_timeout_ms: 300,
        dial_timeout_ms: 200,
        ..Default::default()
    })
    .unwrap();

    assert!(matches!(pool.get().await, Err(CacheError::Connect(_))));
    assert_eq!(pool.status().in_use, 0);
}

// ============================================================================
// Liveness Probe Tests
// ============================================================================

#[tokio::test]
async fn test_dead_idle_connection_is_replaced() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    client.set("k", "v", 0).await.unwrap();
    assert_eq!(store.accepted_connections(), 1);

    store.sever_connections();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The probe fails on the severed connection and a fresh one is dialed
    assert_eq!(client.get_string("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(store.accepted_connections(), 2);
    assert!(client.pool().metrics().probe_failures >= 1);
}

#[tokio::test]
async fn test_connection_idle_past_timeout_is_replaced() {
    let store = MockStore::new().await.unwrap();
    let config = CacheConfig {
        idle_timeout_secs: 1,
        ..config_for(&store)
    };
    let client = CacheClient::new(&config).unwrap();

    client.set("k", "v", 0).await.unwrap();
    client.set("k", "v", 0).await.unwrap();
    assert_eq!(store.accepted_connections(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(client.get_string("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(store.accepted_connections(), 2);
    assert_eq!(client.pool().status().connections, 1);
}

#[tokio::test]
async fn test_connection_lost_mid_call_is_discarded() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.blpop("never", 0).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.sever_connections();

    let result = waiter.await.unwrap();
    assert!(
        matches!(&result, Err(e) if e.is_connection_fault()),
        "unexpected: {:?}",
        result
    );

    settle(&client).await;
    assert_eq!(client.pool().status().connections, 0);
    assert!(client.pool().metrics().is_balanced());

    // Next call dials afresh
    client.set("k", "v", 0).await.unwrap();
}
