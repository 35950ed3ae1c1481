//! List push and blocking pop tests

use crate::integration::{client_for, settle, MockStore};
use std::time::{Duration, Instant};
use tcache::CacheError;

#[tokio::test]
async fn test_blpop_times_out_with_no_element() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let started = Instant::now();
    let popped = client.blpop("empty", 1).await.unwrap();
    let elapsed = started.elapsed();

    assert!(popped.is_none());
    assert!(elapsed >= Duration::from_millis(900), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "blocked too long: {:?}", elapsed);
}

#[tokio::test]
async fn test_push_then_pop_in_order() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "jobs:");

    assert_eq!(client.push_back("queue", "first").await.unwrap(), 1);
    assert_eq!(client.push_back("queue", "second").await.unwrap(), 2);
    assert_eq!(client.push_front("queue", "urgent").await.unwrap(), 3);

    assert_eq!(client.blpop("queue", 1).await.unwrap(), Some(b"urgent".to_vec()));
    assert_eq!(client.blpop("queue", 1).await.unwrap(), Some(b"first".to_vec()));
    assert_eq!(client.blpop("queue", 1).await.unwrap(), Some(b"second".to_vec()));
}

#[tokio::test]
async fn test_blpop_wakes_on_push() {
    let store = MockStore::new().await.unwrap();
    let consumer = client_for(&store, "");
    let producer = consumer.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        producer.push_back("events", 42i32).await.unwrap();
    });

    let popped = consumer.blpop("events", 5).await.unwrap();
    assert_eq!(popped, Some(b"42".to_vec()));
    // Two connections: one held by the blocked pop, one for the push
    assert!(store.accepted_connections() >= 2);
}

#[tokio::test]
async fn test_cancelled_blpop_discards_its_connection() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let cancelled = tokio::time::timeout(Duration::from_millis(100), client.blpop("idle", 0)).await;
    assert!(cancelled.is_err());

    settle(&client).await;
    let metrics = client.pool().metrics();
    assert_eq!(client.pool().status().in_use, 0);
    assert_eq!(metrics.discards, 1);
    assert!(metrics.is_balanced());

    // The unread reply does not leak into the next call
    client.push_back("idle", "late").await.unwrap();
    assert_eq!(client.get_string("missing").await.unwrap(), None);
    assert_eq!(client.blpop("idle", 1).await.unwrap(), Some(b"late".to_vec()));
}

#[tokio::test]
async fn test_blpop_on_wrong_type() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");
    client.set("scalar", "v", 0).await.unwrap();

    assert!(matches!(
        client.blpop("scalar", 1).await,
        Err(CacheError::Server(_))
    ));
}
