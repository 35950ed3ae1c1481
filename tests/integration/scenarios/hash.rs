//! Hash-field operation tests

use crate::integration::{client_for, settle, MockStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tcache::{CacheError, Ttl};

#[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
struct Record {
    a: i64,
    b: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
struct Profile {
    name: String,
    age: u32,
    admin: bool,
    score: f64,
    roles: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Address {
    city: String,
    zip: String,
}

#[tokio::test]
async fn test_hash_round_trip() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let record = Record {
        a: 1,
        b: "x".to_string(),
    };
    client.hmset("rec", &record, 0).await.unwrap();

    let back: Option<Record> = client.hgetall("rec").await.unwrap();
    assert_eq!(back, Some(record));
    assert_eq!(store.command_count("EXPIRE"), 0);
}

#[tokio::test]
async fn test_hmset_with_ttl_pipelines_expire() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let profile = Profile {
        name: "ada".to_string(),
        age: 36,
        admin: true,
        score: 9.5,
        roles: vec!["editor".to_string()],
    };
    client.hmset("user:1", &profile, 60).await.unwrap();

    assert_eq!(store.command_count("HMSET"), 1);
    assert_eq!(store.command_count("EXPIRE"), 1);
    assert!(matches!(
        client.ttl("user:1").await.unwrap(),
        Ttl::ExpiresIn(_)
    ));

    let back: Option<Profile> = client.hgetall("user:1").await.unwrap();
    assert_eq!(back, Some(profile));
    assert_eq!(client.pool().status().in_use, 0);
}

#[tokio::test]
async fn test_hgetall_ignores_unknown_and_keeps_defaults() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    client.hset("user:2", "name", "grace").await.unwrap();
    client.hset("user:2", "nickname", "amazing").await.unwrap();

    let profile: Profile = client.hgetall("user:2").await.unwrap().unwrap();
    assert_eq!(profile.name, "grace");
    assert_eq!(profile.age, 0);
    assert!(!profile.admin);
    assert!(profile.roles.is_empty());
}

#[tokio::test]
async fn test_hgetall_missing_hash() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let record: Option<Record> = client.hgetall("missing").await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn test_hgetall_into_plain_map() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    client.hset("h", "one", 1i32).await.unwrap();
    client.hset("h", "two", "2").await.unwrap();

    let fields: BTreeMap<String, String> = client.hgetall("h").await.unwrap().unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["one"], "1");
    assert_eq!(fields["two"], "2");
}

#[tokio::test]
async fn test_hset_and_typed_field_getters() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    assert!(client.hset("h", "count", 12i32).await.unwrap());
    // Overwriting an existing field
    assert!(!client.hset("h", "count", 13i32).await.unwrap());
    client.hset("h", "wide", 1i64 << 40).await.unwrap();
    client.hset("h", "flag", false).await.unwrap();
    client.hset("h", "ratio", 0.5f64).await.unwrap();
    client.hset("h", "label", "hello").await.unwrap();

    assert_eq!(client.hget_int("h", "count").await.unwrap(), Some(13));
    assert_eq!(client.hget_int64("h", "wide").await.unwrap(), Some(1i64 << 40));
    assert_eq!(client.hget_bool("h", "flag").await.unwrap(), Some(false));
    assert_eq!(client.hget_f64("h", "ratio").await.unwrap(), Some(0.5));
    assert_eq!(
        client.hget_string("h", "label").await.unwrap().as_deref(),
        Some("hello")
    );
    assert_eq!(client.hget("h", "label").await.unwrap(), Some(b"hello".to_vec()));

    assert_eq!(client.hget("h", "absent").await.unwrap(), None);
    assert_eq!(client.hget_int("nohash", "count").await.unwrap(), None);
    assert!(matches!(
        client.hget_int("h", "label").await,
        Err(CacheError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_hset_object_round_trip() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");
    let address = Address {
        city: "Lisbon".to_string(),
        zip: "1100".to_string(),
    };

    client.hset_object("user:3", "address", &address).await.unwrap();
    let back: Option<Address> = client.hget_object("user:3", "address").await.unwrap();
    assert_eq!(back, Some(address));

    let missing: Option<Address> = client.hget_object("user:3", "billing").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_hmset_rejects_non_struct_values() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");

    let result = client.hmset("h", &vec![1, 2, 3], 0).await;
    assert!(matches!(result, Err(CacheError::Encode(_))));
    // Nothing was sent
    assert_eq!(store.command_count("HMSET"), 0);
}

#[tokio::test]
async fn test_hmset_on_wrong_type_fails_and_keeps_pool_balanced() {
    let store = MockStore::new().await.unwrap();
    let client = client_for(&store, "");
    client.set("plain", "string", 0).await.unwrap();

    let record = Record {
        a: 5,
        b: "y".to_string(),
    };
    let result = client.hmset("plain", &record, 30).await;
    assert!(matches!(result, Err(CacheError::Server(msg)) if msg.starts_with("WRONGTYPE")));

    // Both replies were read, so the connection is still usable
    assert_eq!(client.get_string("plain").await.unwrap().as_deref(), Some("string"));
    settle(&client).await;
    let metrics = client.pool().metrics();
    assert!(metrics.is_balanced());
    assert_eq!(metrics.discards, 0);
}
