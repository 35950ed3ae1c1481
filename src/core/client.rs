use crate::config::CacheConfig;
use crate::core::codec::{
    decode_bool, decode_f64, decode_i64, decode_string, Codec, JsonCodec, Scalar,
};
use crate::core::connection_pool::ConnectionPool;
use crate::core::error::{CacheError, CacheResult};
use crate::core::hash::{field_pairs, flatten_fields, from_field_pairs};
use redis::{Cmd, FromRedisValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remaining lifetime of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and has no expiry.
    Persistent,
    ExpiresIn(Duration),
}

impl Ttl {
    fn from_seconds(seconds: i64) -> Self {
        match seconds {
            -2 => Ttl::Missing,
            s if s < 0 => Ttl::Persistent,
            s => Ttl::ExpiresIn(Duration::from_secs(s as u64)),
        }
    }

    /// The store's own encoding: `-2` missing, `-1` no expiry.
    pub fn as_seconds(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::ExpiresIn(d) => d.as_secs() as i64,
        }
    }
}

/// Confirmation token for [`CacheClient::flush`].
///
/// Flushing clears the whole logical database, including keys outside this
/// client's prefix. Passing the token makes that explicit at the call site.
#[derive(Debug, Clone, Copy)]
pub struct WholeDatabase;

/// Typed, prefix-scoped access to the store.
///
/// Every call borrows one connection for its duration and gives it back on
/// every path; a call that fails midway leaves its connection to be
/// discarded rather than reused. Clones share the same pool.
pub struct CacheClient<C: Codec = JsonCodec> {
    pool: ConnectionPool,
    prefix: Arc<str>,
    codec: Arc<C>,
}

impl<C: Codec> Clone for CacheClient<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            prefix: Arc::clone(&self.prefix),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl CacheClient<JsonCodec> {
    /// Create a client and its pool with the default JSON codec.
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        Self::with_codec(config, JsonCodec)
    }
}

impl<C: Codec> CacheClient<C> {
    /// Create a client and its pool with a custom codec for composite values.
    pub fn with_codec(config: &CacheConfig, codec: C) -> CacheResult<Self> {
        let pool = ConnectionPool::new(config)?;
        info!(
            "Cache client for {} created (prefix: {:?}, codec: {})",
            config.addr,
            config.prefix,
            codec.name()
        );
        Ok(Self::from_pool(pool, &config.prefix, codec))
    }

    /// Build a client over an existing pool, e.g. to give several prefixes one pool.
    pub fn from_pool(pool: ConnectionPool, prefix: &str, codec: C) -> Self {
        Self {
            pool,
            prefix: Arc::from(prefix),
            codec: Arc::new(codec),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn query<T: FromRedisValue>(&self, command: &Cmd) -> CacheResult<T> {
        let mut conn = self.pool.get().await?;
        Ok(conn.query(command).await?)
    }

    /// Send a raw command. Keys are passed through without the prefix.
    pub async fn execute<T: FromRedisValue>(&self, command: &Cmd) -> CacheResult<T> {
        self.query(command).await
    }

    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        conn.ping().await
    }

    // Scalar reads

    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(self.key(key))).await
    }

    pub async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.get(key).await?.map(decode_string).transpose()
    }

    pub async fn get_int(&self, key: &str) -> CacheResult<Option<i32>> {
        narrow_i32(self.get_int64(key).await?)
    }

    pub async fn get_int64(&self, key: &str) -> CacheResult<Option<i64>> {
        self.get(key).await?.as_deref().map(decode_i64).transpose()
    }

    pub async fn get_bool(&self, key: &str) -> CacheResult<Option<bool>> {
        self.get(key).await?.as_deref().map(decode_bool).transpose()
    }

    pub async fn get_f64(&self, key: &str) -> CacheResult<Option<f64>> {
        self.get(key).await?.as_deref().map(decode_f64).transpose()
    }

    /// Decode a composite value stored with [`set_object`](Self::set_object).
    pub async fn get_object<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key).await? {
            Some(data) => Ok(Some(self.codec.unmarshal(&data)?)),
            None => Ok(None),
        }
    }

    // Scalar writes and key operations

    /// Store a scalar. A `ttl_secs` of 0 stores it without expiry. Last write wins.
    pub async fn set(&self, key: &str, value: impl Into<Scalar>, ttl_secs: u64) -> CacheResult<()> {
        let value: Scalar = value.into();
        self.store(key, value.to_wire(), ttl_secs).await
    }

    /// Store a composite value encoded by the client's codec.
    pub async fn set_object<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> CacheResult<()> {
        let data = self.codec.marshal(value)?;
        self.store(key, data, ttl_secs).await
    }

    async fn store(&self, key: &str, data: Vec<u8>, ttl_secs: u64) -> CacheResult<()> {
        let mut command = if ttl_secs > 0 {
            let mut setex = redis::cmd("SETEX");
            setex.arg(self.key(key)).arg(ttl_secs);
            setex
        } else {
            let mut set = redis::cmd("SET");
            set.arg(self.key(key));
            set
        };
        command.arg(data);
        self.query(&command).await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(self.key(key))).await?;
        Ok(count > 0)
    }

    /// Delete a key. Returns whether it existed.
    pub async fn del(&self, key: &str) -> CacheResult<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(self.key(key))).await?;
        Ok(removed > 0)
    }

    /// Clear every key in the selected database, not only this client's prefix.
    pub async fn flush(&self, _confirm: WholeDatabase) -> CacheResult<()> {
        warn!("Flushing the entire selected database");
        self.query(&redis::cmd("FLUSHDB")).await
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<Ttl> {
        let seconds: i64 = self.query(redis::cmd("TTL").arg(self.key(key))).await?;
        Ok(Ttl::from_seconds(seconds))
    }

    /// Set a new expiry. Returns false, changing nothing, when the key is absent.
    pub async fn expire(&self, key: &str, seconds: u64) -> CacheResult<bool> {
        let applied: i64 = self
            .query(redis::cmd("EXPIRE").arg(self.key(key)).arg(seconds))
            .await?;
        Ok(applied == 1)
    }

    // Counters

    pub async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.counter(key, redis::cmd("INCR").arg(self.key(key))).await
    }

    pub async fn incr_by(&self, key: &str, amount: i64) -> CacheResult<i64> {
        self.counter(key, redis::cmd("INCRBY").arg(self.key(key)).arg(amount))
            .await
    }

    pub async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.counter(key, redis::cmd("DECR").arg(self.key(key))).await
    }

    pub async fn decr_by(&self, key: &str, amount: i64) -> CacheResult<i64> {
        self.counter(key, redis::cmd("DECRBY").arg(self.key(key)).arg(amount))
            .await
    }

    async fn counter(&self, key: &str, command: &Cmd) -> CacheResult<i64> {
        counter_value(key, self.query(command).await)
    }

    // Hash fields

    /// Store every field of `value` under `key`, then apply `ttl_secs` when non-zero.
    ///
    /// Both commands go out in one batch on one connection and both replies
    /// are read; the call fails if either is rejected. The pair is ordered but
    /// not atomic.
    pub async fn hmset<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> CacheResult<()> {
        let full_key = self.key(key);
        let mut pipe = redis::pipe();
        pipe.cmd("HMSET").arg(&full_key);
        for (field, data) in flatten_fields(value, self.codec.as_ref())? {
            pipe.arg(field).arg(data);
        }
        if ttl_secs > 0 {
            pipe.cmd("EXPIRE").arg(&full_key).arg(ttl_secs);
        }

        let mut conn = self.pool.get().await?;
        conn.pipeline::<()>(&pipe).await?;
        Ok(())
    }

    /// Set one field to a scalar. Returns true when the field is new.
    pub async fn hset(&self, key: &str, field: &str, value: impl Into<Scalar>) -> CacheResult<bool> {
        let value: Scalar = value.into();
        self.hstore(key, field, value.to_wire()).await
    }

    /// Set one field to a composite value encoded by the client's codec.
    pub async fn hset_object<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> CacheResult<bool> {
        let data = self.codec.marshal(value)?;
        self.hstore(key, field, data).await
    }

    async fn hstore(&self, key: &str, field: &str, data: Vec<u8>) -> CacheResult<bool> {
        let added: i64 = self
            .query(redis::cmd("HSET").arg(self.key(key)).arg(field).arg(data))
            .await?;
        Ok(added == 1)
    }

    pub async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>> {
        self.query(redis::cmd("HGET").arg(self.key(key)).arg(field))
            .await
    }

    pub async fn hget_string(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.hget(key, field).await?.map(decode_string).transpose()
    }

    pub async fn hget_int(&self, key: &str, field: &str) -> CacheResult<Option<i32>> {
        narrow_i32(self.hget_int64(key, field).await?)
    }

    pub async fn hget_int64(&self, key: &str, field: &str) -> CacheResult<Option<i64>> {
        self.hget(key, field).await?.as_deref().map(decode_i64).transpose()
    }

    pub async fn hget_bool(&self, key: &str, field: &str) -> CacheResult<Option<bool>> {
        self.hget(key, field).await?.as_deref().map(decode_bool).transpose()
    }

    pub async fn hget_f64(&self, key: &str, field: &str) -> CacheResult<Option<f64>> {
        self.hget(key, field).await?.as_deref().map(decode_f64).transpose()
    }

    pub async fn hget_object<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
    ) -> CacheResult<Option<T>> {
        match self.hget(key, field).await? {
            Some(data) => Ok(Some(self.codec.unmarshal(&data)?)),
            None => Ok(None),
        }
    }

    /// Populate `T` from every field of the hash, matching fields to attribute names.
    ///
    /// Unknown fields are ignored; attributes without a field keep their
    /// `#[serde(default)]` value. Returns `None` when the hash does not exist.
    pub async fn hgetall<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let items: Vec<Vec<u8>> = self
            .query(redis::cmd("HGETALL").arg(self.key(key)))
            .await?;
        if items.is_empty() {
            return Ok(None);
        }
        from_field_pairs(field_pairs(items)?, self.codec.as_ref()).map(Some)
    }

    // Lists

    /// Append to the tail of a list. Returns the new length.
    pub async fn push_back(&self, key: &str, value: impl Into<Scalar>) -> CacheResult<i64> {
        let value: Scalar = value.into();
        self.query(redis::cmd("RPUSH").arg(self.key(key)).arg(value))
            .await
    }

    /// Prepend to the head of a list. Returns the new length.
    pub async fn push_front(&self, key: &str, value: impl Into<Scalar>) -> CacheResult<i64> {
        let value: Scalar = value.into();
        self.query(redis::cmd("LPUSH").arg(self.key(key)).arg(value))
            .await
    }

    /// Pop the head of a list, waiting up to `timeout_secs` for an element.
    ///
    /// `0` waits forever and holds a pooled connection the whole time.
    /// Returns `None` when the wait elapses with the list still empty.
    pub async fn blpop(&self, key: &str, timeout_secs: u64) -> CacheResult<Option<Vec<u8>>> {
        let popped: Option<(Vec<u8>, Vec<u8>)> = self
            .query(redis::cmd("BLPOP").arg(self.key(key)).arg(timeout_secs))
            .await?;
        if popped.is_none() {
            debug!("BLPOP on {} timed out after {}s", key, timeout_secs);
        }
        Ok(popped.map(|(_, value)| value))
    }
}

fn narrow_i32(value: Option<i64>) -> CacheResult<Option<i32>> {
    value
        .map(|n| i32::try_from(n).map_err(|_| CacheError::type_mismatch("i32", n.to_string())))
        .transpose()
}

fn counter_value(key: &str, result: CacheResult<i64>) -> CacheResult<i64> {
    match result {
        Err(CacheError::Server(message)) if message.contains("not an integer") => {
            Err(CacheError::NotAnInteger(key.to_string()))
        }
        other => other,
    }
}
