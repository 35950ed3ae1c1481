use crate::config::{CacheConfig, Network};
use crate::core::error::{server_message, CacheError, CacheResult};
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, Pipeline, RedisConnectionInfo, RedisError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Everything needed to dial and prepare one connection.
#[derive(Debug, Clone)]
pub struct DialSettings {
    pub network: Network,
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub dial_timeout: Duration,
}

impl From<&CacheConfig> for DialSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            network: config.network,
            addr: config.addr.clone(),
            password: config.password.clone().filter(|p| !p.is_empty()),
            db: config.db,
            dial_timeout: Duration::from_millis(config.dial_timeout_ms),
        }
    }
}

/// Optimize TCP socket for low latency
fn optimize_socket_for_latency(stream: &TcpStream) {
    // Small request/reply frames, so no Nagle batching
    let _ = stream.set_nodelay(true);

    let socket_ref = socket2::SockRef::from(stream);
    let _ = socket_ref.set_keepalive(true);
    let _ = socket_ref.set_send_buffer_size(32768);
    let _ = socket_ref.set_recv_buffer_size(32768);
}

/// One authenticated, database-bound connection to the store.
///
/// A connection is flagged broken while a request is in flight and only
/// cleared once the reply has been read, so a call that is cancelled or
/// fails midway never goes back to the pool. Dropping the connection stops
/// its driver task and closes the socket at once, even with a reply still
/// outstanding, so a cancelled blocking pop does not stay parked on the list.
pub struct StoreConnection {
    conn: MultiplexedConnection,
    driver: JoinHandle<()>,
    broken: bool,
    idle_since: Instant,
}

impl StoreConnection {
    /// Open the transport, authenticate if a password is set, then select the database.
    pub async fn dial(settings: &DialSettings) -> CacheResult<Self> {
        let mut conn = timeout(settings.dial_timeout, open(settings))
            .await
            .map_err(|_| {
                CacheError::Connect(format!(
                    "connection to {} timed out after {:?}",
                    settings.addr, settings.dial_timeout
                ))
            })??;

        if let Some(password) = settings.password.as_deref() {
            let mut auth = redis::cmd("AUTH");
            auth.arg(password);
            conn.query::<()>(&auth)
                .await
                .map_err(|e| handshake_error(e, &settings.addr, CacheError::AuthFailed))?;
        }

        let mut select = redis::cmd("SELECT");
        select.arg(settings.db);
        conn.query::<()>(&select)
            .await
            .map_err(|e| handshake_error(e, &settings.addr, CacheError::SelectFailed))?;

        debug!("Dialed {} (db {})", settings.addr, settings.db);
        Ok(conn)
    }

    /// Run the client handshake over an open byte stream and start its driver task.
    async fn over<S>(stream: S, addr: &str) -> CacheResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // Credentials and database are sent by `dial` so their rejections stay distinct
        let info = RedisConnectionInfo::default();
        let (conn, driver) = MultiplexedConnection::new(&info, stream)
            .await
            .map_err(|e| CacheError::Connect(format!("{}: {}", addr, e)))?;
        Ok(Self {
            conn,
            driver: tokio::spawn(driver),
            broken: false,
            idle_since: Instant::now(),
        })
    }

    /// Send one command and read its reply.
    pub async fn query<T: FromRedisValue>(&mut self, command: &Cmd) -> Result<T, RedisError> {
        self.broken = true;
        let reply = command.query_async(&mut self.conn).await;
        self.settle(reply)
    }

    /// Send every command of `pipeline` in one write and read all of their replies.
    ///
    /// The replies are read even when one of them is an error, so the
    /// connection stays usable; the first error is returned.
    pub async fn pipeline<T: FromRedisValue>(
        &mut self,
        pipeline: &Pipeline,
    ) -> Result<T, RedisError> {
        self.broken = true;
        let replies = pipeline.query_async(&mut self.conn).await;
        self.settle(replies)
    }

    /// Every reply has been read unless the transport itself failed.
    fn settle<T>(&mut self, result: Result<T, RedisError>) -> Result<T, RedisError> {
        let transport_failed = matches!(
            &result,
            Err(e) if e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
        );
        if !transport_failed {
            self.broken = false;
        }
        result
    }

    /// Liveness probe.
    pub async fn ping(&mut self) -> CacheResult<()> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::MalformedReply(format!(
                "unexpected PING reply: {}",
                reply
            )))
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Force this connection to be discarded instead of pooled.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Time since the connection was dialed or last returned to the pool.
    pub fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.idle_since = Instant::now();
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn open(settings: &DialSettings) -> CacheResult<StoreConnection> {
    match settings.network {
        Network::Tcp => {
            let stream = TcpStream::connect(&settings.addr)
                .await
                .map_err(|e| CacheError::Connect(format!("{}: {}", settings.addr, e)))?;
            optimize_socket_for_latency(&stream);
            StoreConnection::over(stream, &settings.addr).await
        }
        #[cfg(unix)]
        Network::Unix => {
            let stream = tokio::net::UnixStream::connect(&settings.addr)
                .await
                .map_err(|e| CacheError::Connect(format!("{}: {}", settings.addr, e)))?;
            StoreConnection::over(stream, &settings.addr).await
        }
        #[cfg(not(unix))]
        Network::Unix => Err(CacheError::Connect(
            "unix sockets are not supported on this platform".to_string(),
        )),
    }
}

/// A rejected handshake command keeps its own error kind; anything else is a dial failure.
fn handshake_error(
    error: RedisError,
    addr: &str,
    rejected: fn(String) -> CacheError,
) -> CacheError {
    match server_message(&error) {
        Some(message) => rejected(message),
        None => CacheError::Connect(format!("{}: {}", addr, error)),
    }
}
