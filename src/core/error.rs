use crate::config::ConfigError;
use crate::core::codec::CodecError;
use redis::{ErrorKind, RedisError};
use std::time::Duration;

/// Errors surfaced by every cache operation.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Authentication rejected: {0}")]
    AuthFailed(String),
    #[error("Database selection rejected: {0}")]
    SelectFailed(String),
    #[error("Connection pool exhausted")]
    PoolExhausted,
    #[error("Connection pool is closed")]
    PoolClosed,
    #[error("Connection idle for {0:?}, past the idle timeout")]
    IdleExpired(Duration),
    #[error("Store connection error: {0}")]
    Transport(#[source] RedisError),
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("Value is not an integer: {0}")]
    NotAnInteger(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Store error: {0}")]
    Server(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn type_mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        CacheError::TypeMismatch {
            expected,
            found: found.into(),
        }
    }

    /// True for faults that leave the connection in an unknown state.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            CacheError::Connect(_)
                | CacheError::AuthFailed(_)
                | CacheError::SelectFailed(_)
                | CacheError::Transport(_)
        )
    }

    /// True for errors raised while dialing a new connection.
    pub fn is_dial_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Connect(_) | CacheError::AuthFailed(_) | CacheError::SelectFailed(_)
        )
    }
}

/// Error text as the store sent it, e.g. `ERR value is not an integer`.
pub(crate) fn server_message(error: &RedisError) -> Option<String> {
    let code = error.code()?;
    Some(match error.detail() {
        Some(detail) => format!("{} {}", code, detail),
        None => code.to_string(),
    })
}

impl From<RedisError> for CacheError {
    fn from(error: RedisError) -> Self {
        if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
        {
            return CacheError::Transport(error);
        }
        if let Some(message) = server_message(&error) {
            return CacheError::Server(message);
        }
        match error.kind() {
            ErrorKind::TypeError => CacheError::MalformedReply(error.to_string()),
            _ => CacheError::Transport(error),
        }
    }
}

impl From<CodecError> for CacheError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Marshal(msg) => CacheError::Encode(msg),
            CodecError::Unmarshal(msg) => CacheError::Decode(msg),
        }
    }
}

/// Result alias used across the crate.
pub type CacheResult<T> = Result<T, CacheError>;
