use onair_shared::CoreError;
use thiserror::Error;

/// Errors produced by the key-value layer.
#[derive(Error, Debug)]
pub enum KvError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A round-trip exceeded the configured bound.
    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    /// Operation against a key holding a different kind of value.
    #[error("Wrong value type at key '{0}'")]
    WrongType(String),
}

/// Convenience alias used throughout the crate.
pub type KvResult<T> = std::result::Result<T, KvError>;

// Every store failure reaches callers as Unavailable; nothing in the core retries.
impl From<KvError> for CoreError {
    fn from(err: KvError) -> Self {
        CoreError::Unavailable(err.to_string())
    }
}
