// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The remote store could not be reached (refused, dropped, IO, auth)
    #[error("Redis connection error: {0}")]
    Connectivity(String),

    /// A remote call did not answer within the command timeout
    #[error("Redis operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The circuit breaker rejected the call without contacting the remote store
    #[error("Circuit open, next trial in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The remote store answered with an error reply
    #[error("Redis command error: {0}")]
    Command(String),

    /// Operation against a key holding the wrong kind of value
    #[error("Wrong type: {0}")]
    WrongType(String),

    /// Bad arguments or a value that cannot be interpreted as requested
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Both the remote store and the fallback cache failed
    #[error("Operation '{operation}' on key '{key}' failed on Redis ({remote}) and on fallback: {source}")]
    FallbackExhausted {
        operation: String,
        key: String,
        remote: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Whether this error means the remote store is unreachable.
    ///
    /// Only these errors count toward opening the circuit breaker.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Connectivity(_) | StoreError::Timeout { .. }
        )
    }

    /// Short, stable name used in log fields and metrics
    pub fn error_class(&self) -> &'static str {
        match self {
            StoreError::Connectivity(_) => "connectivity",
            StoreError::Timeout { .. } => "timeout",
            StoreError::CircuitOpen { .. } => "circuit_open",
            StoreError::Command(_) => "command",
            StoreError::WrongType(_) => "wrong_type",
            StoreError::InvalidArgument(_) => "invalid_argument",
            StoreError::Serialization(_) => "serialization",
            StoreError::Config(_) => "config",
            StoreError::FallbackExhausted { .. } => "fallback_exhausted",
        }
    }
}

// Classify redis::RedisError into connectivity vs. logical failures
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
        {
            return StoreError::Connectivity(err.to_string());
        }

        match err.kind() {
            redis::ErrorKind::AuthenticationFailed
            | redis::ErrorKind::IoError
            | redis::ErrorKind::ClientError => StoreError::Connectivity(err.to_string()),
            redis::ErrorKind::TypeError => StoreError::WrongType(err.to_string()),
            redis::ErrorKind::InvalidClientConfig => StoreError::Config(err.to_string()),
            _ => {
                if err.code() == Some("WRONGTYPE") {
                    StoreError::WrongType(err.to_string())
                } else {
                    StoreError::Command(err.to_string())
                }
            }
        }
    }
}

// implement conversions from serde_json::Error to StoreError
impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, StoreError>;
