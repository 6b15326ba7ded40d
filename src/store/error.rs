use std::error::Error;
use thiserror::Error;

/// Result alias for replicated store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by store backends regardless of where the data lives.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connection used for the operation has been severed.
    #[error("store connection is offline")]
    Disconnected,
    /// A path could not be parsed into segments.
    #[error("invalid store path `{0}`")]
    InvalidPath(String),
    /// A value read from the store did not have the expected shape.
    #[error("malformed value at `{path}`")]
    Malformed {
        /// Where the value was read from.
        path: String,
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// The backend itself failed.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// What the backend was doing.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Wrap a deserialization failure for the value stored at `path`.
    pub fn malformed(path: impl ToString, source: serde_json::Error) -> Self {
        StoreError::Malformed {
            path: path.to_string(),
            source,
        }
    }
}
