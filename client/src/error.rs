//! Unified error handling for the client.

use std::{path::PathBuf, sync::Arc};

/// Client error type.
///
/// Cloneable so a result can be delivered both to the local-result channel
/// and as the final result of a write.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    TransportError(Arc<dyn std::error::Error + Send + Sync>),

    #[error("object id missing")]
    ObjectIdMissing,

    #[error("request cancelled")]
    RequestCancelled,

    #[error("no active user")]
    NoActiveUser,

    #[error("local store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("remote service returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("cached file missing at {0}")]
    MissingCachedFile(PathBuf),

    #[error("engine error: {0}")]
    Engine(harbor_engine::Error),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("json error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Wrap a transport-level failure.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::TransportError(Arc::new(err))
    }

    /// Whether retrying later may succeed: transport errors, timeouts,
    /// throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransportError(_) => true,
            Error::Remote { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status of a remote rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<harbor_engine::Error> for Error {
    fn from(err: harbor_engine::Error) -> Self {
        match err {
            harbor_engine::Error::ObjectIdMissing => Error::ObjectIdMissing,
            other => Error::Engine(other),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::transport(err)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
