use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the engine can fail with.
///
/// `NotFound` deliberately covers absent, expired and already burned pastes
/// alike. `StorageFailure` carries backend context for the logs; callers must
/// not forward it to clients verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("requested ttl is outside the allowed range")]
    InvalidTtl,
    #[error("invalid slug: {0}")]
    InvalidSlug(#[from] stashpad_common::SlugError),
    #[error("slug is already in use")]
    SlugConflict,
    #[error("failed to find a free slug")]
    SlugSpaceExhausted,
    #[error("content of {size} bytes exceeds the {limit} byte limit")]
    ContentTooLarge { size: u64, limit: u64 },
    #[error("paste not found")]
    NotFound,
    #[error("stored content is {actual} bytes but {recorded} were recorded")]
    SizeMismatch { recorded: u64, actual: u64 },
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl Error {
    pub fn storage(context: &str, e: impl std::fmt::Display) -> Self {
        Self::StorageFailure(format!("{context}: {e}"))
    }

    /// Whether the error is the caller's fault rather than ours.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTtl
                | Self::InvalidSlug(_)
                | Self::SlugConflict
                | Self::ContentTooLarge { .. }
                | Self::NotFound
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::storage("io", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::storage("metadata encoding", e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Self::storage("object store", e)
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::storage("redis", e)
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(e: mongodb::error::Error) -> Self {
        Self::storage("mongodb", e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::StorageFailure("backend call timed out".to_string())
    }
}
