//! Storage backend abstraction.
//!
//! Every backend persists two things per paste: the metadata record and the
//! raw content. They are written and read independently so that metadata
//! stays cheap to touch and the content can be stat'ed or read partially.
//!
//! - Local filesystem: `{id}` and `{id}.json` in one directory
//! - Object storage (`object_store`: S3, local, in-memory): same layout under
//!   a key prefix
//! - Redis: a hash per paste plus a sibling content string, native expiry
//! - MongoDB: one document per paste, TTL index on `expires_at`

mod filesystem;
mod mongo_store;
mod object;
mod redis_store;

#[cfg(test)]
pub(crate) mod conformance;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use stashpad_common::Slug;
use tracing::info;

pub use self::filesystem::FilesystemStorage;
pub use self::mongo_store::MongoStorage;
pub use self::object::ObjectStorage;
pub use self::redis_store::RedisStorage;
use crate::error::Result;
use crate::paste::Paste;

/// Result of probing the stored content without transferring it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentStat {
    pub exists: bool,
    pub size: u64,
}

impl ContentStat {
    pub const MISSING: Self = Self {
        exists: false,
        size: 0,
    };

    pub const fn present(size: u64) -> Self {
        Self { exists: true, size }
    }
}

/// The contract every backend implements.
///
/// Expired records must look absent to `get` and `exists` regardless of
/// whether the backend has already reclaimed them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists metadata. Fails with `SlugConflict` instead of overwriting a
    /// live record with the same id.
    async fn store(&self, paste: &Paste) -> Result<()>;

    async fn get(&self, id: &Slug) -> Result<Option<Paste>>;

    async fn exists(&self, id: &Slug) -> Result<bool>;

    /// Removes metadata and content. Deleting a missing paste is not an error.
    async fn delete(&self, id: &Slug) -> Result<()>;

    /// Atomically bumps the read counter, returning the new value, or `None`
    /// if there is no live record to bump.
    async fn increment_read_count(&self, id: &Slug) -> Result<Option<u64>>;

    async fn store_content(&self, id: &Slug, content: Bytes) -> Result<()>;

    /// Fails with `NotFound` when no content is stored.
    async fn get_content(&self, id: &Slug) -> Result<Bytes>;

    /// Returns at most the first `len` bytes without reading the rest.
    async fn get_content_prefix(&self, id: &Slug, len: u64) -> Result<Bytes>;

    async fn stat_content(&self, id: &Slug) -> Result<ContentStat>;

    async fn close(&self) -> Result<()>;
}

/// Which backend to open, and how.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    Filesystem {
        root: std::path::PathBuf,
    },
    ObjectStore {
        url: String,
        prefix: String,
    },
    Redis {
        url: String,
        key_prefix: String,
    },
    Mongo {
        uri: String,
        database: String,
        collection: String,
    },
}

impl StorageConfig {
    pub async fn connect(&self) -> Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self {
            Self::Filesystem { root } => {
                info!("Using filesystem storage at {}", root.display());
                Arc::new(FilesystemStorage::new(root).await?)
            }
            Self::ObjectStore { url, prefix } => {
                info!("Using object storage at {url} with prefix {prefix:?}");
                Arc::new(ObjectStorage::from_url(url, prefix)?)
            }
            Self::Redis { url, key_prefix } => {
                info!("Using redis storage with key prefix {key_prefix:?}");
                Arc::new(RedisStorage::connect(url, key_prefix).await?)
            }
            Self::Mongo {
                database,
                collection,
                uri,
            } => {
                info!("Using mongodb storage in {database}.{collection}");
                Arc::new(MongoStorage::connect(uri, database, collection).await?)
            }
        };
        Ok(storage)
    }
}

pub(crate) fn metadata_key(id: &Slug) -> String {
    format!("{id}.json")
}
