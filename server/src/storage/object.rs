//! Object storage backend on top of `object_store`.
//!
//! Works with anything `object_store` can open from a url: `s3://bucket`,
//! `file:///srv/pastes`, `memory:///`. First-writer-wins relies on
//! conditional puts, so S3 buckets need a conditional put mechanism configured
//! through the usual `AWS_*` environment variables.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use stashpad_common::Slug;
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use super::{metadata_key, ContentStat, Storage};
use crate::error::{Error, Result};
use crate::paste::Paste;

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    // Guards read-modify-write of metadata objects within this process only.
    metadata_lock: Mutex<()>,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self::with_base(store, Path::default(), prefix)
    }

    pub fn from_url(url: &str, prefix: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::storage("object store url", e))?;
        let (store, base) = object_store::parse_url(&url)?;
        Ok(Self::with_base(Arc::from(store), base, prefix))
    }

    fn with_base(store: Arc<dyn ObjectStore>, base: Path, prefix: &str) -> Self {
        let prefix = prefix
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(base, |path, part| path.child(part));
        Self {
            store,
            prefix,
            metadata_lock: Mutex::new(()),
        }
    }

    fn content_path(&self, id: &Slug) -> Path {
        self.prefix.child(id.as_str())
    }

    fn metadata_path(&self, id: &Slug) -> Path {
        self.prefix.child(metadata_key(id))
    }

    async fn read_metadata(&self, id: &Slug) -> Result<Option<Paste>> {
        match self.store.get(&self.metadata_path(id)).await {
            Ok(result) => {
                let data = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_metadata(&self, id: &Slug, data: Bytes) -> Result<()> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..PutOptions::default()
        };
        match self
            .store
            .put_opts(&self.metadata_path(id), PutPayload::from(data), opts)
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => Err(Error::SlugConflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, path: &Path) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_paste_objects(&self, id: &Slug) -> Result<()> {
        self.delete_object(&self.metadata_path(id)).await?;
        self.delete_object(&self.content_path(id)).await
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn store(&self, paste: &Paste) -> Result<()> {
        let data = Bytes::from(serde_json::to_vec(paste)?);
        match self.create_metadata(&paste.id, data.clone()).await {
            Err(Error::SlugConflict) => (),
            res => return res,
        }

        let _guard = self.metadata_lock.lock().await;
        match self.read_metadata(&paste.id).await? {
            Some(existing) if !existing.expired() => Err(Error::SlugConflict),
            _ => {
                self.remove_paste_objects(&paste.id).await?;
                self.create_metadata(&paste.id, data).await
            }
        }
    }

    async fn get(&self, id: &Slug) -> Result<Option<Paste>> {
        let paste = match self.read_metadata(id).await? {
            Some(paste) => paste,
            None => return Ok(None),
        };

        if paste.expired() {
            let _guard = self.metadata_lock.lock().await;
            // A store may have reused the slug since the unlocked read.
            let swept = match self.read_metadata(id).await {
                Ok(Some(current)) if current.expired() => self.remove_paste_objects(id).await,
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = swept {
                warn!("Failed to remove expired paste {}: {}", id, e);
            }
            return Ok(None);
        }

        Ok(Some(paste))
    }

    async fn exists(&self, id: &Slug) -> Result<bool> {
        Ok(self
            .read_metadata(id)
            .await?
            .map_or(false, |paste| !paste.expired()))
    }

    async fn delete(&self, id: &Slug) -> Result<()> {
        let _guard = self.metadata_lock.lock().await;
        self.remove_paste_objects(id).await
    }

    async fn increment_read_count(&self, id: &Slug) -> Result<Option<u64>> {
        let _guard = self.metadata_lock.lock().await;
        let mut paste = match self.read_metadata(id).await? {
            Some(paste) if !paste.expired() => paste,
            _ => return Ok(None),
        };

        paste.read_count += 1;
        let payload = PutPayload::from(serde_json::to_vec(&paste)?);
        self.store.put(&self.metadata_path(id), payload).await?;
        Ok(Some(paste.read_count))
    }

    async fn store_content(&self, id: &Slug, content: Bytes) -> Result<()> {
        self.store
            .put(&self.content_path(id), PutPayload::from(content))
            .await?;
        Ok(())
    }

    async fn get_content(&self, id: &Slug) -> Result<Bytes> {
        match self.store.get(&self.content_path(id)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_content_prefix(&self, id: &Slug, len: u64) -> Result<Bytes> {
        let path = self.content_path(id);
        let size = match self.store.head(&path).await {
            Ok(meta) => meta.size,
            Err(object_store::Error::NotFound { .. }) => return Err(Error::NotFound),
            Err(e) => return Err(e.into()),
        };

        let end = len.min(size);
        if end == 0 {
            return Ok(Bytes::new());
        }

        match self.store.get_range(&path, 0..end).await {
            Ok(data) => Ok(data),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat_content(&self, id: &Slug) -> Result<ContentStat> {
        match self.store.head(&self.content_path(id)).await {
            Ok(meta) => Ok(ContentStat::present(meta.size)),
            Err(object_store::Error::NotFound { .. }) => Ok(ContentStat::MISSING),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
