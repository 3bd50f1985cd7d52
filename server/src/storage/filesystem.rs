//! Local filesystem storage backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use stashpad_common::Slug;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{metadata_key, ContentStat, Storage};
use crate::error::{Error, Result};
use crate::paste::Paste;

/// Stores `{id}` and `{id}.json` side by side in a single directory.
///
/// Read-modify-write of metadata is serialized by an in-process mutex, so
/// the read counter is only atomic for a single process owning the
/// directory.
pub struct FilesystemStorage {
    root: PathBuf,
    metadata_lock: Mutex<()>,
    tmp_counter: AtomicU64,
}

impl FilesystemStorage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            metadata_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn content_path(&self, id: &Slug) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn metadata_path(&self, id: &Slug) -> PathBuf {
        self.root.join(metadata_key(id))
    }

    fn tmp_path(&self, id: &Slug) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".{id}.{}.{n}.tmp", std::process::id()))
    }

    /// Writes `data` to a fresh temporary file in the storage directory so it
    /// can be linked or renamed into place in one step.
    async fn write_tmp(&self, id: &Slug, data: &[u8]) -> Result<PathBuf> {
        let tmp = self.tmp_path(id);
        tokio::fs::write(&tmp, data).await?;
        Ok(tmp)
    }

    async fn read_metadata(&self, id: &Slug) -> Result<Option<Paste>> {
        match tokio::fs::read(self.metadata_path(id)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publishes metadata only if no file exists at the target. Hard links
    /// fail on an existing destination, which makes this create-if-absent and
    /// never exposes a half written file.
    async fn create_metadata(&self, paste: &Paste, data: &[u8]) -> Result<()> {
        let tmp = self.write_tmp(&paste.id, data).await?;
        let linked = tokio::fs::hard_link(&tmp, self.metadata_path(&paste.id)).await;
        remove_if_present(&tmp).await?;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::SlugConflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_file(&self, id: &Slug, target: &Path, data: &[u8]) -> Result<()> {
        let tmp = self.write_tmp(id, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            remove_if_present(&tmp).await?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_paste_files(&self, id: &Slug) -> Result<()> {
        remove_if_present(&self.metadata_path(id)).await?;
        remove_if_present(&self.content_path(id)).await
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn store(&self, paste: &Paste) -> Result<()> {
        let data = serde_json::to_vec(paste)?;
        match self.create_metadata(paste, &data).await {
            Err(Error::SlugConflict) => (),
            res => return res,
        }

        // Something already sits at this id. It may only be replaced if it has
        // expired without anyone sweeping it.
        let _guard = self.metadata_lock.lock().await;
        match self.read_metadata(&paste.id).await? {
            Some(existing) if !existing.expired() => Err(Error::SlugConflict),
            _ => {
                self.remove_paste_files(&paste.id).await?;
                self.create_metadata(paste, &data).await
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
                Ok(Some(current)) if current.expired() => self.remove_paste_files(id).await,
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
        self.remove_paste_files(id).await
    }

    async fn increment_read_count(&self, id: &Slug) -> Result<Option<u64>> {
        let _guard = self.metadata_lock.lock().await;
        let mut paste = match self.read_metadata(id).await? {
            Some(paste) if !paste.expired() => paste,
            _ => return Ok(None),
        };

        paste.read_count += 1;
        let data = serde_json::to_vec(&paste)?;
        self.replace_file(id, &self.metadata_path(id), &data).await?;
        Ok(Some(paste.read_count))
    }

    async fn store_content(&self, id: &Slug, content: Bytes) -> Result<()> {
        self.replace_file(id, &self.content_path(id), &content).await
    }

    async fn get_content(&self, id: &Slug) -> Result<Bytes> {
        match tokio::fs::read(self.content_path(id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_content_prefix(&self, id: &Slug, len: u64) -> Result<Bytes> {
        let file = match tokio::fs::File::open(self.content_path(id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(e.into()),
        };

        let capacity = usize::try_from(len).unwrap_or(usize::MAX).min(1 << 20);
        let mut buffer = Vec::with_capacity(capacity);
        file.take(len).read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    async fn stat_content(&self, id: &Slug) -> Result<ContentStat> {
        match tokio::fs::metadata(self.content_path(id)).await {
            Ok(metadata) => Ok(ContentStat::present(metadata.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ContentStat::MISSING),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
