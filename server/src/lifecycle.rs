//! Creation, reading, burning and deletion of pastes on top of a storage
//! backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use stashpad_common::{Generator, PasteSummary, Slug};
use tracing::{debug, error, info, instrument, warn};

use crate::delivery::{Delivery, Preview, Tier};
use crate::error::{Error, Result};
use crate::integrity::Integrity;
use crate::paste::{content_type_for, Paste, PastePolicy};
use crate::slug::{SlugAllocator, DEFAULT_MAX_ATTEMPTS};
use crate::storage::Storage;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub slug_len: usize,
    pub slug_attempts: usize,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Applied when the uploader does not ask for a ttl. `None` keeps such
    /// pastes forever.
    pub default_ttl: Option<Duration>,
    /// Largest paste rendered whole in a preview.
    pub preview_threshold: u64,
    pub max_content_size: u64,
    /// Deadline for every single backend call.
    pub backend_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slug_len: 8,
            slug_attempts: DEFAULT_MAX_ATTEMPTS,
            min_ttl: HOUR,
            max_ttl: 7 * DAY,
            default_ttl: Some(DAY),
            preview_threshold: 64 * 1024,
            max_content_size: 10 * 1024 * 1024,
            backend_timeout: Duration::from_secs(10),
        }
    }
}

pub struct PasteManager {
    storage: Arc<dyn Storage>,
    allocator: SlugAllocator,
    config: EngineConfig,
}

impl PasteManager {
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self> {
        let generator = Generator::new(config.slug_len)?;
        Ok(Self {
            storage,
            allocator: SlugAllocator::new(generator, config.slug_attempts),
            config,
        })
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a single backend call under the configured deadline.
    async fn call<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.backend_timeout, op).await?
    }

    /// Like `call`, but gives a read-only operation one more try when the
    /// backend fails.
    async fn call_idempotent<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.call(op()).await {
            Err(Error::StorageFailure(e)) => {
                warn!("{} failed, retrying once: {}", what, e);
                self.call(op()).await
            }
            res => res,
        }
    }

    fn expiry(
        &self,
        now: DateTime<Utc>,
        requested: Option<Duration>,
    ) -> Result<Option<DateTime<Utc>>> {
        let ttl = match requested {
            Some(ttl) if ttl < self.config.min_ttl || ttl > self.config.max_ttl => {
                return Err(Error::InvalidTtl)
            }
            Some(ttl) => Some(ttl),
            None => self.config.default_ttl,
        };

        ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or(Error::InvalidTtl)
        })
        .transpose()
    }

    /// Is `id` held by a live paste.
    async fn taken(&self, id: &Slug) -> Result<bool> {
        self.call(self.storage.exists(id)).await
    }

    /// Stores metadata under a fresh slug. Losing the `store` race to a
    /// concurrent upload counts as a collision like any other.
    async fn store_generated(&self, paste_for: impl Fn(Slug) -> Paste) -> Result<Paste> {
        let paste_for = &paste_for;
        let id = self
            .allocator
            .allocate(|id| async move {
                if self.taken(&id).await? {
                    return Ok(true);
                }
                match self.call(self.storage.store(&paste_for(id))).await {
                    Ok(()) => Ok(false),
                    Err(Error::SlugConflict) => Ok(true),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(paste_for(id))
    }

    #[instrument(skip(self, content, policy), fields(size = content.len()))]
    pub async fn create_paste(&self, content: Bytes, policy: PastePolicy) -> Result<PasteSummary> {
        let size = u64::try_from(content.len()).unwrap_or(u64::MAX);
        if size > self.config.max_content_size {
            return Err(Error::ContentTooLarge {
                size,
                limit: self.config.max_content_size,
            });
        }

        let now = Utc::now();
        let expires_at = self.expiry(now, policy.ttl)?;
        let content_type = content_type_for(policy.content_type.as_deref(), &content);
        let paste_for = |id| {
            Paste::new(
                id,
                now,
                expires_at,
                size,
                content_type.clone(),
                policy.burn_after_read,
            )
        };

        let paste = match policy.custom_slug.as_deref() {
            Some(raw) => {
                let id = self
                    .allocator
                    .claim_custom(raw, |id| async move { self.taken(&id).await })
                    .await?;
                let paste = paste_for(id);
                self.call(self.storage.store(&paste)).await?;
                paste
            }
            None => self.store_generated(paste_for).await?,
        };

        if let Err(e) = self.call(self.storage.store_content(&paste.id, content)).await {
            error!("Failed to store content for {}: {}", paste.id, e);
            // Leaving the metadata behind would only produce size mismatches.
            if let Err(rollback) = self.call(self.storage.delete(&paste.id)).await {
                warn!("Failed to roll back metadata for {}: {}", paste.id, rollback);
            }
            return Err(e);
        }

        info!(
            "Created paste {} ({} bytes, {})",
            paste.id, paste.size, paste.content_type
        );
        Ok(paste.summary())
    }

    async fn lookup(&self, id: &Slug) -> Result<Paste> {
        self.call_idempotent("get", || self.storage.get(id))
            .await?
            .filter(|paste| !paste.expired())
            .ok_or(Error::NotFound)
    }

    /// Counts one read, returning the new total.
    async fn count_read(&self, id: &Slug) -> Result<u64> {
        self.call(self.storage.increment_read_count(id))
            .await?
            .ok_or(Error::NotFound)
    }

    /// Checks the content and, for burn pastes, claims the single read: only
    /// the caller that moves the count from 0 to 1 gets through.
    async fn claim(&self, id: &Slug) -> Result<Paste> {
        let mut paste = self.lookup(id).await?;
        self.verify(&paste).await?;

        if paste.is_burn_after_read() {
            let count = self.count_read(id).await?;
            if count != 1 {
                debug!("Burn paste {} was already claimed", id);
                return Err(Error::NotFound);
            }
            paste.read_count = count;
        }
        Ok(paste)
    }

    async fn burn(&self, id: &Slug) {
        match self.call(self.storage.delete(id)).await {
            Ok(()) => info!("Burned paste {}", id),
            Err(e) => error!("Failed to delete burned paste {}: {}", id, e),
        }
    }

    /// Fetches live metadata. With `for_delivery` the content is checked
    /// against the recorded size and the read is counted. No content is
    /// returned here, so a burn paste read this way is spent and deleted
    /// straight away.
    #[instrument(skip(self))]
    pub async fn read_paste(&self, id: &Slug, for_delivery: bool) -> Result<Paste> {
        if !for_delivery {
            return self.lookup(id).await;
        }

        let mut paste = self.claim(id).await?;
        if paste.is_burn_after_read() {
            self.burn(id).await;
        } else {
            paste.read_count = self.count_read(id).await?;
        }
        Ok(paste)
    }

    /// One `stat_content` per read.
    async fn verify(&self, paste: &Paste) -> Result<()> {
        let stat = self
            .call_idempotent("stat_content", || self.storage.stat_content(&paste.id))
            .await?;
        let verdict = Integrity::check(paste, stat);
        let metadata_alive = match verdict {
            // Content can vanish legitimately when a concurrent burn or
            // delete got to the paste first.
            Integrity::Missing => self.taken(&paste.id).await?,
            _ => true,
        };
        verdict.into_result(paste, metadata_alive)
    }

    async fn deliver(&self, id: &str, tier_for: impl FnOnce(u64) -> Tier) -> Result<Delivery> {
        let id = lookup_id(id)?;
        let paste = self.claim(&id).await?;
        let tier = tier_for(paste.size);

        let fetched = match tier {
            Tier::Full => self.call(self.storage.get_content(&id)).await,
            Tier::Prefix(len) => self.call(self.storage.get_content_prefix(&id, len)).await,
        };

        // A claimed burn read is spent even if fetching failed.
        if paste.is_burn_after_read() {
            self.burn(&id).await;
        }

        let bytes = fetched?;
        if tier == Tier::Full && bytes.len() as u64 != paste.size {
            warn!(
                "Paste {} changed size during the read ({} of {} bytes)",
                id,
                bytes.len(),
                paste.size
            );
        }
        if !paste.is_burn_after_read() {
            self.count_read(&id).await?;
        }

        Ok(Delivery {
            bytes,
            content_type: paste.content_type,
            truncated: tier.is_truncated(),
            size: paste.size,
        })
    }

    /// Serves a paste's content. With `wants_full_delivery` the whole paste is
    /// returned, otherwise anything above the preview threshold is truncated.
    #[instrument(skip(self))]
    pub async fn read_content(&self, id: &str, wants_full_delivery: bool) -> Result<Delivery> {
        let limit = self.config.preview_threshold;
        self.deliver(id, |size| Tier::for_size(size, wants_full_delivery, limit))
            .await
    }

    /// Serves at most `max_bytes` of a paste.
    #[instrument(skip(self))]
    pub async fn read_preview(&self, id: &str, max_bytes: u64) -> Result<Preview> {
        self.deliver(id, |size| Tier::for_size(size, false, max_bytes))
            .await
            .map(Preview::from)
    }

    /// Side effect free, neither counts as a read nor burns.
    #[instrument(skip(self))]
    pub async fn get_metadata(&self, id: &str) -> Result<PasteSummary> {
        let id = lookup_id(id)?;
        Ok(self.lookup(&id).await?.summary())
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        match id.parse::<Slug>() {
            Ok(id) => self.taken(&id).await,
            Err(_) => Ok(false),
        }
    }

    /// Removes a paste. Deleting something that is not there succeeds.
    #[instrument(skip(self))]
    pub async fn delete_paste(&self, id: &str) -> Result<()> {
        match id.parse::<Slug>() {
            Ok(id) => self.call(self.storage.delete(&id)).await,
            Err(_) => Ok(()),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}

/// Strings that can never be a slug are simply not found.
fn lookup_id(raw: &str) -> Result<Slug> {
    raw.parse().map_err(|_| Error::NotFound)
}
