use std::future::Future;
use std::sync::{Mutex, PoisonError};

use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use stashpad_common::{Generator, Slug};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

/// Hands out slugs that were free at the time they were checked.
///
/// Uniqueness is only probed, never reserved: the storage backend's
/// first-writer-wins `store` is what finally settles a race.
pub struct SlugAllocator {
    generator: Generator,
    rng: Mutex<StdRng>,
    max_attempts: usize,
}

impl SlugAllocator {
    pub fn new(generator: Generator, max_attempts: usize) -> Self {
        Self::with_rng(generator, max_attempts, StdRng::from_entropy())
    }

    pub fn with_rng(generator: Generator, max_attempts: usize, rng: StdRng) -> Self {
        Self {
            generator,
            rng: Mutex::new(rng),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn candidate(&self) -> Slug {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample(&self.generator)
    }

    /// Draws candidates until `is_taken` reports one as free.
    pub async fn allocate<F, Fut>(&self, mut is_taken: F) -> Result<Slug>
    where
        F: FnMut(Slug) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate();
            if !is_taken(candidate.clone()).await? {
                return Ok(candidate);
            }
            debug!("Slug {} is taken (attempt {})", candidate, attempt);
        }

        Err(Error::SlugSpaceExhausted)
    }

    /// Validates a caller supplied slug. There is no fallback to a generated
    /// one when it is taken.
    pub async fn claim_custom<F, Fut>(&self, raw: &str, is_taken: F) -> Result<Slug>
    where
        F: FnOnce(Slug) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let slug: Slug = raw.parse()?;
        if is_taken(slug.clone()).await? {
            return Err(Error::SlugConflict);
        }
        Ok(slug)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stashpad_common::SlugError;

    use super::*;

    fn allocator(len: usize) -> SlugAllocator {
        SlugAllocator::with_rng(
            Generator::new(len).unwrap(),
            DEFAULT_MAX_ATTEMPTS,
            StdRng::seed_from_u64(7),
        )
    }

    #[tokio::test]
    async fn allocates_slugs_of_the_configured_length() {
        let allocator = allocator(9);
        let slug = allocator.allocate(|_| async { Ok(false) }).await.unwrap();
        assert_eq!(slug.as_str().len(), 9);
    }

    #[tokio::test]
    async fn retries_past_collisions() {
        let allocator = allocator(4);
        let calls = AtomicUsize::new(0);
        let slug = allocator
            .allocate(|_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(call < 3) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(slug.as_str().len(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_bound() {
        let allocator = allocator(3);
        let calls = AtomicUsize::new(0);
        let res = allocator
            .allocate(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            })
            .await;

        assert_eq!(res, Err(Error::SlugSpaceExhausted));
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn propagates_probe_failures() {
        let allocator = allocator(3);
        let res = allocator
            .allocate(|_| async { Err(Error::StorageFailure("down".to_string())) })
            .await;
        assert_eq!(res, Err(Error::StorageFailure("down".to_string())));
    }

    #[test]
    fn candidates_do_not_repeat_quickly() {
        let allocator = allocator(8);
        let drawn: HashSet<_> = (0..500).map(|_| allocator.candidate()).collect();
        assert_eq!(drawn.len(), 500);
    }

    #[tokio::test]
    async fn custom_slugs_are_validated_then_checked_once() {
        let allocator = allocator(8);
        let calls = AtomicUsize::new(0);
        let probe = |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        };

        assert_eq!(
            allocator.claim_custom("MYPASTE", probe).await.unwrap().as_str(),
            "MYPASTE"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            allocator.claim_custom("bad0", |_| async { Ok(false) }).await,
            Err(Error::InvalidSlug(SlugError::Character('b')))
        );
        assert_eq!(
            allocator.claim_custom("AB", |_| async { Ok(false) }).await,
            Err(Error::InvalidSlug(SlugError::Length(2)))
        );
        assert_eq!(
            allocator.claim_custom("TAKEN", |_| async { Ok(true) }).await,
            Err(Error::SlugConflict)
        );
    }
}
