//! Behaviour every `Storage` implementation must share. Each backend's test
//! module runs `run_all` against a fresh instance.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use stashpad_common::Slug;

use super::{ContentStat, Storage};
use crate::error::Error;
use crate::paste::Paste;

pub fn paste(id: &str, expires_at: Option<DateTime<Utc>>, size: u64) -> Paste {
    Paste::new(
        id.parse().unwrap(),
        Utc::now(),
        expires_at,
        size,
        "text/plain".to_string(),
        false,
    )
}

fn slug(id: &str) -> Slug {
    id.parse().unwrap()
}

pub async fn run_all(storage: Arc<dyn Storage>) {
    // Backends backed by a shared server may still hold records from an
    // earlier run.
    let ids = ["META", "DUPE", "XPRD", "GNE2", "CNT2", "BLB2", "PRFX", "CNCR", "RCST"];
    for id in ids {
        storage.delete(&slug(id)).await.unwrap();
    }

    metadata_round_trip(&*storage).await;
    store_is_first_writer_wins(&*storage).await;
    expired_records_are_absent(&*storage).await;
    delete_is_idempotent(&*storage).await;
    read_count_increments(&*storage).await;
    content_round_trip(&*storage).await;
    content_prefix(&*storage).await;
    concurrent_increments_are_not_lost(&storage).await;
    racing_stores_have_one_winner(&storage).await;
}

async fn metadata_round_trip(storage: &dyn Storage) {
    let paste = paste("META", Some(Utc::now() + Duration::hours(1)), 12);
    assert!(!storage.exists(&paste.id).await.unwrap());
    assert_eq!(storage.get(&paste.id).await.unwrap(), None);

    storage.store(&paste).await.unwrap();
    assert!(storage.exists(&paste.id).await.unwrap());

    let fetched = storage.get(&paste.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, paste.id);
    assert_eq!(fetched.size, 12);
    assert_eq!(fetched.content_type, "text/plain");
    assert_eq!(fetched.read_count, 0);
    assert_eq!(
        fetched.expires_at.map(|t| t.timestamp_millis()),
        paste.expires_at.map(|t| t.timestamp_millis())
    );
}

async fn store_is_first_writer_wins(storage: &dyn Storage) {
    let first = paste("DUPE", None, 1);
    storage.store(&first).await.unwrap();

    let mut second = paste("DUPE", None, 2);
    second.content_type = "image/png".to_string();
    assert_eq!(storage.store(&second).await, Err(Error::SlugConflict));

    let kept = storage.get(&first.id).await.unwrap().unwrap();
    assert_eq!(kept.size, 1);
    assert_eq!(kept.content_type, "text/plain");
}

async fn expired_records_are_absent(storage: &dyn Storage) {
    let stale = paste("XPRD", Some(Utc::now() - Duration::seconds(5)), 3);
    storage.store(&stale).await.unwrap();

    assert!(!storage.exists(&stale.id).await.unwrap());
    assert_eq!(storage.get(&stale.id).await.unwrap(), None);
    assert_eq!(storage.increment_read_count(&stale.id).await.unwrap(), None);

    // An expired slug is free for reuse.
    let fresh = paste("XPRD", None, 4);
    storage.store(&fresh).await.unwrap();
    assert_eq!(storage.get(&fresh.id).await.unwrap().unwrap().size, 4);
}

async fn delete_is_idempotent(storage: &dyn Storage) {
    let paste = paste("GNE2", None, 3);
    storage.store(&paste).await.unwrap();
    storage
        .store_content(&paste.id, Bytes::from_static(b"bye"))
        .await
        .unwrap();

    storage.delete(&paste.id).await.unwrap();
    storage.delete(&paste.id).await.unwrap();

    assert!(!storage.exists(&paste.id).await.unwrap());
    assert_eq!(storage.get(&paste.id).await.unwrap(), None);
    assert_eq!(
        storage.stat_content(&paste.id).await.unwrap(),
        ContentStat::MISSING
    );
    assert_eq!(storage.get_content(&paste.id).await, Err(Error::NotFound));
}

async fn read_count_increments(storage: &dyn Storage) {
    let paste = paste("CNT2", None, 0);
    assert_eq!(storage.increment_read_count(&paste.id).await.unwrap(), None);

    storage.store(&paste).await.unwrap();
    assert_eq!(storage.increment_read_count(&paste.id).await.unwrap(), Some(1));
    assert_eq!(storage.increment_read_count(&paste.id).await.unwrap(), Some(2));
    assert_eq!(storage.get(&paste.id).await.unwrap().unwrap().read_count, 2);

    storage.delete(&paste.id).await.unwrap();
    assert_eq!(storage.increment_read_count(&paste.id).await.unwrap(), None);
    assert!(!storage.exists(&paste.id).await.unwrap());
}

async fn content_round_trip(storage: &dyn Storage) {
    let data: Bytes = (0..=255u8).cycle().take(70_000).collect::<Vec<_>>().into();
    let paste = paste("BLB2", None, data.len() as u64);
    storage.store(&paste).await.unwrap();

    assert_eq!(
        storage.stat_content(&paste.id).await.unwrap(),
        ContentStat::MISSING
    );
    assert_eq!(storage.get_content(&paste.id).await, Err(Error::NotFound));

    storage.store_content(&paste.id, data.clone()).await.unwrap();
    assert_eq!(
        storage.stat_content(&paste.id).await.unwrap(),
        ContentStat::present(70_000)
    );
    assert_eq!(storage.get_content(&paste.id).await.unwrap(), data);
}

async fn content_prefix(storage: &dyn Storage) {
    let paste = paste("PRFX", None, 10);
    storage.store(&paste).await.unwrap();
    storage
        .store_content(&paste.id, Bytes::from_static(b"0123456789"))
        .await
        .unwrap();

    let prefix = |len| storage.get_content_prefix(&paste.id, len);
    assert_eq!(prefix(4).await.unwrap(), Bytes::from_static(b"0123"));
    assert_eq!(prefix(10).await.unwrap(), Bytes::from_static(b"0123456789"));
    assert_eq!(prefix(1_000).await.unwrap(), Bytes::from_static(b"0123456789"));
    assert!(prefix(0).await.unwrap().is_empty());

    let missing = slug("NPRF");
    assert_eq!(
        storage.get_content_prefix(&missing, 4).await,
        Err(Error::NotFound)
    );
}

async fn concurrent_increments_are_not_lost(storage: &Arc<dyn Storage>) {
    let paste = paste("CNCR", None, 0);
    storage.store(&paste).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let storage = Arc::clone(storage);
            let id = paste.id.clone();
            tokio::spawn(async move { storage.increment_read_count(&id).await })
        })
        .collect();

    let mut counts = Vec::new();
    for handle in handles {
        counts.push(handle.await.unwrap().unwrap().unwrap());
    }
    counts.sort_unstable();
    assert_eq!(counts, (1..=16).collect::<Vec<u64>>());
}

async fn racing_stores_have_one_winner(storage: &Arc<dyn Storage>) {
    let handles: Vec<_> = (1..=8u64)
        .map(|size| {
            let storage = Arc::clone(storage);
            tokio::spawn(async move {
                let res = storage.store(&paste("RCST", None, size)).await;
                (size, res)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            (size, Ok(())) => winners.push(size),
            (_, res) => assert_eq!(res, Err(Error::SlugConflict)),
        }
    }
    assert_eq!(winners.len(), 1);

    let kept = storage.get(&slug("RCST")).await.unwrap().unwrap();
    assert_eq!(kept.size, winners[0]);
}
