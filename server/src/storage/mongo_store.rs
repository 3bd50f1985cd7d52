//! MongoDB storage backend.
//!
//! One document per paste, `_id` being the slug. Content is a generic binary
//! field on the same document and is left out of every metadata projection.
//! A TTL index on `expires_at` lets the server reclaim expired pastes; the
//! query filters still treat them as absent until it does.
//!
//! Prefix reads load the whole document and cut it down, as the server has no
//! byte range read for binary fields. Peak memory for a preview is therefore
//! the paste size, bounded by the 16 MiB document limit, not the preview
//! threshold.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, doc, Binary, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use stashpad_common::Slug;
use tracing::info;

use super::{ContentStat, Storage};
use crate::error::{Error, Result};
use crate::paste::Paste;

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStorage {
    client: Client,
    pastes: Collection<Document>,
}

impl MongoStorage {
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let pastes = client.database(database).collection::<Document>(collection);

        let ttl_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();
        pastes.create_index(ttl_index, None).await?;
        info!("Ensured ttl index on {}.{}", database, collection);

        Ok(Self { client, pastes })
    }

    async fn insert(&self, paste: &Paste) -> Result<bool> {
        match self.pastes.insert_one(to_document(paste)?, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

/// Matches the paste only while it has not expired.
fn live(id: &Slug) -> Document {
    doc! {
        "_id": id.as_str(),
        "$or": [
            { "expires_at": Bson::Null },
            { "expires_at": { "$gt": bson::DateTime::now() } },
        ],
    }
}

fn without_content() -> FindOneOptions {
    FindOneOptions::builder()
        .projection(doc! { "content": 0 })
        .build()
}

fn to_bson_time(time: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(time.timestamp_millis())
}

fn to_document(paste: &Paste) -> Result<Document> {
    let size = i64::try_from(paste.size).map_err(|e| Error::storage("paste size", e))?;
    let read_count =
        i64::try_from(paste.read_count).map_err(|e| Error::storage("read count", e))?;
    Ok(doc! {
        "_id": paste.id.as_str(),
        "created_at": to_bson_time(paste.created_at),
        "expires_at": paste.expires_at.map_or(Bson::Null, |t| Bson::DateTime(to_bson_time(t))),
        "size": size,
        "content_type": paste.content_type.as_str(),
        "burn_after_read": paste.burn_after_read,
        "read_count": read_count,
    })
}

fn from_document(document: &Document) -> Result<Paste> {
    let corrupt = |name: &str| Error::StorageFailure(format!("mongodb document has a bad {name}"));
    let timestamp = |time: &bson::DateTime| {
        Utc.timestamp_millis_opt(time.timestamp_millis()).single()
    };
    let unsigned = |name: &str| {
        document
            .get_i64(name)
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| corrupt(name))
    };

    let expires_at = match document.get("expires_at") {
        None | Some(Bson::Null) => None,
        Some(Bson::DateTime(time)) => Some(timestamp(time).ok_or_else(|| corrupt("expires_at"))?),
        Some(_) => return Err(corrupt("expires_at")),
    };

    Ok(Paste {
        id: document
            .get_str("_id")
            .ok()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| corrupt("_id"))?,
        created_at: document
            .get_datetime("created_at")
            .ok()
            .and_then(timestamp)
            .ok_or_else(|| corrupt("created_at"))?,
        expires_at,
        size: unsigned("size")?,
        content_type: document
            .get_str("content_type")
            .map_err(|_| corrupt("content_type"))?
            .to_string(),
        burn_after_read: document
            .get_bool("burn_after_read")
            .map_err(|_| corrupt("burn_after_read"))?,
        read_count: unsigned("read_count")?,
    })
}

#[async_trait]
impl Storage for MongoStorage {
    async fn store(&self, paste: &Paste) -> Result<()> {
        if self.insert(paste).await? {
            return Ok(());
        }

        // The id is taken. Only a record the ttl monitor has not reaped yet
        // may be replaced.
        let reaped = self
            .pastes
            .delete_one(
                doc! {
                    "_id": paste.id.as_str(),
                    "expires_at": { "$lte": bson::DateTime::now() },
                },
                None,
            )
            .await?;
        if reaped.deleted_count == 1 && self.insert(paste).await? {
            Ok(())
        } else {
            Err(Error::SlugConflict)
        }
    }

    async fn get(&self, id: &Slug) -> Result<Option<Paste>> {
        self.pastes
            .find_one(live(id), without_content())
            .await?
            .map(|document| from_document(&document))
            .transpose()
    }

    async fn exists(&self, id: &Slug) -> Result<bool> {
        let options = FindOneOptions::builder()
            .projection(doc! { "_id": 1 })
            .build();
        Ok(self.pastes.find_one(live(id), options).await?.is_some())
    }

    async fn delete(&self, id: &Slug) -> Result<()> {
        self.pastes
            .delete_one(doc! { "_id": id.as_str() }, None)
            .await?;
        Ok(())
    }

    async fn increment_read_count(&self, id: &Slug) -> Result<Option<u64>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .projection(doc! { "read_count": 1 })
            .build();
        let updated = self
            .pastes
            .find_one_and_update(live(id), doc! { "$inc": { "read_count": 1_i64 } }, options)
            .await?;

        let bad_count = || Error::StorageFailure("mongodb returned a bad read count".into());
        updated
            .map(|document| {
                document
                    .get_i64("read_count")
                    .ok()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(bad_count)
            })
            .transpose()
    }

    async fn store_content(&self, id: &Slug, content: Bytes) -> Result<()> {
        let content = Binary {
            subtype: BinarySubtype::Generic,
            bytes: content.to_vec(),
        };
        let result = self
            .pastes
            .update_one(
                doc! { "_id": id.as_str() },
                doc! { "$set": { "content": content } },
                None,
            )
            .await?;

        if result.matched_count == 1 {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn get_content(&self, id: &Slug) -> Result<Bytes> {
        let options = FindOneOptions::builder()
            .projection(doc! { "content": 1 })
            .build();
        let document = self
            .pastes
            .find_one(doc! { "_id": id.as_str() }, options)
            .await?
            .ok_or(Error::NotFound)?;

        match document.get("content") {
            Some(Bson::Binary(binary)) => Ok(Bytes::from(binary.bytes.clone())),
            None => Err(Error::NotFound),
            Some(_) => Err(Error::StorageFailure(
                "mongodb content is not binary".to_string(),
            )),
        }
    }

    async fn get_content_prefix(&self, id: &Slug, len: u64) -> Result<Bytes> {
        // Documents are read whole; the server has no byte range read for
        // binary fields.
        let mut content = self.get_content(id).await?;
        content.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(content)
    }

    async fn stat_content(&self, id: &Slug) -> Result<ContentStat> {
        let pipeline = [
            doc! { "$match": { "_id": id.as_str() } },
            doc! { "$project": { "size": { "$binarySize": "$content" } } },
        ];
        let mut cursor = self.pastes.aggregate(pipeline, None).await?;
        let document = match cursor.try_next().await? {
            Some(document) => document,
            None => return Ok(ContentStat::MISSING),
        };

        let size = match document.get("size") {
            Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
            Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
            // $binarySize of a missing field is null
            _ => return Ok(ContentStat::MISSING),
        };
        size.map(ContentStat::present)
            .ok_or_else(|| Error::StorageFailure("mongodb returned a bad content size".into()))
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
