//! Redis storage backend.
//!
//! Metadata is a hash at `{prefix}{id}`, content a plain string at
//! `{prefix}{id}:content` so that `STRLEN` and `GETRANGE` work on it. Both
//! keys carry the paste's expiry, which lets Redis reclaim them on its own.
//! Mutations that must be atomic run as Lua scripts.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use redis::aio::MultiplexedConnection;
use redis::Script;
use stashpad_common::Slug;
use tracing::warn;

use super::{ContentStat, Storage};
use crate::error::{Error, Result};
use crate::paste::Paste;

lazy_static! {
    static ref STORE_SCRIPT: Script = Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
        redis.call('HSET', KEYS[1],
            'id', ARGV[1], 'created_at', ARGV[2], 'expires_at', ARGV[3],
            'size', ARGV[4], 'content_type', ARGV[5], 'burn_after_read', ARGV[6],
            'read_count', 0)
        redis.call('DEL', KEYS[2])
        if ARGV[7] ~= '' then redis.call('PEXPIREAT', KEYS[1], ARGV[7]) end
        return 1
        "
    );
    static ref STORE_CONTENT_SCRIPT: Script = Script::new(
        r"
        local ttl = redis.call('PTTL', KEYS[1])
        if ttl == -2 then return 0 end
        redis.call('SET', KEYS[2], ARGV[1])
        if ttl > 0 then redis.call('PEXPIRE', KEYS[2], ttl) end
        return 1
        "
    );
    static ref INCREMENT_SCRIPT: Script = Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then return false end
        return redis.call('HINCRBY', KEYS[1], 'read_count', 1)
        "
    );
}

pub struct RedisStorage {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStorage {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn metadata_key(&self, id: &Slug) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn content_key(&self, id: &Slug) -> String {
        format!("{}{}:content", self.key_prefix, id)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn store(&self, paste: &Paste) -> Result<()> {
        let mut conn = self.conn.clone();
        let expires_at = paste.expires_at.map(|t| t.to_rfc3339());
        let expire_at_millis = paste
            .expires_at
            .map(|t| t.timestamp_millis().to_string());
        let stored: i64 = STORE_SCRIPT
            .key(self.metadata_key(&paste.id))
            .key(self.content_key(&paste.id))
            .arg(paste.id.as_str())
            .arg(paste.created_at.to_rfc3339())
            .arg(expires_at.unwrap_or_default())
            .arg(paste.size)
            .arg(&paste.content_type)
            .arg(u8::from(paste.burn_after_read))
            .arg(expire_at_millis.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        if stored == 1 {
            Ok(())
        } else {
            Err(Error::SlugConflict)
        }
    }

    async fn get(&self, id: &Slug) -> Result<Option<Paste>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.metadata_key(id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let paste = paste_from_fields(&fields)?;
        // Redis evicts on its own; this only covers clock skew between us and
        // the server.
        if paste.expired() {
            if let Err(e) = self.delete(id).await {
                warn!("Failed to remove expired paste {}: {}", id, e);
            }
            return Ok(None);
        }

        Ok(Some(paste))
    }

    async fn exists(&self, id: &Slug) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.metadata_key(id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn delete(&self, id: &Slug) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.metadata_key(id))
            .arg(self.content_key(id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment_read_count(&self, id: &Slug) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = INCREMENT_SCRIPT
            .key(self.metadata_key(id))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn store_content(&self, id: &Slug, content: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let stored: i64 = STORE_CONTENT_SCRIPT
            .key(self.metadata_key(id))
            .key(self.content_key(id))
            .arg(content.as_ref())
            .invoke_async(&mut conn)
            .await?;

        if stored == 1 {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn get_content(&self, id: &Slug) -> Result<Bytes> {
        let mut conn = self.conn.clone();
        let content: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.content_key(id))
            .query_async(&mut conn)
            .await?;
        content.map(Bytes::from).ok_or(Error::NotFound)
    }

    async fn get_content_prefix(&self, id: &Slug, len: u64) -> Result<Bytes> {
        let mut conn = self.conn.clone();
        let key = self.content_key(id);
        // GETRANGE with an end of -1 means "to the end", so an empty prefix
        // only needs the existence check.
        let (exists, prefix): (bool, Vec<u8>) = if len == 0 {
            let exists: bool = redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await?;
            (exists, Vec::new())
        } else {
            redis::pipe()
                .atomic()
                .cmd("EXISTS")
                .arg(&key)
                .cmd("GETRANGE")
                .arg(&key)
                .arg(0)
                .arg(len - 1)
                .query_async(&mut conn)
                .await?
        };

        if exists {
            Ok(Bytes::from(prefix))
        } else {
            Err(Error::NotFound)
        }
    }

    async fn stat_content(&self, id: &Slug) -> Result<ContentStat> {
        let mut conn = self.conn.clone();
        let key = self.content_key(id);
        let (exists, size): (bool, u64) = redis::pipe()
            .atomic()
            .cmd("EXISTS")
            .arg(&key)
            .cmd("STRLEN")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        Ok(if exists {
            ContentStat::present(size)
        } else {
            ContentStat::MISSING
        })
    }

    async fn close(&self) -> Result<()> {
        // The multiplexed connection closes once the last clone is dropped.
        Ok(())
    }
}

fn paste_from_fields(fields: &HashMap<String, String>) -> Result<Paste> {
    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::StorageFailure(format!("redis record is missing {name}")))
    };
    let corrupt = |name: &str| Error::StorageFailure(format!("redis record has a bad {name}"));
    let timestamp = |value: &str| {
        DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
    };

    let expires_at = match field("expires_at")? {
        "" => None,
        value => Some(timestamp(value).map_err(|_| corrupt("expires_at"))?),
    };

    Ok(Paste {
        id: field("id")?.parse().map_err(|_| corrupt("id"))?,
        created_at: timestamp(field("created_at")?).map_err(|_| corrupt("created_at"))?,
        expires_at,
        size: field("size")?.parse().map_err(|_| corrupt("size"))?,
        content_type: field("content_type")?.to_string(),
        burn_after_read: field("burn_after_read")? == "1",
        read_count: field("read_count")?.parse().map_err(|_| corrupt("read_count"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_stored_fields() {
        let paste = paste_from_fields(&fields(&[
            ("id", "RDS2"),
            ("created_at", "2024-03-01T12:00:00+00:00"),
            ("expires_at", ""),
            ("size", "42"),
            ("content_type", "text/plain"),
            ("burn_after_read", "1"),
            ("read_count", "3"),
        ]))
        .unwrap();

        assert_eq!(paste.id.as_str(), "RDS2");
        assert_eq!(paste.expires_at, None);
        assert_eq!(paste.size, 42);
        assert!(paste.burn_after_read);
        assert_eq!(paste.read_count, 3);
    }

    #[test]
    fn rejects_corrupt_fields() {
        let record = fields(&[
            ("id", "RDS2"),
            ("created_at", "yesterday"),
            ("expires_at", ""),
            ("size", "42"),
            ("content_type", "text/plain"),
            ("burn_after_read", "0"),
            ("read_count", "0"),
        ]);
        assert!(matches!(
            paste_from_fields(&record),
            Err(Error::StorageFailure(_))
        ));
        assert!(paste_from_fields(&fields(&[("id", "RDS2")])).is_err());
    }

    // Needs a running server: STASHPAD_TEST_REDIS_URL=redis://127.0.0.1/
    #[tokio::test]
    #[ignore]
    async fn conforms_to_storage_contract() {
        let url = std::env::var("STASHPAD_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let storage = RedisStorage::connect(&url, "stashpad-test:").await.unwrap();
        conformance::run_all(std::sync::Arc::new(storage)).await;
    }
}
