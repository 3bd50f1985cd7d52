use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use stashpad_common::parse_duration;

use crate::lifecycle::EngineConfig;
use crate::storage::StorageConfig;

#[derive(Parser, Debug)]
#[clap(version, about = "Ephemeral paste storage server")]
pub struct Opts {
    #[clap(long, env = "STASHPAD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Which storage backend to use.
    #[clap(long, env = "STASHPAD_BACKEND", value_enum, default_value = "filesystem")]
    pub backend: Backend,

    #[clap(long, env = "STASHPAD_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Any url `object_store` understands, e.g. `s3://bucket` or `file:///srv/pastes`.
    #[clap(long, env = "STASHPAD_OBJECT_STORE_URL", default_value = "memory:///")]
    pub object_store_url: String,
    #[clap(long, env = "STASHPAD_OBJECT_STORE_PREFIX", default_value = "pastes/")]
    pub object_store_prefix: String,

    #[clap(long, env = "STASHPAD_REDIS_URL", default_value = "redis://127.0.0.1/")]
    pub redis_url: String,
    #[clap(long, env = "STASHPAD_REDIS_KEY_PREFIX", default_value = "stashpad:")]
    pub redis_key_prefix: String,

    #[clap(long, env = "STASHPAD_MONGO_URI", default_value = "mongodb://127.0.0.1:27017")]
    pub mongo_uri: String,
    #[clap(long, env = "STASHPAD_MONGO_DATABASE", default_value = "stashpad")]
    pub mongo_database: String,
    #[clap(long, env = "STASHPAD_MONGO_COLLECTION", default_value = "pastes")]
    pub mongo_collection: String,

    #[clap(long, env = "STASHPAD_SLUG_LENGTH", default_value_t = 8)]
    pub slug_length: usize,
    #[clap(long, env = "STASHPAD_MIN_TTL", default_value = "1h", value_parser = parse_duration)]
    pub min_ttl: Duration,
    #[clap(long, env = "STASHPAD_MAX_TTL", default_value = "7d", value_parser = parse_duration)]
    pub max_ttl: Duration,
    #[clap(
        long,
        env = "STASHPAD_DEFAULT_TTL",
        default_value = "24h",
        value_parser = parse_duration
    )]
    pub default_ttl: Duration,
    /// Keep pastes uploaded without a ttl forever instead of applying the
    /// default ttl.
    #[clap(long, env = "STASHPAD_NO_DEFAULT_TTL")]
    pub no_default_ttl: bool,

    /// Pastes larger than this many bytes are truncated in browser previews.
    #[clap(long, env = "STASHPAD_PREVIEW_THRESHOLD", default_value_t = 64 * 1024)]
    pub preview_threshold: u64,
    #[clap(long, env = "STASHPAD_MAX_CONTENT_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_content_size: u64,
    #[clap(
        long,
        env = "STASHPAD_BACKEND_TIMEOUT",
        default_value = "10s",
        value_parser = parse_duration
    )]
    pub backend_timeout: Duration,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Backend {
    Filesystem,
    ObjectStore,
    Redis,
    Mongo,
}

impl Opts {
    pub fn storage_config(&self) -> StorageConfig {
        match self.backend {
            Backend::Filesystem => StorageConfig::Filesystem {
                root: self.data_dir.clone(),
            },
            Backend::ObjectStore => StorageConfig::ObjectStore {
                url: self.object_store_url.clone(),
                prefix: self.object_store_prefix.clone(),
            },
            Backend::Redis => StorageConfig::Redis {
                url: self.redis_url.clone(),
                key_prefix: self.redis_key_prefix.clone(),
            },
            Backend::Mongo => StorageConfig::Mongo {
                uri: self.mongo_uri.clone(),
                database: self.mongo_database.clone(),
                collection: self.mongo_collection.clone(),
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            slug_len: self.slug_length,
            min_ttl: self.min_ttl,
            max_ttl: self.max_ttl,
            default_ttl: (!self.no_default_ttl).then(|| self.default_ttl),
            preview_threshold: self.preview_threshold,
            max_content_size: self.max_content_size,
            backend_timeout: self.backend_timeout,
            ..EngineConfig::default()
        }
    }
}
