use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stashpad_common::{PasteSummary, Slug};

/// Hint values that say nothing about the payload. curl sends the first one
/// for every `--data-binary` upload.
const GENERIC_CONTENT_TYPES: [&str; 2] = [
    "application/x-www-form-urlencoded",
    "application/octet-stream",
];

/// What the uploader asked for, before validation.
#[derive(Clone, Debug, Default)]
pub struct PastePolicy {
    pub ttl: Option<Duration>,
    pub custom_slug: Option<String>,
    pub burn_after_read: bool,
    pub content_type: Option<String>,
}

/// Persisted paste metadata. The content lives in a separate object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub id: Slug,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub content_type: String,
    pub burn_after_read: bool,
    #[serde(default)]
    pub read_count: u64,
}

impl Paste {
    pub fn new(
        id: Slug,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        size: u64,
        content_type: String,
        burn_after_read: bool,
    ) -> Self {
        Self {
            id,
            created_at,
            expires_at,
            size,
            content_type,
            burn_after_read,
            read_count: 0,
        }
    }

    pub fn expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires| expires <= now)
            .unwrap_or_default()
    }

    pub const fn is_burn_after_read(&self) -> bool {
        self.burn_after_read
    }

    pub fn summary(&self) -> PasteSummary {
        PasteSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            size: self.size,
            content_type: self.content_type.clone(),
            burn_after_read: self.burn_after_read,
            read_count: self.read_count,
        }
    }
}

/// Uses the caller's hint when it names a concrete type, otherwise sniffs
/// the content.
pub fn content_type_for(hint: Option<&str>, content: &[u8]) -> String {
    match hint.map(str::trim) {
        Some(hint) if is_specific_mime(hint) => hint.to_string(),
        _ => tree_magic_mini::from_u8(content).to_string(),
    }
}

fn is_specific_mime(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    if GENERIC_CONTENT_TYPES
        .iter()
        .any(|generic| essence.eq_ignore_ascii_case(generic))
    {
        return false;
    }

    matches!(
        essence.split_once('/'),
        Some((kind, sub)) if !kind.is_empty()
            && !sub.is_empty()
            && !essence.contains(char::is_whitespace)
    )
}
