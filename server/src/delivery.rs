//! Full versus preview delivery of paste content.

use bytes::Bytes;

/// How much of a paste to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Full,
    Prefix(u64),
}

impl Tier {
    /// Picks the tier for a paste of `size` bytes. Anything up to and including
    /// `limit` is served whole.
    pub const fn for_size(size: u64, wants_full: bool, limit: u64) -> Self {
        if wants_full || size <= limit {
            Self::Full
        } else {
            Self::Prefix(limit)
        }
    }

    pub const fn is_truncated(self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

/// Content handed back to a reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub bytes: Bytes,
    pub content_type: String,
    /// Only `bytes.len()` of `size` bytes were delivered.
    pub truncated: bool,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub bytes: Bytes,
    pub truncated: bool,
}

impl From<Delivery> for Preview {
    fn from(delivery: Delivery) -> Self {
        Self {
            bytes: delivery.bytes,
            truncated: delivery.truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_pastes_are_served_whole() {
        assert_eq!(Tier::for_size(10, false, 10), Tier::Full);
        assert_eq!(Tier::for_size(0, false, 0), Tier::Full);
        assert!(!Tier::for_size(3, false, 10).is_truncated());
    }

    #[test]
    fn large_pastes_are_previewed_unless_full_is_requested() {
        assert_eq!(Tier::for_size(300_000, false, 10), Tier::Prefix(10));
        assert!(Tier::for_size(11, false, 10).is_truncated());
        assert_eq!(Tier::for_size(300_000, true, 10), Tier::Full);
    }
}
