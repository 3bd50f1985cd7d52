//! Size verification of stored content against the recorded metadata.

use tracing::error;

use crate::error::{Error, Result};
use crate::paste::Paste;
use crate::storage::ContentStat;

/// Outcome of comparing the recorded size with what the backend holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrity {
    Intact,
    /// The content object is gone. Whether that is corruption depends on
    /// whether the metadata is still around.
    Missing,
    Mismatch { actual: u64 },
}

impl Integrity {
    pub const fn check(paste: &Paste, stat: ContentStat) -> Self {
        if !stat.exists {
            Self::Missing
        } else if stat.size == paste.size {
            Self::Intact
        } else {
            Self::Mismatch { actual: stat.size }
        }
    }

    /// Turns the verdict into the error served to the reader. `metadata_alive`
    /// is only consulted for missing content.
    pub fn into_result(self, paste: &Paste, metadata_alive: bool) -> Result<()> {
        let actual = match self {
            Self::Intact => return Ok(()),
            Self::Missing if !metadata_alive => return Err(Error::NotFound),
            Self::Missing => 0,
            Self::Mismatch { actual } => actual,
        };

        error!(
            "Paste {} is corrupt: recorded {} bytes, found {}",
            paste.id, paste.size, actual
        );
        Err(Error::SizeMismatch {
            recorded: paste.size,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;

    #[test]
    fn matching_sizes_are_intact() {
        let paste = conformance::paste("NTGR", None, 5);
        let verdict = Integrity::check(&paste, ContentStat::present(5));
        assert_eq!(verdict, Integrity::Intact);
        assert_eq!(verdict.into_result(&paste, true), Ok(()));
    }

    #[test]
    fn diverging_sizes_are_a_mismatch() {
        let paste = conformance::paste("NTGR", None, 5);
        let verdict = Integrity::check(&paste, ContentStat::present(1));
        assert_eq!(verdict, Integrity::Mismatch { actual: 1 });
        assert_eq!(
            verdict.into_result(&paste, true),
            Err(Error::SizeMismatch {
                recorded: 5,
                actual: 1
            })
        );
    }

    #[test]
    fn missing_content_depends_on_the_metadata() {
        let paste = conformance::paste("NTGR", None, 5);
        let verdict = Integrity::check(&paste, ContentStat::MISSING);
        assert_eq!(verdict, Integrity::Missing);
        assert_eq!(verdict.into_result(&paste, false), Err(Error::NotFound));
        assert_eq!(
            verdict.into_result(&paste, true),
            Err(Error::SizeMismatch {
                recorded: 5,
                actual: 0
            })
        );
    }

    #[test]
    fn empty_content_is_intact_when_recorded_empty() {
        let paste = conformance::paste("NTGR", None, 0);
        assert_eq!(
            Integrity::check(&paste, ContentStat::present(0)),
            Integrity::Intact
        );
    }
}
