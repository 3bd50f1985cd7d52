#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by multiple projects

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use headers::{Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::slug::{Generator, Slug, SlugError, ALPHABET};

pub mod slug;

pub const API_ENDPOINT: &str = "/api";

lazy_static! {
    pub static ref EXPIRES_IN_HEADER_NAME: HeaderName = HeaderName::from_static("expires-in");
    pub static ref SLUG_HEADER_NAME: HeaderName = HeaderName::from_static("slug");
    pub static ref BURN_AFTER_READ_HEADER_NAME: HeaderName =
        HeaderName::from_static("burn-after-read");
}

/// The externally visible metadata of a paste. Content is never embedded.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PasteSummary {
    pub id: Slug,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub content_type: String,
    pub burn_after_read: bool,
    pub read_count: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid duration amount: {0}")]
    Amount(String),
    #[error("unknown duration unit: {0}")]
    Unit(String),
}

/// Parses durations of the form `30s`, `10m`, `2h` or `7d`. A bare number is
/// read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (amount, unit) = input.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| ParseDurationError::Amount(amount.to_string()))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(ParseDurationError::Unit(other.to_string())),
    };

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| ParseDurationError::Amount(amount.to_string()))
}

/// Requested time-to-live of a paste, carried in the `expires-in` header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExpiresIn(pub Duration);

impl FromStr for ExpiresIn {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

impl Display for ExpiresIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0.as_secs();
        match secs {
            0 => write!(f, "0s"),
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{}s", s),
        }
    }
}

impl Header for ExpiresIn {
    fn name() -> &'static HeaderName {
        &*EXPIRES_IN_HEADER_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .ok_or_else(headers::Error::invalid)?
            .to_str()
            .map_err(|_| headers::Error::invalid())?
            .parse()
            .map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, container: &mut E) {
        container.extend(std::iter::once(self.into()));
    }
}

impl From<&ExpiresIn> for HeaderValue {
    fn from(expires_in: &ExpiresIn) -> Self {
        // Display only ever emits ascii digits and a unit letter.
        Self::from_maybe_shared(Bytes::from(expires_in.to_string()))
            .unwrap_or_else(|_| Self::from_static("0s"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7_200)));
        assert_eq!(parse_duration(" 7d "), Ok(Duration::from_secs(604_800)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(ParseDurationError::Empty));
        assert!(matches!(parse_duration("h"), Err(ParseDurationError::Amount(_))));
        assert!(matches!(parse_duration("3w"), Err(ParseDurationError::Unit(_))));
        assert!(matches!(
            parse_duration("99999999999999999999d"),
            Err(ParseDurationError::Amount(_))
        ));
    }

    #[test]
    fn expires_in_header_round_trip() {
        let value = HeaderValue::from(&ExpiresIn(Duration::from_secs(7_200)));
        assert_eq!(value, "2h");

        let decoded = ExpiresIn::decode(&mut std::iter::once(&value)).unwrap();
        assert_eq!(decoded, ExpiresIn(Duration::from_secs(7_200)));

        let bad = HeaderValue::from_static("forever");
        assert!(ExpiresIn::decode(&mut std::iter::once(&bad)).is_err());
    }

    #[test]
    fn expires_in_display_picks_largest_unit() {
        assert_eq!(ExpiresIn(Duration::from_secs(90)).to_string(), "90s");
        assert_eq!(ExpiresIn(Duration::from_secs(1_800)).to_string(), "30m");
        assert_eq!(ExpiresIn(Duration::from_secs(172_800)).to_string(), "2d");
    }
}
