// Stashpad Ephemeral Paste Storage
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt::{Debug, Display};
use std::ops::RangeInclusive;
use std::str::FromStr;

use rand::prelude::Distribution;
use rand::Rng;
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uppercase letters and digits, minus the easily confused `0`, `1`, `O` and
/// `I`.
pub const ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

pub const LENGTH_RANGE: RangeInclusive<usize> = 3..=32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug must be between 3 and 32 characters, got {0}")]
    Length(usize),
    #[error("slug contains a character outside the alphabet: {0:?}")]
    Character(char),
}

/// A short, human typeable paste identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slug").field(&self.0).finish()
    }
}

impl FromStr for Slug {
    type Err = SlugError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        let len = v.chars().count();
        if !LENGTH_RANGE.contains(&len) {
            return Err(SlugError::Length(len));
        }

        for c in v.chars() {
            SlugChar::try_from(c).map_err(|_| SlugError::Character(c))?;
        }

        Ok(Self(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SlugVisitor;
        impl<'de> Visitor<'de> for SlugVisitor {
            type Value = Slug;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a valid slug")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(|e| match e {
                    SlugError::Length(len) => E::invalid_length(len, &"3 to 32 characters"),
                    SlugError::Character(c) => {
                        E::invalid_value(Unexpected::Char(c), &"a valid slug character")
                    }
                })
            }
        }

        deserializer.deserialize_str(SlugVisitor)
    }
}

#[derive(Clone, Copy, Debug)]
struct SlugChar(u8);

impl TryFrom<char> for SlugChar {
    type Error = &'static str;

    fn try_from(v: char) -> Result<Self, Self::Error> {
        if v.is_ascii() && ALPHABET.contains(&(v as u8)) {
            Ok(Self(v as u8))
        } else {
            Err("a valid slug character")
        }
    }
}

/// Samples slugs of a fixed length. Pair it with a cryptographically secure
/// rng: predictable slugs let anyone enumerate other people's pastes.
#[derive(Clone, Copy, Debug)]
pub struct Generator {
    len: usize,
}

impl Generator {
    pub fn new(len: usize) -> Result<Self, SlugError> {
        if LENGTH_RANGE.contains(&len) {
            Ok(Self { len })
        } else {
            Err(SlugError::Length(len))
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Distribution<SlugChar> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SlugChar {
        let value = rng.gen_range(0..ALPHABET.len());
        SlugChar(ALPHABET[value])
    }
}

impl Distribution<Slug> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Slug {
        let slug = (0..self.len)
            .map(|_| char::from(Distribution::<SlugChar>::sample(self, rng).0))
            .collect();
        Slug(slug)
    }
}
