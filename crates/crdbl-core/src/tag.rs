//! Opaque 128-bit grouping labels.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A contributor/session label attached to operations.
///
/// Tags only support equality and hashing. The all-zero value is the
/// reserved untagged bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tag(pub [u32; 4]);

impl Tag {
    /// The untagged bucket.
    pub const UNTAGGED: Tag = Tag([0; 4]);

    /// Size of the tag in bytes when written out as words.
    pub const SIZE_BYTES: usize = 16;

    pub const fn new(words: [u32; 4]) -> Self {
        Self(words)
    }

    pub fn is_untagged(&self) -> bool {
        *self == Self::UNTAGGED
    }

    pub fn words(&self) -> [u32; 4] {
        self.0
    }
}

impl From<[u32; 4]> for Tag {
    fn from(words: [u32; 4]) -> Self {
        Self(words)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in self.0 {
            write!(f, "{word:08x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTagError {
    #[error("tag must be 32 hex digits, got {0} characters")]
    Length(usize),
    #[error("invalid hex digit in tag: {0:?}")]
    Digit(String),
}

impl FromStr for Tag {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(ParseTagError::Length(s.chars().count()));
        }
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let chunk = &s[i * 8..(i + 1) * 8];
            // from_str_radix alone would accept a leading '+'
            if !chunk.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseTagError::Digit(chunk.to_string()));
            }
            *word = u32::from_str_radix(chunk, 16)
                .map_err(|_| ParseTagError::Digit(chunk.to_string()))?;
        }
        Ok(Tag(words))
    }
}

// Tags are map keys in serialized filters, so they travel as hex strings.
impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
