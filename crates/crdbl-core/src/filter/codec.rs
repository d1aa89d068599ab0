//! Binary filter encodings.
//!
//! Filters are written as little-endian 32-bit words. Two formats exist:
//!
//! - [`FilterFormat::Bounds`] keeps only end bounds: the clock range end,
//!   then each tag with its range end. It describes "everything up to here"
//!   snapshots of a view.
//! - [`FilterFormat::Full`] keeps every field of the filter: flags, the clock
//!   range, the site set, then each tag with both range bounds.
//!
//! An optional clock is a count word followed by `count` `(site, seq)` pairs;
//! a count of [`ABSENT`] marks a missing bound.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::{Filter, FilterError};
use crate::clock::{ClockWordsError, VectorClock};
use crate::tag::Tag;

/// Count word marking an absent clock bound.
pub const ABSENT: u32 = u32::MAX;

const FLAG_INVERT: u32 = 1;
const FLAG_SITE_INVERT: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterFormat {
    #[default]
    Bounds,
    Full,
}

impl FilterFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FilterFormat::Bounds => "filter_v1_bounds",
            FilterFormat::Full => "filter_v1_full",
        }
    }
}

impl fmt::Display for FilterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterFormat {
    type Err = FilterCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filter_v1_bounds" => Ok(FilterFormat::Bounds),
            "filter_v1_full" => Ok(FilterFormat::Full),
            other => Err(FilterCodecError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterCodecError {
    #[error("unknown filter format: {0}")]
    UnknownFormat(String),
    #[error("filter data length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("filter data truncated reading {what} at word {at}")]
    Truncated { what: &'static str, at: usize },
    #[error("unknown filter flags: {0:#x}")]
    UnknownFlags(u32),
    #[error("invalid clock in filter data: {0}")]
    Clock(#[from] ClockWordsError),
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
}

// ── Encoding ───────────────────────────────────────────────────────────────

pub fn encode(format: FilterFormat, filter: &Filter) -> Vec<u8> {
    let mut words: Vec<u32> = Vec::with_capacity(64);

    if format == FilterFormat::Full {
        let mut flags = 0;
        if filter.is_inverted() {
            flags |= FLAG_INVERT;
        }
        if filter.is_site_inverted() {
            flags |= FLAG_SITE_INVERT;
        }
        words.push(flags);
        write_clock(&mut words, filter.clock_range().start.as_ref());
    }
    write_clock(&mut words, filter.clock_range().end.as_ref());
    if format == FilterFormat::Full {
        let sites: Vec<u32> = filter.sites().collect();
        words.push(sites.len() as u32);
        words.extend_from_slice(&sites);
    }

    for (tag, range) in filter.tag_ranges() {
        words.extend_from_slice(&tag.words());
        if format == FilterFormat::Full {
            write_clock(&mut words, range.start.as_ref());
        }
        write_clock(&mut words, range.end.as_ref());
    }

    let mut out = Vec::with_capacity(words.len() * 4);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

fn write_clock(words: &mut Vec<u32>, clock: Option<&VectorClock>) {
    match clock {
        Some(clock) => {
            words.push(clock.len() as u32);
            words.extend(clock.to_words());
        }
        None => words.push(ABSENT),
    }
}

// ── Decoding ───────────────────────────────────────────────────────────────

pub fn decode(format: FilterFormat, data: &[u8]) -> Result<Filter, FilterCodecError> {
    if data.len() % 4 != 0 {
        return Err(FilterCodecError::Misaligned(data.len()));
    }
    let words: Vec<u32> = data
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let mut reader = WordReader::new(&words);
    let mut filter = Filter::new();

    if format == FilterFormat::Full {
        let flags = reader.word("flags")?;
        if flags & !(FLAG_INVERT | FLAG_SITE_INVERT) != 0 {
            return Err(FilterCodecError::UnknownFlags(flags));
        }
        filter = filter
            .with_invert(flags & FLAG_INVERT != 0)
            .with_site_invert(flags & FLAG_SITE_INVERT != 0);
    }
    let start = match format {
        FilterFormat::Full => reader.clock("clock range start")?,
        FilterFormat::Bounds => None,
    };
    let end = reader.clock("clock range end")?;
    filter = filter.with_clock_range(start, end)?;
    if format == FilterFormat::Full {
        let count = reader.word("site count")? as usize;
        for site in reader.take(count, "sites")? {
            filter = filter.with_site_filter(*site);
        }
    }

    while !reader.is_done() {
        let tag_words = reader.take(4, "tag")?;
        let tag = Tag::new([tag_words[0], tag_words[1], tag_words[2], tag_words[3]]);
        let start = match format {
            FilterFormat::Full => reader.clock("start clock")?,
            FilterFormat::Bounds => None,
        };
        let end = reader.clock("end clock")?;
        filter = filter.with_tag_range(tag, start, end)?;
    }

    Ok(filter)
}

struct WordReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.words.len()
    }

    fn word(&mut self, what: &'static str) -> Result<u32, FilterCodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u32], FilterCodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.words.len())
            .ok_or(FilterCodecError::Truncated { what, at: self.pos })?;
        let slice = &self.words[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn clock(&mut self, what: &'static str) -> Result<Option<VectorClock>, FilterCodecError> {
        let count = self.word(what)?;
        if count == ABSENT {
            return Ok(None);
        }
        let pairs = self.take((count as usize).saturating_mul(2), what)?;
        Ok(Some(VectorClock::from_words(pairs)?))
    }
}
