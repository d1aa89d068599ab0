//! Declarative operation filters.
//!
//! A [`Filter`] selects a subset of an operation log along two axes:
//!
//! - **tag axis**: a map of [`Tag`] to [`TagRange`]. An empty map leaves the
//!   axis inactive (every tag passes); otherwise an operation passes only if
//!   its tag is registered and its sequence number falls inside that tag's
//!   range on the operation's site.
//! - **site axis**: a set of authoring sites, optionally inverted.
//!
//! A filter-wide clock range further restricts every operation regardless of
//! its tag; it is unbounded unless set with [`Filter::with_clock_range`].
//! Everything is combined with AND and the result can be inverted as a whole.
//! Filters are values: every combinator returns a new filter, so the
//! membership test is a pure function of `(filter, operation)`.

pub mod codec;

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Seq, SiteId, Timestamp, VectorClock};
use crate::operation::Operation;
use crate::tag::Tag;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid range for tag {tag}: start {start} exceeds end {end} at site {site}")]
    InvalidRange {
        tag: Tag,
        site: SiteId,
        start: Seq,
        end: Seq,
    },
    #[error("invalid clock range: start {start} exceeds end {end} at site {site}")]
    InvalidClockRange { site: SiteId, start: Seq, end: Seq },
}

// ── TagRange ───────────────────────────────────────────────────────────────

/// Per-tag clock range. On each site the range is `[start, end)`: the start
/// component is inclusive, the end component exclusive. An absent bound is
/// unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<VectorClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<VectorClock>,
}

impl TagRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(start: Option<VectorClock>, end: Option<VectorClock>) -> Self {
        Self { start, end }
    }

    /// `true` when `stamp.seq` lies in `[start.at(site), end.at(site))`.
    pub fn contains(&self, stamp: Timestamp) -> bool {
        if let Some(start) = &self.start {
            if stamp.seq < start.at(stamp.site) {
                return false;
            }
        }
        match &self.end {
            Some(end) => stamp.seq < end.at(stamp.site),
            None => true,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// First site where the start lies past the end, as `(site, start, end)`.
    fn inversion(&self) -> Option<(SiteId, Seq, Seq)> {
        let (Some(start), Some(end)) = (&self.start, &self.end) else {
            return None;
        };
        start
            .iter()
            .map(|(site, seq)| (site, seq, end.at(site)))
            .find(|(_, seq, limit)| seq > limit)
    }

    fn validate(&self, tag: Tag) -> Result<(), FilterError> {
        match self.inversion() {
            Some((site, start, end)) => Err(FilterError::InvalidRange {
                tag,
                site,
                start,
                end,
            }),
            None => Ok(()),
        }
    }

    fn validate_clock(&self) -> Result<(), FilterError> {
        match self.inversion() {
            Some((site, start, end)) => Err(FilterError::InvalidClockRange { site, start, end }),
            None => Ok(()),
        }
    }

    /// Clamp the end to `end`, or to the componentwise min with an existing end.
    fn clamp_end(&mut self, end: &VectorClock) {
        let clamped = match &self.end {
            Some(existing) => existing.meet(end),
            None => end.clone(),
        };
        self.end = Some(clamped);
    }
}

// ── Filter ─────────────────────────────────────────────────────────────────

/// Membership predicate over operations.
///
/// `Filter::new()` admits every operation; [`Filter::nothing`] admits none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FilterRepr", into = "FilterRepr")]
pub struct Filter {
    tag_ranges: IndexMap<Tag, TagRange>,
    clock_range: TagRange,
    sites: BTreeSet<SiteId>,
    site_invert: bool,
    invert: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The filter that matches no operation: the inverse of the empty filter.
    pub fn nothing() -> Self {
        Self::new().inverted()
    }

    // ── Combinators ────────────────────────────────────────────────────────

    /// Register (or replace) the range for `tag`.
    pub fn with_tag_range(
        mut self,
        tag: Tag,
        start: Option<VectorClock>,
        end: Option<VectorClock>,
    ) -> Result<Self, FilterError> {
        let range = TagRange::new(start, end);
        range.validate(tag)?;
        self.tag_ranges.insert(tag, range);
        Ok(self)
    }

    /// Register `tag` with an unbounded range.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag_ranges.insert(tag, TagRange::unbounded());
        self
    }

    /// Add `site` to the set of admitted authoring sites.
    pub fn with_site_filter(mut self, site: SiteId) -> Self {
        self.sites.insert(site);
        self
    }

    /// Admit every site *except* those in the site set.
    pub fn with_site_invert(mut self, invert: bool) -> Self {
        self.site_invert = invert;
        self
    }

    /// Toggle inversion of the whole predicate.
    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Restrict every operation, whatever its tag, to `[start, end)`.
    pub fn with_clock_range(
        mut self,
        start: Option<VectorClock>,
        end: Option<VectorClock>,
    ) -> Result<Self, FilterError> {
        let range = TagRange::new(start, end);
        range.validate_clock()?;
        self.clock_range = range;
        Ok(self)
    }

    pub fn without_tag(mut self, tag: Tag) -> Self {
        self.tag_ranges.shift_remove(&tag);
        self
    }

    /// Union on the tag axis. A range `other` registers for a tag already
    /// present replaces the existing one. The site axis and inversion are
    /// left untouched.
    ///
    /// A filter with an inactive tag axis already admits every tag, so
    /// merging into it leaves the tag axis unchanged.
    ///
    /// The filter-wide clock range widens to cover both ends: it stays
    /// bounded only when both filters bound it, at the join of the two ends.
    pub fn merged(mut self, other: &Filter) -> Self {
        if let Some(end) = self.clock_range.end.take() {
            self.clock_range.end = other.clock_range.end.as_ref().map(|e| end.merged(e));
        }
        if self.tag_ranges.is_empty() {
            return self;
        }
        for (tag, range) in &other.tag_ranges {
            self.tag_ranges.insert(*tag, range.clone());
        }
        self
    }

    /// Clamp the end of `tag`'s range to `end`: the componentwise min with
    /// an existing end, or `end` itself if the range was open. Unregistered
    /// tags are left alone.
    pub fn bound_tag(mut self, tag: Tag, end: &VectorClock) -> Result<Self, FilterError> {
        if let Some(range) = self.tag_ranges.get_mut(&tag) {
            range.clamp_end(end);
            range.validate(tag)?;
        }
        Ok(self)
    }

    /// Clamp the end of the filter-wide clock range, like
    /// [`Filter::bound_tag`] does for one tag. Unlike [`Filter::bound_clock`]
    /// this bounds a filter whose tag axis is inactive.
    pub fn bound_clock_range(mut self, end: &VectorClock) -> Result<Self, FilterError> {
        self.clock_range.clamp_end(end);
        self.clock_range.validate_clock()?;
        Ok(self)
    }

    /// [`Filter::bound_tag`] applied to every registered range.
    pub fn bound_clock(self, end: &VectorClock) -> Result<Self, FilterError> {
        let tags: Vec<Tag> = self.tag_ranges.keys().copied().collect();
        tags.into_iter()
            .try_fold(self, |filter, tag| filter.bound_tag(tag, end))
    }

    // ── Queries ────────────────────────────────────────────────────────────

    /// Membership test: site axis AND tag axis, then inversion.
    pub fn matches(&self, op: &Operation) -> bool {
        self.matches_stamp(op.tag, op.ts)
    }

    /// [`Filter::matches`] on the two fields the predicate reads.
    pub fn matches_stamp(&self, tag: Tag, stamp: Timestamp) -> bool {
        let selected = self.clock_range.contains(stamp)
            && self.site_passes(stamp.site)
            && self.tag_passes(tag, stamp);
        selected != self.invert
    }

    fn site_passes(&self, site: SiteId) -> bool {
        if self.sites.is_empty() {
            return !self.site_invert;
        }
        self.sites.contains(&site) != self.site_invert
    }

    fn tag_passes(&self, tag: Tag, stamp: Timestamp) -> bool {
        if self.tag_ranges.is_empty() {
            return true;
        }
        match self.tag_ranges.get(&tag) {
            Some(range) => range.contains(stamp),
            None => false,
        }
    }

    /// `true` when no future operation can enter the filter: the clock range
    /// has an end, or the tag axis is active and every range has an end.
    pub fn is_bounded(&self) -> bool {
        self.clock_range.is_bounded()
            || (!self.tag_ranges.is_empty() && self.tag_ranges.values().all(TagRange::is_bounded))
    }

    pub fn has_tags(&self) -> bool {
        !self.tag_ranges.is_empty()
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    pub fn is_site_inverted(&self) -> bool {
        self.site_invert
    }

    /// The filter-wide clock range.
    pub fn clock_range(&self) -> &TagRange {
        &self.clock_range
    }

    pub fn range(&self, tag: &Tag) -> Option<&TagRange> {
        self.tag_ranges.get(tag)
    }

    /// Registered ranges in insertion order.
    pub fn tag_ranges(&self) -> impl Iterator<Item = (&Tag, &TagRange)> {
        self.tag_ranges.iter()
    }

    pub fn sites(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.sites.iter().copied()
    }
}

fn fmt_bound(clock: &Option<VectorClock>) -> String {
    match clock {
        Some(clock) => clock.to_string(),
        None => "*".to_string(),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "clock: [{}, {})",
            fmt_bound(&self.clock_range.start),
            fmt_bound(&self.clock_range.end)
        )?;
        if self.tag_ranges.is_empty() {
            writeln!(f, "tags: any")?;
        } else {
            writeln!(f, "tags:")?;
            for (tag, range) in &self.tag_ranges {
                writeln!(
                    f,
                    "  '{}': [{}, {})",
                    tag,
                    fmt_bound(&range.start),
                    fmt_bound(&range.end)
                )?;
            }
        }
        if self.sites.is_empty() {
            writeln!(f, "site: any")?;
        } else {
            let sites: Vec<String> = self.sites.iter().map(|s| s.to_string()).collect();
            writeln!(f, "site: {}", sites.join(", "))?;
        }
        writeln!(f, "site invert: {}", self.site_invert)?;
        write!(f, "invert: {}", self.invert)
    }
}

// ── Serde representation ───────────────────────────────────────────────────

/// Wire shape of [`Filter`]; deserialization goes through range validation.
#[derive(Serialize, Deserialize)]
struct FilterRepr {
    #[serde(default, skip_serializing_if = "TagRange::is_unbounded")]
    clock: TagRange,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    tags: IndexMap<Tag, TagRange>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    sites: BTreeSet<SiteId>,
    #[serde(default, skip_serializing_if = "is_false")]
    site_invert: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    invert: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TryFrom<FilterRepr> for Filter {
    type Error = FilterError;

    fn try_from(repr: FilterRepr) -> Result<Self, Self::Error> {
        repr.clock.validate_clock()?;
        for (tag, range) in &repr.tags {
            range.validate(*tag)?;
        }
        Ok(Filter {
            tag_ranges: repr.tags,
            clock_range: repr.clock,
            sites: repr.sites,
            site_invert: repr.site_invert,
            invert: repr.invert,
        })
    }
}

impl From<Filter> for FilterRepr {
    fn from(filter: Filter) -> Self {
        FilterRepr {
            clock: filter.clock_range,
            tags: filter.tag_ranges,
            sites: filter.sites,
            site_invert: filter.site_invert,
            invert: filter.invert,
        }
    }
}
