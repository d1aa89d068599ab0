//! Logical clock types.
//!
//! A [`Timestamp`] identifies one authored operation: the authoring site and
//! that site's sequence number. A [`VectorClock`] is the per-site frontier of
//! a set of operations, used both as the log's aggregate clock and as the
//! bounds of filter ranges.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SiteId = u32;
pub type Seq = u32;

// ── Timestamp ──────────────────────────────────────────────────────────────

/// An immutable logical timestamp: `(site, seq)`.
///
/// Timestamps are totally ordered within one site. Across sites there is no
/// inherent order; compare through a [`VectorClock`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub site: SiteId,
    pub seq: Seq,
}

impl Timestamp {
    pub const fn new(site: SiteId, seq: Seq) -> Self {
        Self { site, seq }
    }
}

/// Create a timestamp.
#[inline]
pub fn ts(site: SiteId, seq: Seq) -> Timestamp {
    Timestamp::new(site, seq)
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.site, self.seq)
    }
}

// ── VectorClock ────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockWordsError {
    #[error("clock words must come in (site, seq) pairs, got {0} words")]
    OddLength(usize),
    #[error("clock sites must be strictly increasing: {prev} then {next}")]
    UnorderedSite { prev: SiteId, next: SiteId },
}

/// Per-site frontier: `site → highest seq observed`.
///
/// Missing components read as zero and zero components are never stored,
/// so two clocks describing the same frontier are structurally equal.
///
/// The partial order is the causal one: `a < b` iff every component of `a`
/// is `<=` the matching component of `b` and at least one is strictly less.
/// Clocks where neither dominates compare as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<SiteId, Seq>", into = "BTreeMap<SiteId, Seq>")]
pub struct VectorClock {
    components: BTreeMap<SiteId, Seq>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from `(site, seq)` pairs; later pairs for the same
    /// site only ever raise the component.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (SiteId, Seq)>,
    {
        pairs
            .into_iter()
            .map(|(site, seq)| Timestamp::new(site, seq))
            .collect()
    }

    /// Component for `site`, zero when the site was never observed.
    #[inline]
    pub fn at(&self, site: SiteId) -> Seq {
        self.components.get(&site).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of non-zero components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Non-zero components in site order.
    pub fn iter(&self) -> impl Iterator<Item = (SiteId, Seq)> + '_ {
        self.components.iter().map(|(&site, &seq)| (site, seq))
    }

    /// Largest component across all sites.
    pub fn max_seq(&self) -> Seq {
        self.components.values().copied().max().unwrap_or(0)
    }

    /// Fold a single timestamp into the clock. Never lowers a component.
    pub fn observe(&mut self, stamp: Timestamp) {
        if stamp.seq == 0 {
            return;
        }
        let entry = self.components.entry(stamp.site).or_insert(0);
        if *entry < stamp.seq {
            *entry = stamp.seq;
        }
    }

    /// Componentwise max, in place.
    pub fn merge(&mut self, other: &VectorClock) {
        for (site, seq) in other.iter() {
            self.observe(Timestamp::new(site, seq));
        }
    }

    /// Componentwise max, by value.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Componentwise min. A site missing from either side reads as zero, so
    /// only sites present in both survive.
    pub fn meet(&self, other: &VectorClock) -> VectorClock {
        self.iter()
            .filter_map(|(site, seq)| match other.at(site) {
                0 => None,
                theirs => Some((site, seq.min(theirs))),
            })
            .collect()
    }

    /// `true` when the operation stamped `stamp` is within this frontier.
    #[inline]
    pub fn covers(&self, stamp: Timestamp) -> bool {
        self.at(stamp.site) >= stamp.seq
    }

    /// `true` when neither clock dominates the other and they differ.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other).is_none()
    }

    /// Flatten into `(site, seq)` word pairs ordered by site.
    pub fn to_words(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.components.len() * 2);
        for (site, seq) in self.iter() {
            out.push(site);
            out.push(seq);
        }
        out
    }

    /// Inverse of [`VectorClock::to_words`]. Zero components are accepted
    /// and dropped.
    pub fn from_words(words: &[u32]) -> Result<VectorClock, ClockWordsError> {
        if words.len() % 2 != 0 {
            return Err(ClockWordsError::OddLength(words.len()));
        }
        let mut clock = VectorClock::new();
        let mut prev: Option<SiteId> = None;
        for pair in words.chunks_exact(2) {
            let (site, seq) = (pair[0], pair[1]);
            if let Some(prev) = prev {
                if site <= prev {
                    return Err(ClockWordsError::UnorderedSite { prev, next: site });
                }
            }
            prev = Some(site);
            clock.observe(Timestamp::new(site, seq));
        }
        Ok(clock)
    }
}

impl FromIterator<Timestamp> for VectorClock {
    fn from_iter<I: IntoIterator<Item = Timestamp>>(iter: I) -> Self {
        let mut clock = VectorClock::new();
        for stamp in iter {
            clock.observe(stamp);
        }
        clock
    }
}

impl FromIterator<(SiteId, Seq)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (SiteId, Seq)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

// Deserialized maps go through `observe` so zero components are dropped.
impl From<BTreeMap<SiteId, Seq>> for VectorClock {
    fn from(components: BTreeMap<SiteId, Seq>) -> Self {
        Self::from_pairs(components)
    }
}

impl From<VectorClock> for BTreeMap<SiteId, Seq> {
    fn from(clock: VectorClock) -> Self {
        clock.components
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let mut less = false;
        let mut greater = false;
        let sites = self.components.keys().chain(other.components.keys());
        for &site in sites {
            match self.at(site).cmp(&other.at(site)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return None;
            }
        }
        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (site, seq)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{site}:{seq}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(pairs: &[(SiteId, Seq)]) -> VectorClock {
        VectorClock::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn empty_clocks_are_equal() {
        let a = VectorClock::new();
        let b = vc(&[(3, 0)]);
        assert_eq!(a, b);
        assert!(b.is_empty());
        assert!(!(a < b));
        assert!(!(b < a));
    }

    #[test]
    fn strict_less_needs_one_smaller_component() {
        let a = vc(&[(1, 1), (2, 2), (3, 2)]);
        let b = vc(&[(1, 1), (2, 2), (3, 3)]);
        assert_ne!(a, b);
        assert!(a < b);
        assert!(!(b < a));
        assert!(!(a < a.clone()));
    }

    #[test]
    fn missing_component_counts_as_zero() {
        let a = vc(&[(1, 4)]);
        let b = vc(&[(1, 4), (5, 1)]);
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn divergent_clocks_are_concurrent() {
        let a = vc(&[(1, 2), (2, 1)]);
        let b = vc(&[(1, 1), (2, 2)]);
        assert!(a.concurrent_with(&b));
        assert_eq!(a.partial_cmp(&b), None);
        assert!(!(a < b) && !(b < a));
    }

    #[test]
    fn observe_never_lowers() {
        let mut clock = VectorClock::new();
        clock.observe(ts(1, 10));
        assert_eq!(clock, vc(&[(1, 10)]));
        clock.observe(ts(3, 10));
        clock.observe(ts(1, 5));
        clock.observe(ts(1, 10));
        assert_eq!(clock, vc(&[(1, 10), (3, 10)]));
        clock.observe(ts(1, 11));
        clock.observe(ts(4, 0));
        assert_eq!(clock, vc(&[(1, 11), (3, 10)]));
        assert_eq!(clock.max_seq(), 11);
    }

    #[test]
    fn merge_is_componentwise_max() {
        let mut a = vc(&[(1, 3), (2, 1)]);
        let b = vc(&[(2, 4), (7, 2)]);
        assert_eq!(a.merged(&b), vc(&[(1, 3), (2, 4), (7, 2)]));
        a.merge(&b);
        a.merge(&b);
        assert_eq!(a, vc(&[(1, 3), (2, 4), (7, 2)]));
    }

    #[test]
    fn meet_is_componentwise_min() {
        let a = vc(&[(1, 3), (2, 9)]);
        let b = vc(&[(2, 4), (7, 2)]);
        assert_eq!(a.meet(&b), vc(&[(2, 4)]));
        assert_eq!(b.meet(&a), vc(&[(2, 4)]));
    }

    #[test]
    fn covers_checks_the_site_component() {
        let clock = vc(&[(1, 3)]);
        assert!(clock.covers(ts(1, 3)));
        assert!(clock.covers(ts(1, 1)));
        assert!(!clock.covers(ts(1, 4)));
        assert!(!clock.covers(ts(2, 1)));
    }

    #[test]
    fn words_keep_site_order() {
        let clock = vc(&[(9, 1), (2, 7)]);
        assert_eq!(clock.to_words(), vec![2, 7, 9, 1]);
        assert_eq!(VectorClock::from_words(&[2, 7, 9, 1]), Ok(clock));
        assert_eq!(
            VectorClock::from_words(&[2, 7, 9]),
            Err(ClockWordsError::OddLength(3))
        );
        assert_eq!(
            VectorClock::from_words(&[9, 1, 2, 7]),
            Err(ClockWordsError::UnorderedSite { prev: 9, next: 2 })
        );
    }

    #[test]
    fn display_lists_components() {
        assert_eq!(vc(&[(1, 2), (3, 4)]).to_string(), "{1:2, 3:4}");
        assert_eq!(ts(5, 6).to_string(), "5.6");
    }
}
