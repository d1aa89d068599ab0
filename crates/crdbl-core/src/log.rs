//! Append-only operation history for one replica.
//!
//! An [`OperationLog`] keeps every operation the replica has authored or
//! received, in the order it incorporated them (a causal order for that
//! replica), plus the aggregate clock of everything ever appended. Nothing is
//! ever removed or reordered: un-materializing an operation is the execution
//! engine's business, not the log's.

use std::collections::HashMap;

use crate::clock::{Timestamp, VectorClock};
use crate::filter::Filter;
use crate::operation::Operation;

#[derive(Debug, Clone)]
pub struct OperationLog {
    ops: Vec<Operation>,
    index: HashMap<Timestamp, usize>,
    clock: VectorClock,
    dedupe: bool,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            index: HashMap::new(),
            clock: VectorClock::new(),
            dedupe: true,
        }
    }

    /// A log that records every appended operation, even ones the aggregate
    /// clock already covers.
    pub fn without_dedupe() -> Self {
        Self {
            dedupe: false,
            ..Self::new()
        }
    }

    /// Appends `op` and folds its timestamp into the aggregate clock.
    ///
    /// With dedupe on (the default), an operation whose timestamp the
    /// aggregate clock already covers has been seen before; it is dropped and
    /// `false` is returned.
    pub fn append(&mut self, op: Operation) -> bool {
        if self.dedupe && self.clock.covers(op.ts) {
            tracing::trace!(ts = %op.ts, "skipping already seen operation");
            return false;
        }
        self.clock.observe(op.ts);
        self.index.entry(op.ts).or_insert(self.ops.len());
        self.ops.push(op);
        true
    }

    /// Merge of every timestamp ever appended.
    pub fn aggregate_clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Operations first to last.
    pub fn forward(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    /// Operations last to first.
    pub fn reverse(&self) -> std::iter::Rev<std::slice::Iter<'_, Operation>> {
        self.ops.iter().rev()
    }

    /// Operations `filter` admits, first to last.
    pub fn iter_matching<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> impl DoubleEndedIterator<Item = &'a Operation> + 'a {
        self.ops.iter().filter(move |op| filter.matches(op))
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.ops
    }

    /// First operation recorded under `ts`.
    pub fn get(&self, ts: Timestamp) -> Option<&Operation> {
        self.index.get(&ts).map(|&i| &self.ops[i])
    }

    /// Position of the first operation recorded under `ts`.
    pub fn position(&self, ts: Timestamp) -> Option<usize> {
        self.index.get(&ts).copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Extend<Operation> for OperationLog {
    fn extend<I: IntoIterator<Item = Operation>>(&mut self, iter: I) {
        for op in iter {
            self.append(op);
        }
    }
}

impl FromIterator<Operation> for OperationLog {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut log = OperationLog::new();
        log.extend(iter);
        log
    }
}

impl<'a> IntoIterator for &'a OperationLog {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.forward()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ts;
    use crate::operation::{NodeKind, Payload};
    use crate::tag::Tag;

    fn create(site: u32, seq: u32) -> Operation {
        Operation::untagged(
            ts(site, seq),
            Payload::CreateNode {
                node_kind: NodeKind::Scalar,
            },
        )
    }

    #[test]
    fn append_tracks_aggregate_clock() {
        let mut log = OperationLog::new();
        assert!(log.append(create(1, 1)));
        assert!(log.append(create(2, 1)));
        assert!(log.append(create(1, 2)));
        assert_eq!(log.len(), 3);
        assert_eq!(
            log.aggregate_clock(),
            &VectorClock::from_pairs([(1, 2), (2, 1)])
        );
    }

    #[test]
    fn forward_and_reverse_see_the_same_snapshot() {
        let log: OperationLog = [create(1, 1), create(2, 1), create(1, 2)].into_iter().collect();
        let forward: Vec<Timestamp> = log.forward().map(|op| op.ts).collect();
        let mut reverse: Vec<Timestamp> = log.reverse().map(|op| op.ts).collect();
        reverse.reverse();
        assert_eq!(forward, reverse);
        assert_eq!(forward, vec![ts(1, 1), ts(2, 1), ts(1, 2)]);
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let mut log = OperationLog::new();
        assert!(log.append(create(1, 1)));
        assert!(log.append(create(1, 2)));
        assert!(!log.append(create(1, 2)));
        assert!(!log.append(create(1, 1)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn gaps_are_allowed() {
        let mut log = OperationLog::new();
        assert!(log.append(create(1, 1)));
        assert!(log.append(create(1, 5)));
        assert_eq!(log.aggregate_clock().at(1), 5);
        // a late op from before the gap is indistinguishable from a replay
        assert!(!log.append(create(1, 3)));
    }

    #[test]
    fn without_dedupe_keeps_everything() {
        let mut log = OperationLog::without_dedupe();
        assert!(log.append(create(1, 2)));
        assert!(log.append(create(1, 2)));
        assert_eq!(log.len(), 2);
        assert_eq!(log.position(ts(1, 2)), Some(0));
    }

    #[test]
    fn lookup_and_matching() {
        let mut log = OperationLog::new();
        log.append(create(1, 1));
        log.append(Operation::new(
            ts(1, 2),
            Tag::new([7, 0, 0, 0]),
            Payload::CreateNode {
                node_kind: NodeKind::Text,
            },
        ));
        assert_eq!(log.get(ts(1, 2)).map(|op| op.tag), Some(Tag::new([7, 0, 0, 0])));
        assert!(log.get(ts(3, 1)).is_none());

        let filter = Filter::new().with_tag(Tag::UNTAGGED);
        let matching: Vec<Timestamp> = log.iter_matching(&filter).map(|op| op.ts).collect();
        assert_eq!(matching, vec![ts(1, 1)]);
    }
}
