#![allow(dead_code)]

use crdbl_core::{
    ts, CharId, ExecutionEngine, NodeKind, Operation, Payload, Projection, ReplayError, Tag,
    Timestamp,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

pub const SEEDS: [u64; 5] = [
    0x5eed_c0de_u64,
    0x0000_0000_0000_0001_u64,
    0x0000_0000_0000_00ff_u64,
    0x0000_0000_00c0_ffee_u64,
    0x0123_4567_89ab_cdef_u64,
];

// ── Recording engine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Apply(Timestamp),
    Unapply(Timestamp),
}

/// [`Projection`] that records every call it receives and can be told to
/// fail on one operation.
#[derive(Debug, Default)]
pub struct Recorder {
    pub inner: Projection,
    pub calls: Vec<Call>,
    pub fail_on: Option<Timestamp>,
}

impl Recorder {
    pub fn failing_on(stamp: Timestamp) -> Self {
        Self {
            fail_on: Some(stamp),
            ..Self::default()
        }
    }

    pub fn unapplied(&self) -> Vec<Timestamp> {
        unapplied_in(&self.calls)
    }

    pub fn applied(&self) -> Vec<Timestamp> {
        applied_in(&self.calls)
    }

    /// Calls recorded after the first `mark` ones.
    pub fn calls_since(&self, mark: usize) -> &[Call] {
        &self.calls[mark..]
    }

    fn check(&self, op: &Operation) -> Result<(), ReplayError> {
        if self.fail_on == Some(op.ts) {
            return Err(ReplayError::Rejected {
                op: op.ts,
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

pub fn unapplied_in(calls: &[Call]) -> Vec<Timestamp> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Unapply(stamp) => Some(*stamp),
            Call::Apply(_) => None,
        })
        .collect()
}

pub fn applied_in(calls: &[Call]) -> Vec<Timestamp> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Apply(stamp) => Some(*stamp),
            Call::Unapply(_) => None,
        })
        .collect()
}

impl ExecutionEngine for Recorder {
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        self.check(op)?;
        self.calls.push(Call::Apply(op.ts));
        self.inner.apply(op)
    }

    fn unapply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        self.check(op)?;
        self.calls.push(Call::Unapply(op.ts));
        self.inner.unapply(op)
    }
}

// ── Builders ──────────────────────────────────────────────────────────────

pub fn tag(n: u32) -> Tag {
    Tag::new([n, 0, 0, 0])
}

pub fn create(tag: Tag, site: u32, seq: u32, node_kind: NodeKind) -> Operation {
    Operation::new(ts(site, seq), tag, Payload::CreateNode { node_kind })
}

pub fn scalar(tag: Tag, site: u32, seq: u32) -> Operation {
    create(tag, site, seq, NodeKind::Scalar)
}

pub fn set(tag: Tag, site: u32, seq: u32, node: Timestamp, value: serde_json::Value) -> Operation {
    Operation::new(ts(site, seq), tag, Payload::SetValue { node, value })
}

pub fn insert(tag: Tag, site: u32, seq: u32, node: Timestamp, after: Option<CharId>, text: &str) -> Operation {
    Operation::new(
        ts(site, seq),
        tag,
        Payload::InsertText {
            node,
            after,
            text: text.into(),
        },
    )
}

// ── Seeded log generator ──────────────────────────────────────────────────

#[derive(Default)]
struct Lane {
    scalars: Vec<Timestamp>,
    texts: Vec<(Timestamp, Vec<CharId>)>,
    lists: Vec<Timestamp>,
    edges: Vec<(Timestamp, Timestamp)>,
}

impl Lane {
    fn nodes(&self) -> Vec<Timestamp> {
        let mut nodes = self.scalars.clone();
        nodes.extend(self.texts.iter().map(|(node, _)| *node));
        nodes.extend(self.lists.iter().copied());
        nodes
    }
}

/// Random causally ordered log over `sites` sites and `tags`.
///
/// Every operation only builds on earlier operations of the same site and
/// tag, so any filter made of tag subsets, site sets and end bounds selects a
/// dependency-closed subset of the log.
pub fn random_log(seed: u64, sites: u32, tags: &[Tag], len: usize) -> Vec<Operation> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut next_seq = vec![1u32; sites as usize + 1];
    let mut lanes: Vec<Lane> = (0..(sites as usize + 1) * tags.len())
        .map(|_| Lane::default())
        .collect();
    let mut ops = Vec::with_capacity(len);

    for _ in 0..len {
        let site = rng.gen_range(1..=sites);
        let tag_idx = rng.gen_range(0..tags.len());
        let tag = tags[tag_idx];
        let stamp = ts(site, next_seq[site as usize]);
        next_seq[site as usize] += 1;
        let lane = &mut lanes[site as usize * tags.len() + tag_idx];

        let payload = random_payload(&mut rng, lane, stamp);
        ops.push(Operation::new(stamp, tag, payload));
    }
    ops
}

fn random_payload(rng: &mut Xoshiro256StarStar, lane: &mut Lane, stamp: Timestamp) -> Payload {
    match rng.gen_range(0..6) {
        1 if !lane.scalars.is_empty() => {
            let node = lane.scalars[rng.gen_range(0..lane.scalars.len())];
            Payload::SetValue {
                node,
                value: serde_json::json!(rng.gen_range(0..100)),
            }
        }
        2 if !lane.texts.is_empty() => {
            let idx = rng.gen_range(0..lane.texts.len());
            let (node, chars) = &mut lane.texts[idx];
            let after = if chars.is_empty() || rng.gen_bool(0.2) {
                None
            } else {
                Some(chars[rng.gen_range(0..chars.len())])
            };
            let len = rng.gen_range(1..4);
            let text: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
            for offset in 0..len {
                chars.push(CharId::new(stamp, offset));
            }
            Payload::InsertText {
                node: *node,
                after,
                text,
            }
        }
        3 if lane.texts.iter().any(|(_, chars)| !chars.is_empty()) => {
            let candidates: Vec<&(Timestamp, Vec<CharId>)> =
                lane.texts.iter().filter(|(_, chars)| !chars.is_empty()).collect();
            let (node, chars) = candidates[rng.gen_range(0..candidates.len())];
            let count = rng.gen_range(1..=chars.len().min(2));
            let picked = (0..count).map(|_| chars[rng.gen_range(0..chars.len())]).collect();
            Payload::DeleteText {
                node: *node,
                chars: picked,
            }
        }
        4 if !lane.lists.is_empty() => {
            let parent = lane.lists[rng.gen_range(0..lane.lists.len())];
            let nodes = lane.nodes();
            let child = nodes[rng.gen_range(0..nodes.len())];
            lane.edges.push((parent, stamp));
            Payload::AddChild {
                parent,
                child,
                position: rng.gen_range(0..8),
            }
        }
        5 if !lane.edges.is_empty() => {
            let (parent, edge) = lane.edges[rng.gen_range(0..lane.edges.len())];
            Payload::RemoveChild { parent, edge }
        }
        _ => {
            let node_kind = match rng.gen_range(0..3) {
                0 => NodeKind::Scalar,
                1 => NodeKind::Text,
                _ => NodeKind::List,
            };
            match node_kind {
                NodeKind::Scalar => lane.scalars.push(stamp),
                NodeKind::Text => lane.texts.push((stamp, Vec::new())),
                NodeKind::List => lane.lists.push(stamp),
            }
            Payload::CreateNode { node_kind }
        }
    }
}

/// Apply `ops` in order onto a fresh projection.
pub fn apply_all<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Projection {
    let mut projection = Projection::new();
    for op in ops {
        projection
            .apply(op)
            .expect("direct apply of a dependency-closed subset must succeed");
    }
    projection
}
