//! Reference execution engine.
//!
//! [`Projection`] interprets payloads against an arena of nodes keyed by the
//! timestamp of the operation that created them. Every effect is keyed by
//! operation identity, so the rendered state depends only on *which*
//! operations are applied, never on the order they arrived in:
//!
//! - scalar nodes are last-writer-wins registers ordered by `(seq, site)`;
//! - text nodes are RGA sequences: each character is anchored on its
//!   predecessor, siblings are ordered newest first, deletions are
//!   tombstone counts;
//! - list nodes order edges by `(position, edge id)`, removals are
//!   tombstone counts.
//!
//! Dependency bookkeeping is generic over [`Operation::dependencies`]: an
//! operation can only be applied once its dependencies are, and only be
//! unapplied once nothing applied depends on it.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use super::{ExecutionEngine, ReplayError};
use crate::clock::{Seq, SiteId, Timestamp};
use crate::operation::{CharId, NodeKind, Operation, Payload};

type OrderKey = (Seq, SiteId);

static NULL: Value = Value::Null;

fn order_key(stamp: Timestamp) -> OrderKey {
    (stamp.seq, stamp.site)
}

#[derive(Debug, Clone)]
struct Applied {
    deps: Vec<Timestamp>,
    dependents: Vec<Timestamp>,
}

#[derive(Debug, Clone)]
struct TextChar {
    ch: char,
    anchor: Option<CharId>,
    tombstones: u32,
}

#[derive(Debug, Clone)]
struct ListEdge {
    id: Timestamp,
    child: Timestamp,
    tombstones: u32,
}

#[derive(Debug, Clone)]
enum Node {
    Scalar(BTreeMap<OrderKey, Value>),
    Text(HashMap<CharId, TextChar>),
    List(BTreeMap<(u64, Seq, SiteId), ListEdge>),
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::Scalar(_) => NodeKind::Scalar,
            Node::Text(_) => NodeKind::Text,
            Node::List(_) => NodeKind::List,
        }
    }
}

/// In-memory document built by replaying operations.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    applied: HashMap<Timestamp, Applied>,
    nodes: HashMap<Timestamp, Node>,
    // edge id -> (parent, key in the parent's edge map)
    edges: HashMap<Timestamp, (Timestamp, (u64, Seq, SiteId))>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applied(&self, ts: Timestamp) -> bool {
        self.applied.contains_key(&ts)
    }

    /// Number of operations currently applied.
    pub fn applied_len(&self) -> usize {
        self.applied.len()
    }

    /// Applied operation identities in `(site, seq)` order.
    pub fn applied_ids(&self) -> Vec<Timestamp> {
        let mut ids: Vec<Timestamp> = self.applied.keys().copied().collect();
        ids.sort_by_key(|ts| (ts.site, ts.seq));
        ids
    }

    pub fn node_kind(&self, node: Timestamp) -> Option<NodeKind> {
        self.nodes.get(&node).map(Node::kind)
    }

    /// Current value of a scalar node; `None` if the node is not a scalar.
    pub fn value(&self, node: Timestamp) -> Option<&Value> {
        match self.nodes.get(&node)? {
            Node::Scalar(writes) => Some(writes.values().next_back().unwrap_or(&NULL)),
            _ => None,
        }
    }

    /// Visible text of a text node.
    pub fn text(&self, node: Timestamp) -> Option<String> {
        match self.nodes.get(&node)? {
            Node::Text(chars) => Some(render_text(chars)),
            _ => None,
        }
    }

    /// Visible children of a list node, in order.
    pub fn children(&self, node: Timestamp) -> Option<Vec<Timestamp>> {
        match self.nodes.get(&node)? {
            Node::List(edges) => Some(
                edges
                    .values()
                    .filter(|edge| edge.tombstones == 0)
                    .map(|edge| edge.child)
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Every node rendered flat, keyed by `site.seq` in `(site, seq)` order.
    /// List nodes render as arrays of child ids.
    pub fn snapshot(&self) -> Value {
        let mut ids: Vec<Timestamp> = self.nodes.keys().copied().collect();
        ids.sort_by_key(|ts| (ts.site, ts.seq));
        let mut out = Map::new();
        for id in ids {
            let rendered = match &self.nodes[&id] {
                Node::Scalar(_) => self.value(id).cloned().unwrap_or(Value::Null),
                Node::Text(chars) => Value::String(render_text(chars)),
                Node::List(_) => Value::Array(
                    self.children(id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|child| Value::String(child.to_string()))
                        .collect(),
                ),
            };
            out.insert(id.to_string(), rendered);
        }
        Value::Object(out)
    }

    // ── Effects ────────────────────────────────────────────────────────────

    fn node_mut(&mut self, op: Timestamp, node: Timestamp, kind: NodeKind) -> Result<&mut Node, ReplayError> {
        match self.nodes.get_mut(&node) {
            Some(found) if found.kind() == kind => Ok(found),
            Some(found) => Err(ReplayError::Rejected {
                op,
                reason: format!("node {node} is {:?}, expected {:?}", found.kind(), kind),
            }),
            None => Err(ReplayError::Rejected {
                op,
                reason: format!("node {node} does not exist"),
            }),
        }
    }

    fn do_apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        let id = op.ts;
        match &op.payload {
            Payload::CreateNode { node_kind } => {
                let node = match node_kind {
                    NodeKind::Scalar => Node::Scalar(BTreeMap::new()),
                    NodeKind::Text => Node::Text(HashMap::new()),
                    NodeKind::List => Node::List(BTreeMap::new()),
                };
                self.nodes.insert(id, node);
            }
            Payload::SetValue { node, value } => {
                if let Node::Scalar(writes) = self.node_mut(id, *node, NodeKind::Scalar)? {
                    writes.insert(order_key(id), value.clone());
                }
            }
            Payload::InsertText { node, after, text } => {
                if let Node::Text(chars) = self.node_mut(id, *node, NodeKind::Text)? {
                    if let Some(anchor) = after {
                        if !chars.contains_key(anchor) {
                            return Err(ReplayError::Rejected {
                                op: id,
                                reason: format!("anchor {}:{} not in node {node}", anchor.op, anchor.offset),
                            });
                        }
                    }
                    let mut prev = *after;
                    for (offset, ch) in text.chars().enumerate() {
                        let char_id = CharId::new(id, offset as u32);
                        chars.insert(
                            char_id,
                            TextChar {
                                ch,
                                anchor: prev,
                                tombstones: 0,
                            },
                        );
                        prev = Some(char_id);
                    }
                }
            }
            Payload::DeleteText { node, chars: targets } => {
                if let Node::Text(chars) = self.node_mut(id, *node, NodeKind::Text)? {
                    if let Some(missing) = targets.iter().find(|c| !chars.contains_key(c)) {
                        return Err(ReplayError::Rejected {
                            op: id,
                            reason: format!("char {}:{} not in node {node}", missing.op, missing.offset),
                        });
                    }
                    for target in targets {
                        if let Some(ch) = chars.get_mut(target) {
                            ch.tombstones += 1;
                        }
                    }
                }
            }
            Payload::AddChild {
                parent,
                child,
                position,
            } => {
                if !self.nodes.contains_key(child) {
                    return Err(ReplayError::Rejected {
                        op: id,
                        reason: format!("child {child} does not exist"),
                    });
                }
                let key = (*position, id.seq, id.site);
                if let Node::List(edges) = self.node_mut(id, *parent, NodeKind::List)? {
                    edges.insert(
                        key,
                        ListEdge {
                            id,
                            child: *child,
                            tombstones: 0,
                        },
                    );
                }
                self.edges.insert(id, (*parent, key));
            }
            Payload::RemoveChild { parent, edge } => {
                let key = match self.edges.get(edge) {
                    Some((owner, key)) if owner == parent => *key,
                    _ => {
                        return Err(ReplayError::Rejected {
                            op: id,
                            reason: format!("edge {edge} is not a child of {parent}"),
                        })
                    }
                };
                if let Node::List(edges) = self.node_mut(id, *parent, NodeKind::List)? {
                    if let Some(found) = edges.get_mut(&key) {
                        found.tombstones += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn do_unapply(&mut self, op: &Operation) {
        let id = op.ts;
        match &op.payload {
            Payload::CreateNode { .. } => {
                self.nodes.remove(&id);
            }
            Payload::SetValue { node, .. } => {
                if let Some(Node::Scalar(writes)) = self.nodes.get_mut(node) {
                    writes.remove(&order_key(id));
                }
            }
            Payload::InsertText { node, text, .. } => {
                if let Some(Node::Text(chars)) = self.nodes.get_mut(node) {
                    for offset in 0..text.chars().count() {
                        chars.remove(&CharId::new(id, offset as u32));
                    }
                }
            }
            Payload::DeleteText { node, chars: targets } => {
                if let Some(Node::Text(chars)) = self.nodes.get_mut(node) {
                    for target in targets {
                        if let Some(ch) = chars.get_mut(target) {
                            ch.tombstones = ch.tombstones.saturating_sub(1);
                        }
                    }
                }
            }
            Payload::AddChild { parent, .. } => {
                if let Some((_, key)) = self.edges.remove(&id) {
                    if let Some(Node::List(edges)) = self.nodes.get_mut(parent) {
                        edges.remove(&key);
                    }
                }
            }
            Payload::RemoveChild { parent, edge } => {
                if let Some((_, key)) = self.edges.get(edge).copied() {
                    if let Some(Node::List(edges)) = self.nodes.get_mut(parent) {
                        if let Some(found) = edges.get_mut(&key) {
                            found.tombstones = found.tombstones.saturating_sub(1);
                        }
                    }
                }
            }
        }
    }
}

impl ExecutionEngine for Projection {
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        if self.applied.contains_key(&op.ts) {
            return Ok(());
        }
        let deps = op.dependencies();
        if let Some(missing) = deps.iter().find(|dep| !self.applied.contains_key(dep)) {
            return Err(ReplayError::MissingDependency {
                op: op.ts,
                dependency: *missing,
            });
        }
        self.do_apply(op)?;
        for dep in &deps {
            if let Some(entry) = self.applied.get_mut(dep) {
                entry.dependents.push(op.ts);
            }
        }
        self.applied.insert(
            op.ts,
            Applied {
                deps,
                dependents: Vec::new(),
            },
        );
        Ok(())
    }

    fn unapply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        let entry = self
            .applied
            .get(&op.ts)
            .ok_or(ReplayError::NotApplied { op: op.ts })?;
        if let Some(dependent) = entry.dependents.last() {
            return Err(ReplayError::OutOfOrder {
                op: op.ts,
                dependent: *dependent,
            });
        }
        self.do_unapply(op);
        if let Some(entry) = self.applied.remove(&op.ts) {
            for dep in entry.deps {
                if let Some(parent) = self.applied.get_mut(&dep) {
                    parent.dependents.retain(|d| *d != op.ts);
                }
            }
        }
        Ok(())
    }
}

/// Depth-first walk of the RGA tree: children of an anchor in descending
/// `(seq, site, offset)` order, tombstoned characters skipped.
fn render_text(chars: &HashMap<CharId, TextChar>) -> String {
    let mut children: HashMap<Option<CharId>, Vec<CharId>> = HashMap::new();
    for (id, ch) in chars {
        children.entry(ch.anchor).or_default().push(*id);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|c| (c.op.seq, c.op.site, c.offset));
    }

    let mut out = String::new();
    // siblings are sorted ascending; popping from the back visits newest first
    let mut stack: Vec<CharId> = children.get(&None).cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        let ch = &chars[&id];
        if ch.tombstones == 0 {
            out.push(ch.ch);
        }
        if let Some(next) = children.get(&Some(id)) {
            stack.extend(next.iter().copied());
        }
    }
    out
}
