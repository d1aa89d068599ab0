//! Operation records and the authoring-side clock.
//!
//! An [`Operation`] is one atomic mutation: its identity is the
//! [`Timestamp`] it was authored at, it carries an optional [`Tag`], and its
//! [`Payload`] is one of a closed set of structural mutations. The filter and
//! materialization layers only look at the timestamp and tag; the payload is
//! interpreted by an execution engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clock::{SiteId, Seq, Timestamp, VectorClock};
use crate::tag::Tag;

/// Kind of node created by [`Payload::CreateNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Scalar,
    Text,
    List,
}

/// Identity of one character inserted by an [`Payload::InsertText`]: the
/// inserting operation plus the character's offset within its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharId {
    pub op: Timestamp,
    pub offset: u32,
}

impl CharId {
    pub const fn new(op: Timestamp, offset: u32) -> Self {
        Self { op, offset }
    }
}

/// Structural mutation carried by an operation.
///
/// Nodes are addressed by the timestamp of the operation that created them,
/// list edges by the timestamp of the `AddChild` that created the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    CreateNode {
        node_kind: NodeKind,
    },
    SetValue {
        node: Timestamp,
        value: Value,
    },
    InsertText {
        node: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<CharId>,
        text: String,
    },
    DeleteText {
        node: Timestamp,
        chars: Vec<CharId>,
    },
    AddChild {
        parent: Timestamp,
        child: Timestamp,
        position: u64,
    },
    RemoveChild {
        parent: Timestamp,
        edge: Timestamp,
    },
}

/// An atomic, timestamped, optionally tagged mutation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub ts: Timestamp,
    #[serde(default, skip_serializing_if = "Tag::is_untagged")]
    pub tag: Tag,
    pub payload: Payload,
}

impl Operation {
    pub fn new(ts: Timestamp, tag: Tag, payload: Payload) -> Self {
        Self { ts, tag, payload }
    }

    pub fn untagged(ts: Timestamp, payload: Payload) -> Self {
        Self::new(ts, Tag::UNTAGGED, payload)
    }

    pub fn site(&self) -> SiteId {
        self.ts.site
    }

    pub fn seq(&self) -> Seq {
        self.ts.seq
    }

    /// Identities of the operations whose effects this one builds on, in
    /// first-reference order without duplicates.
    pub fn dependencies(&self) -> Vec<Timestamp> {
        let mut deps: Vec<Timestamp> = Vec::new();
        let mut push = |stamp: Timestamp| {
            if !deps.contains(&stamp) {
                deps.push(stamp);
            }
        };
        match &self.payload {
            Payload::CreateNode { .. } => {}
            Payload::SetValue { node, .. } => push(*node),
            Payload::InsertText { node, after, .. } => {
                push(*node);
                if let Some(anchor) = after {
                    push(anchor.op);
                }
            }
            Payload::DeleteText { node, chars } => {
                push(*node);
                for ch in chars {
                    push(ch.op);
                }
            }
            Payload::AddChild { parent, child, .. } => {
                push(*parent);
                push(*child);
            }
            Payload::RemoveChild { parent, edge } => {
                push(*parent);
                push(*edge);
            }
        }
        deps
    }
}

// ── Author ─────────────────────────────────────────────────────────────────

/// Authoring-side clock for one site.
///
/// Stamps payloads with the site id, the next sequence number and the
/// currently active tag. Emitted operations are appended to a replica like
/// any remotely received operation.
#[derive(Debug, Clone)]
pub struct Author {
    site: SiteId,
    /// `None` once the site's sequence space is used up.
    next: Option<Seq>,
    tag: Tag,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorError {
    #[error("site {site} has no sequence numbers left")]
    Exhausted { site: SiteId },
}

impl Author {
    /// Sequence numbers start at 1; zero never identifies an operation.
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            next: Some(1),
            tag: Tag::UNTAGGED,
        }
    }

    /// Continue authoring after everything `clock` has seen from this site.
    pub fn resume(site: SiteId, clock: &VectorClock) -> Self {
        Self {
            site,
            next: clock.at(site).checked_add(1),
            tag: Tag::UNTAGGED,
        }
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Tag every following operation with `tag` (the untagged bucket clears it).
    pub fn set_tag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    /// Timestamp the next emitted operation will carry, if any is left.
    pub fn peek(&self) -> Option<Timestamp> {
        self.next.map(|seq| Timestamp::new(self.site, seq))
    }

    /// Stamp `payload` and advance the clock.
    pub fn emit(&mut self, payload: Payload) -> Result<Operation, AuthorError> {
        let seq = self.next.ok_or(AuthorError::Exhausted { site: self.site })?;
        self.next = seq.checked_add(1);
        Ok(Operation::new(
            Timestamp::new(self.site, seq),
            self.tag,
            payload,
        ))
    }
}
