//! Operation-log filter materialization.
//!
//! A replica keeps an append-only, causally ordered [`OperationLog`] and
//! materializes the subset of it selected by a [`Filter`] into an
//! [`ExecutionEngine`]. Switching filters replays only the difference:
//! operations leaving scope are unapplied newest first, operations entering
//! scope are applied oldest first, and the replica's materialized clock is
//! rebased onto exactly what the new filter admits.
//!
//! ```
//! use crdbl_core::{Filter, NodeKind, Payload, Projection, ReplicaContext, Tag};
//!
//! let mut ctx = ReplicaContext::new(Projection::new());
//! let mut author = ctx.author();
//! author.set_tag(Tag::new([1, 0, 0, 0]));
//! let op = author.emit(Payload::CreateNode { node_kind: NodeKind::Text }).unwrap();
//! ctx.append(op).unwrap();
//!
//! let report = ctx.transition(&Filter::new().with_tag(Tag::UNTAGGED)).unwrap();
//! assert_eq!(report.unapplied, 1);
//! assert!(ctx.materialized_clock().is_empty());
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod filter;
pub mod log;
pub mod materialize;
pub mod operation;
pub mod tag;

pub use clock::{ts, Seq, SiteId, Timestamp, VectorClock};
pub use config::{ConfigError, ReplicaConfig};
pub use context::{ReplicaContext, SharedReplica, TransitionError};
pub use engine::{ExecutionEngine, Projection, ReplayError};
pub use filter::{Filter, FilterError, TagRange};
pub use log::OperationLog;
pub use materialize::{TransitionPlan, TransitionReport};
pub use operation::{Author, AuthorError, CharId, NodeKind, Operation, Payload};
pub use tag::Tag;
