//! The execution-engine seam.
//!
//! The materialization layer never interprets payloads itself. It sends
//! operations to an [`ExecutionEngine`], which applies or unapplies their
//! structural effect. Engines may assume the caller respects causal order:
//! `apply` only after every dependency is applied, `unapply` only once no
//! applied operation still depends on the target. A violation is reported as
//! a [`ReplayError`] and is fatal for the caller's transition.

mod projection;

pub use projection::Projection;

use thiserror::Error;

use crate::clock::Timestamp;
use crate::operation::Operation;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("cannot unapply {op}: {dependent} still depends on it")]
    OutOfOrder { op: Timestamp, dependent: Timestamp },
    #[error("cannot apply {op}: dependency {dependency} is not applied")]
    MissingDependency { op: Timestamp, dependency: Timestamp },
    #[error("cannot unapply {op}: it is not applied")]
    NotApplied { op: Timestamp },
    #[error("engine rejected {op}: {reason}")]
    Rejected { op: Timestamp, reason: String },
}

impl ReplayError {
    /// The operation the engine was asked to replay.
    pub fn op(&self) -> Timestamp {
        match self {
            ReplayError::OutOfOrder { op, .. }
            | ReplayError::MissingDependency { op, .. }
            | ReplayError::NotApplied { op }
            | ReplayError::Rejected { op, .. } => *op,
        }
    }
}

/// Sink for structural replay.
///
/// `apply` must be idempotent for an operation identity that is already
/// applied; `unapply` must exactly invert a prior `apply`.
pub trait ExecutionEngine {
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError>;

    fn unapply(&mut self, op: &Operation) -> Result<(), ReplayError>;
}

impl<E: ExecutionEngine + ?Sized> ExecutionEngine for &mut E {
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        (**self).apply(op)
    }

    fn unapply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        (**self).unapply(op)
    }
}

impl<E: ExecutionEngine + ?Sized> ExecutionEngine for Box<E> {
    fn apply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        (**self).apply(op)
    }

    fn unapply(&mut self, op: &Operation) -> Result<(), ReplayError> {
        (**self).unapply(op)
    }
}
