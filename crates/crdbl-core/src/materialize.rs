//! Filter transitions over an operation log.
//!
//! Switching a replica from filter `old` to filter `new` is two passes over
//! the same log snapshot:
//!
//! 1. **reverse** (last to first): unapply every operation `old` admits and
//!    `new` rejects;
//! 2. **forward** (first to last): apply every operation `new` admits and
//!    `old` rejected.
//!
//! Reverse order guarantees an operation is only unapplied after everything
//! authored on top of it has been. Forward order guarantees dependencies are
//! applied first. Membership is a pure function of `(old, new, op)`, so the
//! partition is computed up front by [`plan`] and replayed by [`execute`].

use std::fmt;

use crate::clock::VectorClock;
use crate::engine::{ExecutionEngine, ReplayError};
use crate::filter::Filter;
use crate::log::OperationLog;
use crate::operation::Operation;

/// Partition of a log for one transition.
#[derive(Debug, Clone)]
pub struct TransitionPlan<'a> {
    /// Operations leaving scope, in reverse log order.
    pub leaving: Vec<&'a Operation>,
    /// Operations entering scope, in log order.
    pub entering: Vec<&'a Operation>,
    /// Operations admitted by both filters.
    pub retained: usize,
    /// Clock of every operation the new filter admits.
    pub clock: VectorClock,
}

impl TransitionPlan<'_> {
    pub fn is_noop(&self) -> bool {
        self.leaving.is_empty() && self.entering.is_empty()
    }
}

/// Outcome of a completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionReport {
    pub unapplied: usize,
    pub applied: usize,
    pub retained: usize,
}

impl fmt::Display for TransitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-{} +{} ={}",
            self.unapplied, self.applied, self.retained
        )
    }
}

/// Partition `log` for a transition from `old` to `new`. Side-effect free.
///
/// An identity recorded more than once (a log kept without dedupe) is
/// replayed once, at its first position.
pub fn plan<'a>(log: &'a OperationLog, old: &Filter, new: &Filter) -> TransitionPlan<'a> {
    let first = |i: usize, op: &Operation| log.position(op.ts) == Some(i);

    let mut leaving = Vec::new();
    for (i, op) in log.forward().enumerate().rev() {
        if first(i, op) && old.matches(op) && !new.matches(op) {
            leaving.push(op);
        }
    }

    let mut entering = Vec::new();
    let mut retained = 0;
    let mut clock = VectorClock::new();
    for (i, op) in log.forward().enumerate() {
        if !first(i, op) || !new.matches(op) {
            continue;
        }
        clock.observe(op.ts);
        if old.matches(op) {
            retained += 1;
        } else {
            entering.push(op);
        }
    }

    TransitionPlan {
        leaving,
        entering,
        retained,
        clock,
    }
}

/// Replay `plan` against `engine`: every unapply, then every apply.
///
/// Stops at the first engine error; the engine is then in an unspecified
/// intermediate state.
pub fn execute<E>(plan: &TransitionPlan<'_>, engine: &mut E) -> Result<TransitionReport, ReplayError>
where
    E: ExecutionEngine + ?Sized,
{
    replay(plan, engine, false)
}

pub(crate) fn replay<E>(
    plan: &TransitionPlan<'_>,
    engine: &mut E,
    trace_ops: bool,
) -> Result<TransitionReport, ReplayError>
where
    E: ExecutionEngine + ?Sized,
{
    for op in &plan.leaving {
        if trace_ops {
            tracing::trace!(ts = %op.ts, tag = %op.tag, "unapply");
        }
        engine.unapply(op)?;
    }
    for op in &plan.entering {
        if trace_ops {
            tracing::trace!(ts = %op.ts, tag = %op.tag, "apply");
        }
        engine.apply(op)?;
    }
    Ok(TransitionReport {
        unapplied: plan.leaving.len(),
        applied: plan.entering.len(),
        retained: plan.retained,
    })
}
