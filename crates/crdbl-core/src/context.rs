//! Replica context: one log, one active filter, one engine.
//!
//! [`ReplicaContext`] is the owner of everything a transition touches. The
//! materialized clock it keeps always equals the clock of exactly the
//! operations the active filter admits, whether they arrived through
//! [`ReplicaContext::transition`] or through live [`ReplicaContext::append`].
//!
//! A transition that fails half way leaves the engine in an unknown state.
//! The context then refuses further work with
//! [`TransitionError::Indeterminate`] until [`ReplicaContext::rebuild`]
//! replays the log onto a fresh engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use thiserror::Error;

use crate::clock::{SiteId, Timestamp, VectorClock};
use crate::config::ReplicaConfig;
use crate::engine::{ExecutionEngine, ReplayError};
use crate::filter::Filter;
use crate::log::OperationLog;
use crate::materialize::{self, TransitionReport};
use crate::operation::{Author, Operation};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
    #[error("another transition is in progress on this replica")]
    ConcurrentTransition,
    #[error("replica state is indeterminate after a failed transition; rebuild required")]
    Indeterminate,
}

// ── TransitionGuard ────────────────────────────────────────────────────────

/// Poisons the context on drop unless committed, so an early return or an
/// unwinding engine both leave it marked.
struct TransitionGuard<'a> {
    poisoned: &'a mut bool,
    committed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn enter(poisoned: &'a mut bool) -> Result<Self, TransitionError> {
        if *poisoned {
            return Err(TransitionError::Indeterminate);
        }
        Ok(Self {
            poisoned,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.poisoned = true;
        }
    }
}

// ── ReplicaContext ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ReplicaContext<E> {
    site: SiteId,
    log: OperationLog,
    filter: Filter,
    engine: E,
    clock: VectorClock,
    poisoned: bool,
    trace_ops: bool,
}

impl<E: ExecutionEngine> ReplicaContext<E> {
    /// Empty log, all-pass filter.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, &ReplicaConfig::default())
    }

    pub fn with_config(engine: E, config: &ReplicaConfig) -> Self {
        let log = if config.dedupe {
            OperationLog::new()
        } else {
            OperationLog::without_dedupe()
        };
        Self {
            site: config.site,
            log,
            filter: Filter::new(),
            engine,
            clock: VectorClock::new(),
            poisoned: false,
            trace_ops: config.trace_ops,
        }
    }

    /// Materialize an existing log onto an empty `engine` under `filter`.
    pub fn materialize(log: OperationLog, engine: E, filter: &Filter) -> Result<Self, TransitionError> {
        let defaults = ReplicaConfig::default();
        let mut ctx = Self {
            site: defaults.site,
            log,
            filter: Filter::nothing(),
            engine,
            clock: VectorClock::new(),
            poisoned: false,
            trace_ops: defaults.trace_ops,
        };
        ctx.transition(filter)?;
        Ok(ctx)
    }

    /// Switch the materialized view to `new_filter`.
    ///
    /// On error the context is poisoned.
    pub fn transition(&mut self, new_filter: &Filter) -> Result<TransitionReport, TransitionError> {
        let guard = TransitionGuard::enter(&mut self.poisoned)?;
        let plan = materialize::plan(&self.log, &self.filter, new_filter);
        let report = match materialize::replay(&plan, &mut self.engine, self.trace_ops) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(op = %err.op(), error = %err, "transition failed, replica needs a rebuild");
                return Err(err.into());
            }
        };
        self.clock = plan.clock;
        self.filter = new_filter.clone();
        guard.commit();
        tracing::debug!(%report, clock = %self.clock, "transition committed");
        Ok(report)
    }

    /// Incorporate one operation, authored locally or received remotely.
    ///
    /// Returns `false` if the log already had it. A new operation the active
    /// filter admits is applied immediately.
    pub fn append(&mut self, op: Operation) -> Result<bool, TransitionError> {
        let guard = TransitionGuard::enter(&mut self.poisoned)?;
        if !self.log.append(op) {
            guard.commit();
            return Ok(false);
        }
        if let Some(op) = self.log.as_slice().last().filter(|op| self.filter.matches(op)) {
            if self.trace_ops {
                tracing::trace!(ts = %op.ts, tag = %op.tag, "apply");
            }
            if let Err(err) = self.engine.apply(op) {
                tracing::warn!(op = %err.op(), error = %err, "live apply failed, replica needs a rebuild");
                return Err(err.into());
            }
            self.clock.observe(op.ts);
        }
        guard.commit();
        Ok(true)
    }

    /// Replay the whole log onto `engine` under `filter`, replacing the
    /// current engine. Clears a poisoned state.
    pub fn rebuild(&mut self, engine: E, filter: &Filter) -> Result<TransitionReport, TransitionError> {
        tracing::debug!(ops = self.log.len(), "rebuilding replica");
        self.engine = engine;
        self.clock = VectorClock::new();
        self.filter = Filter::nothing();
        self.poisoned = false;
        self.transition(filter)
    }

    /// Author for this replica's site, continuing after everything the log
    /// holds from it.
    pub fn author(&self) -> Author {
        Author::resume(self.site, self.log.aggregate_clock())
    }

    pub fn has_incorporated(&self, stamp: Timestamp) -> bool {
        self.clock.covers(stamp)
    }

    pub fn materialized_clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn active_filter(&self) -> &Filter {
        &self.filter
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn into_engine(self) -> E {
        self.engine
    }
}

// ── SharedReplica ──────────────────────────────────────────────────────────

/// Cloneable handle to a context shared between threads.
///
/// Mutations never wait for the lock: a busy context fails with
/// [`TransitionError::ConcurrentTransition`].
#[derive(Debug)]
pub struct SharedReplica<E> {
    inner: Arc<Mutex<ReplicaContext<E>>>,
}

impl<E> Clone for SharedReplica<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ExecutionEngine> SharedReplica<E> {
    pub fn new(ctx: ReplicaContext<E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ctx)),
        }
    }

    fn try_context(&self) -> Result<MutexGuard<'_, ReplicaContext<E>>, TransitionError> {
        match self.inner.try_lock() {
            Ok(ctx) => Ok(ctx),
            Err(TryLockError::WouldBlock) => Err(TransitionError::ConcurrentTransition),
            Err(TryLockError::Poisoned(_)) => Err(TransitionError::Indeterminate),
        }
    }

    pub fn transition(&self, new_filter: &Filter) -> Result<TransitionReport, TransitionError> {
        self.try_context()?.transition(new_filter)
    }

    pub fn append(&self, op: Operation) -> Result<bool, TransitionError> {
        self.try_context()?.append(op)
    }

    /// Run `f` against the context, waiting for the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ReplicaContext<E>) -> R) -> Result<R, TransitionError> {
        let ctx = self.inner.lock().map_err(|_| TransitionError::Indeterminate)?;
        Ok(f(&ctx))
    }

    /// Rebuild the context, recovering from a panic mid-transition.
    pub fn rebuild(&self, engine: E, filter: &Filter) -> Result<TransitionReport, TransitionError> {
        let mut ctx = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.clear_poison();
        ctx.rebuild(engine, filter)
    }
}
