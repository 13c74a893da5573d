//! Update coordinator: the serialized, copy-on-write write path
//!
//! ```text
//!  submit(batch) ─► take ticket ─► wait for turn ─► Building ─► publish (ArcSwap::store) ─► Published
//!                        │              │               │
//!                   FIFO order     cancellable     all-or-nothing:
//!                                                  any invalid change
//!                                                  discards the copy
//! ```
//!
//! Batches run one at a time in ticket order. The store is cloned, the whole
//! batch is applied to the clone, a new generation is compiled from it, and
//! only then is the generation swapped in and the clone committed. Readers
//! are never blocked: they keep using whichever generation they loaded.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use netgate_common::metrics::LatencyHistogram;
use netgate_common::{
    AtomicCounter, EngineError, EngineResult, GenerationId, IndexBuildError, RuleError, RuleId, Timestamp,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::generation::Generation;
use crate::rule::RuleSpec;
use crate::store::RuleStore;

/// One mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleChange {
    /// Append a rule
    Add {
        /// Rule definition
        rule: RuleSpec,
    },
    /// Remove a rule; unknown ids are a no-op
    Remove {
        /// Target
        id: RuleId,
    },
    /// Replace a rule, keeping its id and position
    Replace {
        /// Target
        id: RuleId,
        /// New definition
        rule: RuleSpec,
    },
    /// Enable or disable a rule
    SetEnabled {
        /// Target
        id: RuleId,
        /// New state
        enabled: bool,
    },
    /// Replace the whole rule set
    ReplaceAll {
        /// New rule set, in insertion order
        rules: Vec<RuleSpec>,
    },
}

impl RuleChange {
    /// Add change
    pub fn add(rule: RuleSpec) -> Self {
        Self::Add { rule }
    }

    /// Remove change
    pub fn remove(id: RuleId) -> Self {
        Self::Remove { id }
    }

    fn apply(&self, store: &mut RuleStore, receipt: &mut BatchReceipt) -> Result<(), RuleError> {
        match self {
            Self::Add { rule } => receipt.added.push(store.add_rule(rule)?),
            Self::Remove { id } => {
                if store.remove_rule(*id) {
                    receipt.removed += 1;
                }
            }
            Self::Replace { id, rule } => store.replace_rule(*id, rule)?,
            Self::SetEnabled { id, enabled } => store.set_enabled(*id, *enabled)?,
            Self::ReplaceAll { rules } => {
                let before = store.len();
                let ids = store.replace_all(rules)?;
                receipt.removed += before;
                receipt.added.extend(ids);
            }
        }
        Ok(())
    }
}

/// Outcome of an applied batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    /// Generation now active
    pub generation: GenerationId,
    /// Ids assigned to added rules, in submission order
    pub added: Vec<RuleId>,
    /// Rules removed
    pub removed: usize,
}

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    /// Nothing published yet
    Idle,
    /// A batch is being applied and compiled
    Building,
    /// Last batch published
    Published,
    /// A build failed; updates are refused
    Halted,
}

/// Cancellation handle for a queued batch
///
/// Only honoured while the batch waits for its turn.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check cancellation
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Write-path counters
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Batches published
    pub applied: AtomicCounter,
    /// Batches refused by validation
    pub rejected: AtomicCounter,
    /// Batches cancelled before building
    pub cancelled: AtomicCounter,
    /// Index compile time
    pub build_latency: LatencyHistogram,
}

struct Queue {
    store: RuleStore,
    next_ticket: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
    state: CoordinatorState,
    halted: Option<IndexBuildError>,
}

/// The queue while a ticket holds its turn
///
/// Dropping it hands the turn on, so a batch that unwinds out of its build
/// cannot wedge the queue.
struct Turn<'a> {
    coordinator: &'a UpdateCoordinator,
    queue: MutexGuard<'a, Queue>,
    previous: CoordinatorState,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if self.queue.state == CoordinatorState::Building {
            error!("Batch build unwound, nothing published");
            self.queue.state = self.previous;
        }
        self.coordinator.release(&mut self.queue);
    }
}

/// Serializes rule updates and publishes generations
pub struct UpdateCoordinator {
    current: Arc<ArcSwap<Generation>>,
    queue: Mutex<Queue>,
    turn: Condvar,
    cancel_poll: Duration,
    stats: CoordinatorStats,
    #[cfg(test)]
    fail_next_build: AtomicBool,
    #[cfg(test)]
    panic_next_build: AtomicBool,
}

impl UpdateCoordinator {
    /// Create coordinator publishing into `current`
    ///
    /// `current` should hold the empty generation; the coordinator owns the
    /// store behind every generation it publishes.
    pub fn new(current: Arc<ArcSwap<Generation>>, cancel_poll: Duration) -> Self {
        Self {
            current,
            queue: Mutex::new(Queue {
                store: RuleStore::new(),
                next_ticket: 0,
                serving: 0,
                abandoned: BTreeSet::new(),
                state: CoordinatorState::Idle,
                halted: None,
            }),
            turn: Condvar::new(),
            cancel_poll,
            stats: CoordinatorStats::default(),
            #[cfg(test)]
            fail_next_build: AtomicBool::new(false),
            #[cfg(test)]
            panic_next_build: AtomicBool::new(false),
        }
    }

    /// Apply a batch and return the generation now active
    pub fn apply_batch(&self, changes: Vec<RuleChange>) -> EngineResult<GenerationId> {
        self.submit(changes, None).map(|receipt| receipt.generation)
    }

    /// Apply a batch, optionally cancellable while queued
    ///
    /// An empty batch publishes nothing and returns the current generation.
    pub fn submit(&self, changes: Vec<RuleChange>, cancel: Option<&CancelToken>) -> EngineResult<BatchReceipt> {
        if changes.is_empty() {
            let generation = self.current.load().id();
            debug!("Empty batch, {} stays active", generation);
            return Ok(BatchReceipt {
                generation,
                added: Vec::new(),
                removed: 0,
            });
        }

        let is_cancelled = || cancel.map_or(false, CancelToken::is_cancelled);

        let mut queue = self.queue.lock();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;

        while queue.serving != ticket {
            if is_cancelled() {
                queue.abandoned.insert(ticket);
                self.stats.cancelled.inc();
                debug!("Batch ticket {} cancelled while queued", ticket);
                return Err(EngineError::Cancelled);
            }
            if cancel.is_some() {
                let _ = self.turn.wait_for(&mut queue, self.cancel_poll);
            } else {
                self.turn.wait(&mut queue);
            }
        }

        let mut turn = Turn {
            previous: queue.state,
            coordinator: self,
            queue,
        };

        // Last chance to cancel; past this point the batch runs to completion.
        if is_cancelled() {
            self.stats.cancelled.inc();
            return Err(EngineError::Cancelled);
        }
        if turn.queue.halted.is_some() {
            return Err(EngineError::UpdatesHalted);
        }

        turn.queue.state = CoordinatorState::Building;
        let mut working = turn.queue.store.clone();
        let next_id = self.current.load().id().next();

        let result = MutexGuard::unlocked(&mut turn.queue, || self.build(&mut working, &changes, next_id));

        match result {
            Ok((generation, receipt)) => {
                let rules = generation.len();
                self.current.store(Arc::new(generation));
                turn.queue.store = working;
                turn.queue.state = CoordinatorState::Published;
                self.stats.applied.inc();
                metrics::counter!("netgate_batches_applied_total").increment(1);
                metrics::gauge!("netgate_generation").set(next_id.0 as f64);
                metrics::gauge!("netgate_rules").set(rules as f64);
                info!(
                    "Published {} ({} changes, {} rules, {} added, {} removed)",
                    next_id,
                    changes.len(),
                    rules,
                    receipt.added.len(),
                    receipt.removed
                );
                Ok(receipt)
            }
            Err(EngineError::IndexBuild(err)) => {
                error!("Index build for {} failed, halting rule updates: {}", next_id, err);
                turn.queue.state = CoordinatorState::Halted;
                turn.queue.halted = Some(err.clone());
                metrics::counter!("netgate_index_build_failures_total").increment(1);
                Err(EngineError::IndexBuild(err))
            }
            Err(err) => {
                warn!("Rejected batch of {} changes: {}", changes.len(), err);
                turn.queue.state = turn.previous;
                self.stats.rejected.inc();
                metrics::counter!("netgate_batches_rejected_total").increment(1);
                Err(err)
            }
        }
    }

    /// Apply every change to the working copy and compile the result
    fn build(
        &self,
        working: &mut RuleStore,
        changes: &[RuleChange],
        id: GenerationId,
    ) -> EngineResult<(Generation, BatchReceipt)> {
        let mut receipt = BatchReceipt {
            generation: id,
            added: Vec::new(),
            removed: 0,
        };
        for (index, change) in changes.iter().enumerate() {
            change
                .apply(working, &mut receipt)
                .map_err(|source| EngineError::InvalidRule { index, source })?;
        }

        #[cfg(test)]
        if self.panic_next_build.swap(false, Ordering::SeqCst) {
            panic!("index build blew up");
        }
        #[cfg(test)]
        if self.fail_next_build.swap(false, Ordering::SeqCst) {
            return Err(EngineError::IndexBuild(IndexBuildError::RankMismatch {
                expected: working.len(),
                found: 0,
            }));
        }

        let started = Timestamp::now();
        let generation = Generation::build(id, working.snapshot())?;
        let elapsed = started.elapsed_micros();
        self.stats.build_latency.record(elapsed);

        let shape = generation.index_stats();
        debug!(
            "Compiled {} in {}us: {} rules, {} trie nodes, {} port segments",
            id, elapsed, shape.rules, shape.trie_nodes, shape.port_segments
        );
        Ok((generation, receipt))
    }

    /// Hand the turn to the next live ticket
    fn release(&self, queue: &mut Queue) {
        queue.serving += 1;
        while queue.abandoned.remove(&queue.serving) {
            queue.serving += 1;
        }
        self.turn.notify_all();
    }

    /// Generation currently published
    pub fn current(&self) -> GenerationId {
        self.current.load().id()
    }

    /// Lifecycle state
    pub fn state(&self) -> CoordinatorState {
        self.queue.lock().state
    }

    /// Batches submitted and not yet finished, including one being built
    pub fn queued(&self) -> usize {
        let queue = self.queue.lock();
        (queue.next_ticket - queue.serving) as usize - queue.abandoned.len()
    }

    /// Whether a build failure has stopped updates
    pub fn is_halted(&self) -> bool {
        self.queue.lock().halted.is_some()
    }

    /// Write-path counters
    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    #[cfg(test)]
    fn inject_build_failure(&self) {
        self.fail_next_build.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn inject_build_panic(&self) {
        self.panic_next_build.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for UpdateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("current", &self.current())
            .field("state", &self.state())
            .finish()
    }
}
