// SPDX-License-Identifier: MPL-2.0

//! The work-queue driver (§4.6): pops the topological head, invokes a
//! caller-supplied stage handler, and re-enqueues dependants whose
//! preconditions may now be satisfied. Bounds retries with
//! `sincenothing`/`dependtry` counters and escalates the resolution
//! strategy when progress stalls.

use std::collections::VecDeque;
use std::hash::Hash;

use log::{debug, warn};

use crate::graph::{DependencyGraph, EdgeKind};

/// How tolerant the scheduler currently is of unresolved
/// relationships, escalated as `dependtry` increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolutionStrategy {
    /// All relationships must be genuinely satisfiable.
    Strict,
    /// Unsatisfied `Breaks` no longer blocks progress.
    AllowBreaksTolerance,
    /// Configure whatever is next in queue order regardless of
    /// outstanding depends; last resort before failing outright.
    ForceConfigureAny,
}

impl ResolutionStrategy {
    fn escalate(self) -> Self {
        match self {
            ResolutionStrategy::Strict => ResolutionStrategy::AllowBreaksTolerance,
            ResolutionStrategy::AllowBreaksTolerance => ResolutionStrategy::ForceConfigureAny,
            ResolutionStrategy::ForceConfigureAny => ResolutionStrategy::ForceConfigureAny,
        }
    }
}

/// What a stage handler reports back for one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The item reached its terminal state; its dependants may now be
    /// eligible.
    Done,
    /// Preconditions aren't satisfied yet under the current strategy;
    /// re-enqueue for a later pass.
    Deferred,
    /// A permanent failure (not a precondition gap); the item is
    /// dropped from the queue and not retried.
    Failed(String),
}

/// Upper bound on passes with zero progress before the scheduler gives
/// up and reports the unresolved set (§4.6).
const MAX_SINCENOTHING: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error<Id: std::fmt::Debug> {
    #[error("dependency cycle could not be broken: {0:?}")]
    UnbreakableCycle(Vec<Id>),
    #[error("no progress after {0} passes with {1} item(s) unresolved: {2:?}")]
    NoProgress(u32, usize, Vec<Id>),
}

/// One completed work item and its outcome, for the caller's audit
/// trail.
pub struct Completed<Id> {
    pub id: Id,
    pub outcome: TickOutcome,
}

pub struct WorkQueue<Id> {
    graph: DependencyGraph<Id>,
    strategy: ResolutionStrategy,
    sincenothing: u32,
    dependtry: u32,
}

impl<Id: Clone + Eq + Hash + std::fmt::Debug> WorkQueue<Id> {
    pub fn new(graph: DependencyGraph<Id>) -> Self {
        Self {
            graph,
            strategy: ResolutionStrategy::Strict,
            sincenothing: 0,
            dependtry: 0,
        }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Resolve any cycles in the graph, escalating the resolution
    /// strategy each time a cycle cannot be broken by dropping a
    /// non-pre-depend edge. Call before [`Self::drain`].
    pub fn resolve_cycles(&mut self) -> Result<(), Error<Id>> {
        while let Some(cycle) = self.graph.find_cycle() {
            if self.graph.break_cycle(&cycle) {
                debug!("broke a dependency cycle of {} node(s)", cycle.nodes.len());
                continue;
            }
            if self.strategy == ResolutionStrategy::ForceConfigureAny {
                let ids = cycle.nodes.iter().map(|&n| self.graph.id_of(n).clone()).collect();
                return Err(Error::UnbreakableCycle(ids));
            }
            self.strategy = self.strategy.escalate();
            self.dependtry += 1;
            warn!("cycle unbreakable under current strategy, escalating to {:?}", self.strategy);
        }
        Ok(())
    }

    /// Drain the queue, invoking `handler` for each item in
    /// topological order, re-enqueuing items the handler defers, and
    /// bounding retries via `sincenothing`. Returns every item's final
    /// outcome in completion order.
    pub fn drain(&mut self, mut handler: impl FnMut(&Id, ResolutionStrategy) -> TickOutcome) -> Result<Vec<Completed<Id>>, Error<Id>> {
        self.resolve_cycles()?;

        let order = self.graph.toposort().map_err(|_| Error::NoProgress(0, self.graph.node_count(), Vec::new()))?;
        let mut pending: VecDeque<Id> = order.into_iter().map(|idx| self.graph.id_of(idx).clone()).collect();
        let mut completed = Vec::new();

        while !pending.is_empty() {
            let round_len = pending.len();
            let mut progressed = false;
            let mut still_pending = VecDeque::new();

            for id in pending.drain(..) {
                match handler(&id, self.strategy) {
                    TickOutcome::Done => {
                        progressed = true;
                        completed.push(Completed { id, outcome: TickOutcome::Done });
                    }
                    TickOutcome::Deferred => {
                        still_pending.push_back(id);
                    }
                    TickOutcome::Failed(reason) => {
                        progressed = true;
                        completed.push(Completed {
                            id,
                            outcome: TickOutcome::Failed(reason),
                        });
                    }
                }
            }

            pending = still_pending;

            if progressed {
                self.sincenothing = 0;
            } else if !pending.is_empty() {
                self.sincenothing += 1;
                if self.sincenothing >= MAX_SINCENOTHING {
                    if self.strategy == ResolutionStrategy::ForceConfigureAny {
                        return Err(Error::NoProgress(self.sincenothing, pending.len(), pending.into()));
                    }
                    self.strategy = self.strategy.escalate();
                    self.dependtry += 1;
                    self.sincenothing = 0;
                    warn!("no progress in {round_len} item(s), escalating to {:?}", self.strategy);
                }
            }
        }

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_dependency_order() {
        let mut graph = DependencyGraph::new();
        graph.depends_on("b", "a", EdgeKind::Depend);
        let mut queue = WorkQueue::new(graph);

        let mut order = Vec::new();
        let result = queue
            .drain(|id, _strategy| {
                order.push(id.clone());
                TickOutcome::Done
            })
            .unwrap();

        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn breaks_cycle_and_still_terminates() {
        let mut graph = DependencyGraph::new();
        graph.depends_on("a", "b", EdgeKind::PreDepend);
        graph.depends_on("b", "a", EdgeKind::Depend);
        let mut queue = WorkQueue::new(graph);

        let result = queue.drain(|_id, _strategy| TickOutcome::Done).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn deferred_items_retry_until_resolved() {
        let mut graph = DependencyGraph::new();
        graph.node("a");
        let mut queue = WorkQueue::new(graph);

        let mut attempts = 0;
        let result = queue
            .drain(|_id, _strategy| {
                attempts += 1;
                if attempts < 2 {
                    TickOutcome::Deferred
                } else {
                    TickOutcome::Done
                }
            })
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn permanent_no_progress_eventually_fails() {
        let mut graph = DependencyGraph::new();
        graph.node("a");
        let mut queue = WorkQueue::new(graph);

        let err = queue.drain(|_id, _strategy| TickOutcome::Deferred).unwrap_err();
        assert!(matches!(err, Error::NoProgress(..)));
    }
}
