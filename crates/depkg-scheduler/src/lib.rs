// SPDX-License-Identifier: MPL-2.0

//! The dependency scheduler (§4.6): a work queue over a
//! [`graph::DependencyGraph`] of pending packages, driven by
//! [`queue::WorkQueue`] with tri-color cycle breaking and an
//! escalating resolution strategy when progress stalls.

pub mod graph;
pub mod queue;

pub use graph::{Cycle, DependencyGraph, EdgeKind};
pub use queue::{Completed, Error, ResolutionStrategy, TickOutcome, WorkQueue};
