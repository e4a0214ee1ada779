// Copyright (c) 2025 Felix Kahle.
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the
// "Software"), to deal in the Software without restriction, including
// without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to
// permit persons to whom the Software is furnished to do so, subject to
// the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE
// LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION
// WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Per-node concurrent-build caps. A throttled node accepts at most
//! `max_concurrent_builds` in-build replicas; a replica returning to its
//! own node is always admitted. The base solution cannot violate this
//! (the caps gate admission, not residence), so only overlay changes are
//! ever checked.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{Placement, ReplicaIndex};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct ThrottlingConstraint {
    priority: i32,
}

impl ThrottlingConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Global movement-slot cap when the constraint is hard: the sum of
    /// the build caps of throttled up nodes. `None` when nothing is
    /// throttled.
    pub fn get_throttled_move_count(placement: &Placement) -> Option<usize> {
        let mut total = 0usize;
        let mut any = false;
        for node in placement.up_node_indices() {
            let n = placement.node(node);
            if n.is_throttled() {
                any = true;
                total += n.max_concurrent_builds().unwrap_or(0);
            }
        }
        any.then_some(total)
    }
}

impl Constraint for ThrottlingConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Throttling
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(
        &self,
        _solution: &TempSolution<'_>,
        _ctx: CheckContext,
    ) -> Option<Violation> {
        None
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut invalid = BTreeSet::new();
        for node in placement.up_node_indices() {
            let n = placement.node(node);
            if !n.is_throttled() {
                continue;
            }
            let cap = n.max_concurrent_builds().unwrap_or(usize::MAX);
            let count = solution.in_build_count(node);
            if count <= cap {
                continue;
            }
            // Evict builds brought in this run until the cap holds again.
            let mut excess = count - cap;
            for r in solution.moved_in_replicas(node) {
                if excess == 0 {
                    break;
                }
                if placement.replica(r).is_in_build() {
                    invalid.insert(r);
                    excess -= 1;
                }
            }
        }
        invalid
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for ThrottlingConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Throttling
    }

    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) {
        let placement = solution.placement();
        if !placement.replica(replica).is_in_build() {
            return;
        }
        let base = solution.base_node(replica);
        let current = solution.current_node(replica);
        candidates.filter(|node| {
            if Some(node) == base {
                return true;
            }
            let n = placement.node(node);
            if !n.is_throttled() {
                return true;
            }
            let cap = n.max_concurrent_builds().unwrap_or(usize::MAX);
            let mut count = solution.in_build_count(node);
            if Some(node) == current {
                count = count.saturating_sub(1);
            }
            count < cap
        });
    }
}
