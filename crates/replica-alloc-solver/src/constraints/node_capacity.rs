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

//! Per-node multi-metric capacity. The load a node is charged with is
//! its replica and package load plus the load still disappearing from it
//! plus the unused remainders of application reservations. A negative
//! capacity entry means the metric is unlimited on that node.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use replica_alloc_core::prelude::LoadEntry;
use replica_alloc_model::prelude::{NodeIndex, ReplicaIndex};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct NodeCapacityConstraint {
    priority: i32,
}

impl NodeCapacityConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Full charged load of `node`. With `move_in_only`, overlay changes
    /// that moved load *off* the node are ignored (the transient-
    /// overcommit view: departing load may still be there).
    fn charged_load(solution: &TempSolution<'_>, node: NodeIndex, move_in_only: bool) -> LoadEntry {
        let mut load = if move_in_only {
            solution.move_in_only_node_load(node)
        } else {
            solution.node_load(node).clone()
        };
        load += solution.placement().node(node).should_disappear_loads();
        load += &solution.application_reserved_load(node);
        load
    }

    /// Base-solution charged load, used to relax capacities so layouts
    /// that arrived overcommitted are not churned further.
    fn base_charged_load(solution: &TempSolution<'_>, node: NodeIndex) -> LoadEntry {
        let mut load = solution.base_node_load(node).clone();
        load += solution.placement().node(node).should_disappear_loads();
        load += &solution.base_application_reserved_load(node);
        load
    }

    /// Per-metric overage of `node`, zero-length when within capacity.
    fn node_overage(
        solution: &TempSolution<'_>,
        node: NodeIndex,
        ctx: CheckContext,
    ) -> Option<i64> {
        let load = Self::charged_load(solution, node, false);
        let capacities = solution
            .placement()
            .node(node)
            .capacities(ctx.use_buffered_capacity);
        let base = ctx
            .relaxed
            .then(|| Self::base_charged_load(solution, node));
        let mut over = 0i64;
        for m in 0..load.len() {
            let mut cap = capacities.get(m);
            if cap < 0 {
                continue;
            }
            if let Some(base) = &base {
                cap = cap.max(base.get(m));
            }
            if load.get(m) > cap {
                over += load.get(m) - cap;
            }
        }
        (over > 0).then_some(over)
    }

    fn violating_nodes(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeMap<NodeIndex, i64> {
        let mut violating = BTreeMap::new();
        let nodes: Vec<NodeIndex> = if ctx.changed_only {
            solution.changed_nodes().iter().copied().collect()
        } else {
            solution.placement().up_node_indices().collect()
        };
        for node in nodes {
            if let Some(over) = Self::node_overage(solution, node, ctx) {
                violating.insert(node, over);
            }
        }
        violating
    }

    /// Whether evicting `group` from `node` brings it within capacity.
    /// Evaluated through trial changes so package footprints and
    /// reservation remainders adjust exactly as a real eviction would.
    fn group_clears_node(
        solution: &mut TempSolution<'_>,
        node: NodeIndex,
        group: &[ReplicaIndex],
        ctx: CheckContext,
    ) -> bool {
        let mut trials = Vec::with_capacity(group.len());
        for &r in group {
            trials.push(solution.try_change(r, None));
        }
        let clear = Self::node_overage(solution, node, ctx).is_none();
        for trial in trials.into_iter().rev() {
            solution.undo_change(trial);
        }
        clear
    }

    /// Movable replicas on `node`, replicas moved in during this run
    /// first when transient overcommit is being prevented.
    fn eviction_candidates(
        solution: &TempSolution<'_>,
        node: NodeIndex,
    ) -> Vec<ReplicaIndex> {
        let placement = solution.placement();
        let mut candidates: Vec<ReplicaIndex> = solution
            .replicas_on_node(node)
            .iter()
            .copied()
            .filter(|&r| placement.replica(r).is_movable())
            .collect();
        if placement.settings().prevent_transient_overcommit {
            candidates.sort_by_key(|&r| solution.base_node(r) == Some(node));
        }
        candidates
    }

    /// The smallest eviction that clears one node: a single replica,
    /// else one whole application (dropping its reservation remainder
    /// with it), else one whole service package, else a greedy
    /// largest-first sweep.
    fn invalid_replicas_of_node(
        &self,
        solution: &mut TempSolution<'_>,
        node: NodeIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> Vec<ReplicaIndex> {
        let placement = solution.placement();
        let candidates = Self::eviction_candidates(solution, node);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut sufficient: Vec<ReplicaIndex> = Vec::new();
        for &r in &candidates {
            if Self::group_clears_node(solution, node, &[r], ctx) {
                sufficient.push(r);
            }
        }
        if !sufficient.is_empty() {
            return vec![sufficient[rng.gen_range(0..sufficient.len())]];
        }

        // Whole-application eviction, only when every replica of the
        // application on this node is movable.
        let mut apps: BTreeMap<usize, Vec<ReplicaIndex>> = BTreeMap::new();
        for &r in solution.replicas_on_node(node).iter() {
            if let Some(app) = placement.service_of_replica(r).application() {
                apps.entry(app.get()).or_default().push(r);
            }
        }
        for group in apps.values() {
            if group.iter().all(|&r| placement.replica(r).is_movable())
                && Self::group_clears_node(solution, node, group, ctx)
            {
                return group.clone();
            }
        }

        let mut packages: BTreeMap<usize, Vec<ReplicaIndex>> = BTreeMap::new();
        for &r in solution.replicas_on_node(node).iter() {
            if let Some(sp) = placement.service_of_replica(r).service_package() {
                packages.entry(sp.get()).or_default().push(r);
            }
        }
        for group in packages.values() {
            if group.iter().all(|&r| placement.replica(r).is_movable())
                && Self::group_clears_node(solution, node, group, ctx)
            {
                return group.clone();
            }
        }

        // Largest movers first until the node clears (or we run out).
        let mut ordered = candidates;
        ordered.sort_by_key(|&r| {
            std::cmp::Reverse(placement.replica(r).load().iter().sum::<i64>())
        });
        let mut picked = Vec::new();
        for &r in &ordered {
            picked.push(r);
            if Self::group_clears_node(solution, node, &picked, ctx) {
                break;
            }
        }
        picked
    }

    /// Eviction search needs `&mut` for its trial changes; the public
    /// trait surface stays `&` by cloning the overlay once per call.
    fn find_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let mut scratch = solution.clone();
        let mut invalid = BTreeSet::new();
        for node in self.violating_nodes(solution, ctx).keys() {
            invalid.extend(self.invalid_replicas_of_node(&mut scratch, *node, ctx, rng));
        }
        invalid
    }
}

impl Constraint for NodeCapacityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::NodeCapacity
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let violating = self.violating_nodes(solution, ctx);
        (!violating.is_empty()).then(|| Violation::NodeLoad(violating))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        self.find_invalid_replicas(solution, ctx, rng)
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }

    fn allows_correction_by_swap(&self) -> bool {
        true
    }
}

impl Subspace for NodeCapacityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::NodeCapacity
    }

    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) {
        let placement = solution.placement();
        let r = placement.replica(replica);
        let current = solution.current_node(replica);
        let pto = placement.settings().prevent_transient_overcommit;
        let sp = placement.service_of_replica(replica).service_package();

        candidates.filter(|node| {
            if Some(node) == current {
                return true;
            }
            let foreign = solution.base_node(replica) != Some(node);
            let mut load = Self::charged_load(solution, node, pto && foreign);
            load += r.load();
            if let Some(sp) = sp {
                if solution.service_package_count(sp, node) == 0 {
                    load += placement.service_package(sp).node_load();
                }
            }
            let capacities = placement.node(node).capacities(ctx.use_buffered_capacity);
            let base = ctx.relaxed.then(|| Self::base_charged_load(solution, node));
            for m in 0..load.len() {
                let mut cap = capacities.get(m);
                if cap < 0 {
                    continue;
                }
                if let Some(base) = &base {
                    cap = cap.max(base.get(m));
                }
                if load.get(m) > cap {
                    return false;
                }
            }
            true
        });
    }

    fn get_nodes_for_replica_drop(
        &self,
        solution: &TempSolution<'_>,
        _partition: replica_alloc_model::prelude::PartitionIndex,
        candidates: &mut NodeSet<'_>,
    ) {
        // Prefer dropping from nodes that are over capacity.
        let mut narrowed = candidates.clone();
        narrowed.filter(|node| {
            Self::node_overage(solution, node, CheckContext::strict()).is_some()
        });
        if !narrowed.is_empty() {
            *candidates = narrowed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{PartitionIndex, ReplicaRole};

    #[test]
    fn test_within_capacity_is_clean() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let solution = TempSolution::new(&placement, None);
        let c = NodeCapacityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
    }

    #[test]
    fn test_overloaded_node_reports_overage() {
        let placement = testkit::cluster_with_partition(3, &[10], 3, 6);
        let mut solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        solution.move_replica(replicas[1], NodeIndex::new(0));

        let c = NodeCapacityConstraint::new(0);
        let violation = c.get_violations(&solution, CheckContext::strict());
        let Some(Violation::NodeLoad(map)) = violation else {
            panic!("expected a node load violation");
        };
        assert_eq!(map.get(&NodeIndex::new(0)), Some(&2)); // 12 load vs 10 cap
    }

    #[test]
    fn test_single_replica_eviction_preferred() {
        let placement = testkit::cluster_with_partition(3, &[10], 3, 6);
        let mut solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        solution.move_replica(replicas[1], NodeIndex::new(0));

        let c = NodeCapacityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        // Removing either replica clears the node; exactly one is picked.
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_eviction_trials_leave_solution_untouched() {
        let placement = testkit::cluster_with_partition(3, &[10], 3, 6);
        let mut solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        solution.move_replica(replicas[1], NodeIndex::new(0));
        let before = solution.node_load(NodeIndex::new(0)).clone();

        let c = NodeCapacityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let _ = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(solution.node_load(NodeIndex::new(0)), &before);
    }

    #[test]
    fn test_subspace_excludes_full_nodes() {
        let placement = testkit::cluster_with_partition(3, &[10], 3, 6);
        let solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let c = NodeCapacityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, replicas[0], &mut candidates, CheckContext::strict(), &mut rng);
        // Every other node already carries 6 of 10; another 6 cannot fit.
        assert_eq!(
            candidates.iter().collect::<Vec<_>>(),
            vec![NodeIndex::new(0)]
        );
    }

    #[test]
    fn test_relaxed_capacity_grandfathers_base_overload() {
        // Node 0 starts over capacity (load 12 on cap 10).
        let mut b = testkit::builder(1);
        b.add_node(replica_alloc_model::prelude::NodeSpec::new(0, vec![10])).unwrap();
        let svc = b
            .add_service(replica_alloc_model::prelude::ServiceSpec::new("svc"))
            .unwrap();
        b.add_partition(
            replica_alloc_model::prelude::PartitionSpec::new(0, svc, 2)
                .with_replica(
                    replica_alloc_model::prelude::ReplicaSpec::existing(
                        ReplicaRole::Primary,
                        NodeIndex::new(0),
                    )
                    .with_load(vec![6]),
                )
                .with_replica(
                    replica_alloc_model::prelude::ReplicaSpec::existing(
                        ReplicaRole::Secondary,
                        NodeIndex::new(0),
                    )
                    .with_load(vec![6]),
                ),
        )
        .unwrap();
        let placement = b.build().unwrap();
        let solution = TempSolution::new(&placement, None);
        let c = NodeCapacityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_some());
        assert!(c.get_violations(&solution, CheckContext::relaxed()).is_none());
    }

    #[test]
    fn test_reservation_remainder_counts_against_capacity() {
        let placement = testkit::cluster_with_reserving_app(2, &[8], 6, 2);
        let solution = TempSolution::new(&placement, None);
        // Node 0: replica load 2 + reservation remainder 4 = 6 of 8.
        let c = NodeCapacityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
        assert_eq!(
            NodeCapacityConstraint::charged_load(&solution, NodeIndex::new(0), false).get(0),
            6
        );
    }
}
