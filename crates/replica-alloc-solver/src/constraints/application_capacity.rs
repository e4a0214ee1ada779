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

//! Application-scoped capacities: a cap on the application's total load
//! across the cluster and a cap on its load per node. During a singleton
//! upgrade the standby load about to be replaced is discounted, so the
//! replacement can land where the standby still sits.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_core::prelude::LoadEntry;
use replica_alloc_model::prelude::{
    ApplicationIndex, NodeIndex, ReplicaIndex, ReplicaRole,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct ApplicationCapacityConstraint {
    priority: i32,
}

impl ApplicationCapacityConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Standby load of in-upgrade partitions of `app` on `node`; in
    /// relaxed checks this much per-node load is forgiven.
    fn upgrade_standby_discount(
        solution: &TempSolution<'_>,
        app: ApplicationIndex,
        node: NodeIndex,
    ) -> LoadEntry {
        let placement = solution.placement();
        let mut discount = LoadEntry::zeroed(placement.metric_count());
        for &p in placement.partitions_of_application(app) {
            if !placement.partition(p).is_in_upgrade() {
                continue;
            }
            for &r in placement.partition(p).replicas() {
                if solution.current_role(r) == ReplicaRole::StandBy
                    && solution.current_node(r) == Some(node)
                {
                    discount += placement.replica(r).load();
                }
            }
        }
        discount
    }

    /// Per-node overage of `app` on `node`, summed over metrics.
    fn node_overage(
        solution: &TempSolution<'_>,
        app: ApplicationIndex,
        node: NodeIndex,
        ctx: CheckContext,
    ) -> i64 {
        let placement = solution.placement();
        let entry = placement.application(app);
        if !entry.has_per_node_capacity() {
            return 0;
        }
        let Some(load) = solution.app_node_load(app, node) else {
            return 0;
        };
        let mut load = load.clone();
        if ctx.relaxed {
            load -= &Self::upgrade_standby_discount(solution, app, node);
        }
        let caps = entry.per_node_capacity();
        let base = ctx.relaxed.then(|| solution.base_app_node_load(app, node));
        let mut over = 0i64;
        for m in 0..load.len() {
            let mut cap = caps.get(m);
            if cap < 0 {
                continue;
            }
            if let Some(Some(base)) = &base {
                cap = cap.max(base.get(m));
            }
            if load.get(m) > cap {
                over += load.get(m) - cap;
            }
        }
        over.max(0)
    }

    /// Cluster-wide overage of `app`, summed over metrics.
    fn total_overage(
        solution: &TempSolution<'_>,
        app: ApplicationIndex,
        ctx: CheckContext,
    ) -> i64 {
        let entry = solution.placement().application(app);
        if !entry.has_total_capacity() {
            return 0;
        }
        let Some(load) = solution.app_total_load(app) else {
            return 0;
        };
        let caps = entry.total_capacity();
        let base = ctx.relaxed.then(|| solution.base_app_total_load(app));
        let mut over = 0i64;
        for m in 0..load.len() {
            let mut cap = caps.get(m);
            if cap < 0 {
                continue;
            }
            if let Some(Some(base)) = &base {
                cap = cap.max(base.get(m));
            }
            if load.get(m) > cap {
                over += load.get(m) - cap;
            }
        }
        over
    }

    /// All per-node overages, total-capacity excess charged to the
    /// application's most loaded node.
    fn violating_nodes(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeMap<NodeIndex, i64> {
        let placement = solution.placement();
        let mut violating: BTreeMap<NodeIndex, i64> = BTreeMap::new();
        for app in placement.application_indices() {
            let nodes = solution.app_nodes(app);
            for &node in &nodes {
                if ctx.changed_only && !solution.changed_nodes().contains(&node) {
                    continue;
                }
                let over = Self::node_overage(solution, app, node, ctx);
                if over > 0 {
                    *violating.entry(node).or_insert(0) += over;
                }
            }
            let total_over = Self::total_overage(solution, app, ctx);
            if total_over > 0 {
                let heaviest = nodes.iter().copied().max_by_key(|&n| {
                    solution
                        .app_node_load(app, n)
                        .map(|l| l.iter().sum::<i64>())
                        .unwrap_or(0)
                });
                if let Some(node) = heaviest {
                    *violating.entry(node).or_insert(0) += total_over;
                }
            }
        }
        violating
    }

    /// Movable replicas of `app` on `node`, heaviest first, until their
    /// combined load covers the overage.
    fn evict_until_cleared(
        solution: &TempSolution<'_>,
        app: ApplicationIndex,
        node: NodeIndex,
        mut overage: i64,
    ) -> Vec<ReplicaIndex> {
        let placement = solution.placement();
        let mut members: Vec<ReplicaIndex> = solution
            .replicas_on_node(node)
            .iter()
            .copied()
            .filter(|&r| {
                placement.replica(r).is_movable()
                    && placement.service_of_replica(r).application() == Some(app)
            })
            .collect();
        members.sort_by_key(|&r| std::cmp::Reverse(placement.replica(r).load().iter().sum::<i64>()));
        let mut picked = Vec::new();
        for r in members {
            if overage <= 0 {
                break;
            }
            overage -= placement.replica(r).load().iter().sum::<i64>();
            picked.push(r);
        }
        picked
    }
}

impl Constraint for ApplicationCapacityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ApplicationCapacity
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
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut invalid = BTreeSet::new();
        for app in placement.application_indices() {
            for node in solution.app_nodes(app) {
                let over = Self::node_overage(solution, app, node, ctx);
                if over > 0 {
                    invalid.extend(Self::evict_until_cleared(solution, app, node, over));
                }
            }
            let total_over = Self::total_overage(solution, app, ctx);
            if total_over > 0 {
                // Shed from the most loaded nodes until the total fits.
                let mut remaining = total_over;
                let mut nodes = solution.app_nodes(app);
                nodes.sort_by_key(|&n| {
                    std::cmp::Reverse(
                        solution
                            .app_node_load(app, n)
                            .map(|l| l.iter().sum::<i64>())
                            .unwrap_or(0),
                    )
                });
                for node in nodes {
                    if remaining <= 0 {
                        break;
                    }
                    let picked = Self::evict_until_cleared(solution, app, node, remaining);
                    for &r in &picked {
                        remaining -= placement.replica(r).load().iter().sum::<i64>();
                    }
                    invalid.extend(picked);
                }
            }
        }
        invalid
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }

    fn allows_correction_by_swap(&self) -> bool {
        true
    }
}

impl Subspace for ApplicationCapacityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ApplicationCapacity
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
        let Some(app) = placement.service_of_replica(replica).application() else {
            return;
        };
        let entry = placement.application(app);
        let r = placement.replica(replica);
        let current = solution.current_node(replica);

        // A new replica pushes the application total; movements do not.
        if r.is_new() && entry.has_total_capacity() {
            let total = solution
                .app_total_load(app)
                .cloned()
                .unwrap_or_else(|| LoadEntry::zeroed(placement.metric_count()));
            let caps = entry.total_capacity();
            for m in 0..total.len() {
                let cap = caps.get(m);
                if cap >= 0 && total.get(m) + r.load().get(m) > cap {
                    candidates.filter(|_| false);
                    return;
                }
            }
        }

        if !entry.has_per_node_capacity() {
            return;
        }
        candidates.filter(|node| {
            if Some(node) == current {
                return true;
            }
            let mut load = solution
                .app_node_load(app, node)
                .cloned()
                .unwrap_or_else(|| LoadEntry::zeroed(placement.metric_count()));
            if ctx.relaxed {
                load -= &Self::upgrade_standby_discount(solution, app, node);
            }
            let caps = entry.per_node_capacity();
            for m in 0..load.len() {
                let mut cap = caps.get(m);
                if cap < 0 {
                    continue;
                }
                if ctx.relaxed {
                    if let Some(base) = solution.base_app_node_load(app, node) {
                        cap = cap.max(base.get(m));
                    }
                }
                if load.get(m) + r.load().get(m) > cap {
                    return false;
                }
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{
        ApplicationSpec, NodeSpec, PartitionIndex, PartitionSpec, ReplicaSpec, ServiceSpec,
    };

    /// App capped at 5 per node and 12 total; two partitions with one
    /// replica of load 4 each on nodes 0 and 1.
    fn capped_app_cluster() -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        for id in 0..3 {
            b.add_node(NodeSpec::new(id, vec![100])).unwrap();
        }
        let app = b
            .add_application(
                ApplicationSpec::new("app")
                    .with_per_node_capacity(vec![5])
                    .with_total_capacity(vec![12]),
            )
            .unwrap();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_application(app))
            .unwrap();
        for id in 0..2 {
            b.add_partition(PartitionSpec::new(id, svc, 1).with_replica(
                ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(id as usize))
                    .with_load(vec![4]),
            ))
            .unwrap();
        }
        b.build().unwrap()
    }

    #[test]
    fn test_within_app_capacity_is_clean() {
        let placement = capped_app_cluster();
        let solution = TempSolution::new(&placement, None);
        let c = ApplicationCapacityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
    }

    #[test]
    fn test_per_node_cap_violated_by_stacking() {
        let placement = capped_app_cluster();
        let mut solution = TempSolution::new(&placement, None);
        let second = placement.partition(PartitionIndex::new(1)).replicas()[0];
        solution.move_replica(second, NodeIndex::new(0)); // 8 of 5 on node 0

        let c = ApplicationCapacityConstraint::new(0);
        let Some(Violation::NodeLoad(map)) =
            c.get_violations(&solution, CheckContext::strict())
        else {
            panic!("expected a node load violation");
        };
        assert_eq!(map.get(&NodeIndex::new(0)), Some(&3));

        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_subspace_blocks_nodes_at_per_node_cap() {
        let placement = capped_app_cluster();
        let solution = TempSolution::new(&placement, None);
        let second = placement.partition(PartitionIndex::new(1)).replicas()[0];
        let c = ApplicationCapacityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, second, &mut candidates, CheckContext::strict(), &mut rng);
        // Node 0 already holds 4 of 5; adding 4 more would not fit. The
        // replica's own node and the empty node stay.
        assert!(!candidates.check(NodeIndex::new(0)));
        assert!(candidates.check(NodeIndex::new(1)));
        assert!(candidates.check(NodeIndex::new(2)));
    }

    #[test]
    fn test_total_capacity_blocks_new_replicas_everywhere() {
        let mut b = testkit::builder(1);
        for id in 0..2 {
            b.add_node(NodeSpec::new(id, vec![100])).unwrap();
        }
        let app = b
            .add_application(ApplicationSpec::new("app").with_total_capacity(vec![5]))
            .unwrap();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_application(app))
            .unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(
                    ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0))
                        .with_load(vec![4]),
                )
                .with_replica(ReplicaSpec::new_replica(ReplicaRole::Secondary).with_load(vec![4])),
        )
        .unwrap();
        let placement = b.build().unwrap();
        let solution = TempSolution::new(&placement, None);
        let new_replica = placement.partition(PartitionIndex::new(0)).replicas()[1];

        let c = ApplicationCapacityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, new_replica, &mut candidates, CheckContext::strict(), &mut rng);
        assert!(candidates.is_empty());
    }
}
