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

//! Scaleout counts: an application with a scaleout count of `k` may
//! occupy at most `k` distinct nodes.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{ApplicationIndex, NodeIndex, ReplicaIndex};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct ScaleoutCountConstraint {
    priority: i32,
}

impl ScaleoutCountConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Nodes the application occupied before this run.
    fn base_nodes(solution: &TempSolution<'_>, app: ApplicationIndex) -> BTreeSet<NodeIndex> {
        let placement = solution.placement();
        let mut nodes = BTreeSet::new();
        for &p in placement.partitions_of_application(app) {
            for &r in placement.partition(p).replicas() {
                if let Some(node) = solution.base_node(r) {
                    nodes.insert(node);
                }
            }
        }
        nodes
    }

    /// Whether scaleout is waived for `app` right now: any of its
    /// partitions in upgrade, with the relaxation enabled.
    fn relaxed_for_upgrade(solution: &TempSolution<'_>, app: ApplicationIndex) -> bool {
        let placement = solution.placement();
        placement.settings().relax_scaleout_constraint_during_upgrade
            && placement
                .partitions_of_application(app)
                .iter()
                .any(|&p| placement.partition(p).is_in_upgrade())
    }

    fn overage(solution: &TempSolution<'_>, app: ApplicationIndex) -> Option<(usize, Vec<NodeIndex>)> {
        let target = solution.placement().application(app).scaleout_count()?;
        if Self::relaxed_for_upgrade(solution, app) {
            return None;
        }
        let nodes = solution.app_nodes(app);
        (nodes.len() > target).then(|| (nodes.len() - target, nodes))
    }
}

impl Constraint for ScaleoutCountConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ScaleoutCount
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let placement = solution.placement();
        let mut map = BTreeMap::new();
        for app in placement.application_indices() {
            if let Some((over, nodes)) = Self::overage(solution, app) {
                if ctx.changed_only
                    && !nodes.iter().any(|n| solution.changed_nodes().contains(n))
                {
                    continue;
                }
                map.insert(app, over as i64);
            }
        }
        (!map.is_empty()).then(|| Violation::ScaleoutCount(map))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut invalid = BTreeSet::new();
        for app in placement.application_indices() {
            let Some((mut over, nodes)) = Self::overage(solution, app) else {
                continue;
            };
            let base = Self::base_nodes(solution, app);
            // Vacate nodes the application spread onto during this run
            // first; base nodes only when that is not enough.
            let mut surplus: Vec<NodeIndex> = nodes
                .iter()
                .copied()
                .filter(|n| !base.contains(n))
                .collect();
            surplus.extend(nodes.iter().copied().filter(|n| base.contains(n)));
            for node in surplus {
                if over == 0 {
                    break;
                }
                let members: Vec<ReplicaIndex> = solution
                    .replicas_on_node(node)
                    .iter()
                    .copied()
                    .filter(|&r| {
                        placement.replica(r).is_movable()
                            && placement.service_of_replica(r).application() == Some(app)
                    })
                    .collect();
                if members.is_empty() {
                    continue;
                }
                invalid.extend(members);
                over -= 1;
            }
        }
        invalid
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for ScaleoutCountConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ScaleoutCount
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
        let Some(app) = placement.service_of_replica(replica).application() else {
            return;
        };
        let Some(target) = placement.application(app).scaleout_count() else {
            return;
        };
        if Self::relaxed_for_upgrade(solution, app) {
            return;
        }
        let occupied = solution.app_nodes(app);
        // Below the cap any node works. At the cap, confine the replica
        // to nodes the application already occupies. A replica that is
        // its node's sole member of the application may also leave for a
        // fresh node without widening the spread, but keeping to the
        // occupied set is always safe.
        if occupied.len() < target {
            return;
        }
        let occupied: BTreeSet<NodeIndex> = occupied.into_iter().collect();
        candidates.filter(|node| occupied.contains(&node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{
        ApplicationSpec, NodeSpec, PartitionIndex, PartitionSpec, ReplicaRole, ReplicaSpec,
        ServiceSpec,
    };

    /// App limited to 2 nodes; three single-replica partitions on nodes
    /// 0, 0 and 1.
    fn scaleout_cluster() -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        for id in 0..4 {
            b.add_node(NodeSpec::new(id, vec![100])).unwrap();
        }
        let app = b
            .add_application(ApplicationSpec::new("app").with_scaleout(2))
            .unwrap();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_application(app))
            .unwrap();
        for (id, node) in [(0, 0usize), (1, 0), (2, 1)] {
            b.add_partition(PartitionSpec::new(id, svc, 1).with_replica(
                ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(node)),
            ))
            .unwrap();
        }
        b.build().unwrap()
    }

    #[test]
    fn test_within_scaleout_is_clean() {
        let placement = scaleout_cluster();
        let solution = TempSolution::new(&placement, None);
        let c = ScaleoutCountConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
    }

    #[test]
    fn test_spreading_past_the_cap_is_reported() {
        let placement = scaleout_cluster();
        let mut solution = TempSolution::new(&placement, None);
        let second = placement.partition(PartitionIndex::new(1)).replicas()[0];
        solution.move_replica(second, NodeIndex::new(2)); // third distinct node

        let c = ScaleoutCountConstraint::new(0);
        let Some(Violation::ScaleoutCount(map)) =
            c.get_violations(&solution, CheckContext::strict())
        else {
            panic!("expected a scaleout violation");
        };
        assert_eq!(map.len(), 1);
        assert_eq!(*map.values().next().unwrap(), 1);
    }

    #[test]
    fn test_invalid_replicas_prefer_newly_occupied_nodes() {
        let placement = scaleout_cluster();
        let mut solution = TempSolution::new(&placement, None);
        let second = placement.partition(PartitionIndex::new(1)).replicas()[0];
        solution.move_replica(second, NodeIndex::new(2));

        let c = ScaleoutCountConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid, BTreeSet::from([second]));
    }

    #[test]
    fn test_subspace_confines_to_occupied_nodes_at_cap() {
        let placement = scaleout_cluster();
        let solution = TempSolution::new(&placement, None);
        let second = placement.partition(PartitionIndex::new(1)).replicas()[0];

        let c = ScaleoutCountConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, second, &mut candidates, CheckContext::strict(), &mut rng);
        assert!(candidates.check(NodeIndex::new(0)));
        assert!(candidates.check(NodeIndex::new(1)));
        assert!(!candidates.check(NodeIndex::new(2)));
        assert!(!candidates.check(NodeIndex::new(3)));
    }
}
