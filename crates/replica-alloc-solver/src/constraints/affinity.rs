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

//! Child/parent co-location. A child service's replicas must share nodes
//! with the replicas of its affinity parent's partition; aligned affinity
//! additionally pins the child primary to the parent primary's node.
//!
//! This constraint runs last: parent partitions place without any
//! affinity restriction, and the children (or, when permitted, the
//! parents) are pulled together afterwards.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{NodeIndex, PartitionIndex, ReplicaIndex, ReplicaRole};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct AffinityConstraint {
    priority: i32,
}

impl AffinityConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Nodes currently hosting the parent partition, and the parent
    /// primary's node for aligned placement.
    fn parent_nodes(
        solution: &TempSolution<'_>,
        parent: PartitionIndex,
    ) -> (BTreeSet<NodeIndex>, Option<NodeIndex>) {
        let placement = solution.placement();
        let mut nodes = BTreeSet::new();
        let mut primary = None;
        for &r in placement.partition(parent).replicas() {
            let Some(node) = solution.current_node(r) else {
                continue;
            };
            nodes.insert(node);
            if solution.current_role(r) == ReplicaRole::Primary {
                primary = Some(node);
            }
        }
        (nodes, primary)
    }

    /// Upgrade waiver: a child whose own or parent partition is mid
    /// upgrade is left alone when the relaxation is enabled.
    fn relaxed_for_upgrade(
        solution: &TempSolution<'_>,
        child: PartitionIndex,
        parent: PartitionIndex,
    ) -> bool {
        let placement = solution.placement();
        placement.settings().relax_affinity_constraint_during_upgrade
            && (placement.partition(child).is_in_upgrade()
                || placement.partition(parent).is_in_upgrade())
    }

    /// The target node set for `replica` under the affinity rule, or
    /// `None` when affinity does not bind it right now.
    fn required_nodes(
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
    ) -> Option<BTreeSet<NodeIndex>> {
        let placement = solution.placement();
        let child = placement.replica(replica).partition();
        let parent = placement.partition(child).parent_partition()?;
        if Self::relaxed_for_upgrade(solution, child, parent) {
            return None;
        }
        let (nodes, primary) = Self::parent_nodes(solution, parent);
        if nodes.is_empty() {
            return None;
        }
        let service = placement.service_of_replica(replica);
        let aligned = service.aligned_affinity()
            && placement.settings().check_aligned_affinity_for_upgrade;
        if aligned && solution.current_role(replica) == ReplicaRole::Primary {
            return primary.map(|n| BTreeSet::from([n]));
        }
        Some(nodes)
    }

    /// Placed child replicas sitting away from every parent node.
    fn misplaced_children(
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut misplaced = BTreeSet::new();
        for (idx, r) in placement.replicas().iter().enumerate() {
            let replica = ReplicaIndex::new(idx);
            let Some(node) = solution.current_node(replica) else {
                continue;
            };
            if ctx.changed_only {
                let child = r.partition();
                let parent = placement.partition(child).parent_partition();
                let touched = solution.changed_partitions().contains(&child)
                    || parent.is_some_and(|p| solution.changed_partitions().contains(&p));
                if !touched {
                    continue;
                }
            }
            let Some(required) = Self::required_nodes(solution, replica) else {
                continue;
            };
            if required.contains(&node) {
                continue;
            }
            // A replica that already sat detached in the base stays
            // grandfathered under relaxed checks.
            if ctx.relaxed && solution.base_node(replica) == Some(node) {
                continue;
            }
            misplaced.insert(replica);
        }
        misplaced
    }
}

impl Constraint for AffinityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Affinity
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let misplaced = Self::misplaced_children(solution, ctx);
        (!misplaced.is_empty()).then(|| Violation::ReplicaSet(misplaced))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let settings = placement.settings();
        let misplaced = Self::misplaced_children(solution, ctx);
        if !solution.allow_parent_to_move() || !settings.move_parent_to_fix_affinity_violation {
            return misplaced;
        }
        // Occasionally fix a violation from the parent's side instead;
        // the transition percentage time-boxes how often.
        let mut invalid = BTreeSet::new();
        for replica in misplaced {
            let child = placement.replica(replica).partition();
            let parent = placement.partition(child).parent_partition();
            let move_parent = rng
                .gen_bool(settings.move_parent_to_fix_affinity_violation_transition_percentage);
            match parent {
                Some(parent) if move_parent => {
                    invalid.extend(
                        placement
                            .partition(parent)
                            .replicas()
                            .iter()
                            .copied()
                            .filter(|&r| placement.replica(r).is_movable()),
                    );
                }
                _ => {
                    invalid.insert(replica);
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

impl Subspace for AffinityConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Affinity
    }

    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) {
        if let Some(required) = Self::required_nodes(solution, replica) {
            candidates.filter(|node| required.contains(&node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{
        NodeSpec, PartitionIndex, PartitionSpec, Placement, ReplicaSpec, ServiceSpec,
    };

    /// Parent partition on nodes {0, 1} (primary on 0), one child
    /// replica, placed on `child_node` or left as a creation.
    fn affinity_cluster(child_node: Option<usize>, aligned: bool) -> Placement {
        let mut b = testkit::builder(1);
        for id in 0..3 {
            b.add_node(NodeSpec::new(id, vec![100])).unwrap();
        }
        let parent_svc = b.add_service(ServiceSpec::new("parent")).unwrap();
        let mut child_spec = ServiceSpec::new("child").with_affinity_parent(parent_svc);
        if aligned {
            child_spec = child_spec.aligned();
        }
        let child_svc = b.add_service(child_spec).unwrap();
        b.add_partition(
            PartitionSpec::new(0, parent_svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
        )
        .unwrap();
        let child_replica = match child_node {
            Some(node) => ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(node)),
            None => ReplicaSpec::new_replica(ReplicaRole::Primary),
        };
        b.add_partition(PartitionSpec::new(1, child_svc, 1).with_replica(child_replica))
            .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_colocated_child_is_clean() {
        let placement = affinity_cluster(Some(1), false);
        let solution = TempSolution::new(&placement, None);
        let c = AffinityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
    }

    #[test]
    fn test_detached_child_is_reported() {
        let placement = affinity_cluster(Some(2), false);
        let solution = TempSolution::new(&placement, None);
        let child = placement.partition(PartitionIndex::new(1)).replicas()[0];
        let c = AffinityConstraint::new(0);
        let Some(Violation::ReplicaSet(set)) = c.get_violations(&solution, CheckContext::strict())
        else {
            panic!("expected a replica set violation");
        };
        assert_eq!(set, BTreeSet::from([child]));
    }

    #[test]
    fn test_relaxed_grandfathers_detached_base_placement() {
        let placement = affinity_cluster(Some(2), false);
        let solution = TempSolution::new(&placement, None);
        let c = AffinityConstraint::new(0);
        assert!(c.get_violations(&solution, CheckContext::relaxed()).is_none());
    }

    #[test]
    fn test_subspace_narrows_to_parent_nodes() {
        let placement = affinity_cluster(None, false);
        let solution = TempSolution::new(&placement, None);
        let child = placement.partition(PartitionIndex::new(1)).replicas()[0];
        let c = AffinityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, child, &mut candidates, CheckContext::strict(), &mut rng);
        assert!(candidates.check(NodeIndex::new(0)));
        assert!(candidates.check(NodeIndex::new(1)));
        assert!(!candidates.check(NodeIndex::new(2)));
    }

    #[test]
    fn test_aligned_primary_pins_to_parent_primary() {
        let placement = affinity_cluster(None, true);
        let solution = TempSolution::new(&placement, None);
        let child = placement.partition(PartitionIndex::new(1)).replicas()[0];
        let c = AffinityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, child, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![NodeIndex::new(0)]);
    }

    #[test]
    fn test_parent_side_fix_when_allowed() {
        let mut builder = testkit::builder_with(1, {
            let mut s = replica_alloc_model::prelude::PlbSettings::default();
            s.move_parent_to_fix_affinity_violation = true;
            s.move_parent_to_fix_affinity_violation_transition_percentage = 1.0;
            s
        });
        for id in 0..3 {
            builder.add_node(NodeSpec::new(id, vec![100])).unwrap();
        }
        let parent_svc = builder.add_service(ServiceSpec::new("parent")).unwrap();
        let child_svc = builder
            .add_service(ServiceSpec::new("child").with_affinity_parent(parent_svc))
            .unwrap();
        builder
            .add_partition(PartitionSpec::new(0, parent_svc, 1).with_replica(
                ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)),
            ))
            .unwrap();
        builder
            .add_partition(PartitionSpec::new(1, child_svc, 1).with_replica(
                ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(2)),
            ))
            .unwrap();
        let placement = builder.build().unwrap();
        let mut solution = TempSolution::new(&placement, None);
        solution.set_allow_parent_to_move(true);
        let parent = placement.partition(PartitionIndex::new(0)).replicas()[0];

        let c = AffinityConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid, BTreeSet::from([parent]));
    }
}
