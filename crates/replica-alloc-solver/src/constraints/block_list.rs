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

//! Service node block lists: a service may bar nodes outright, and bar
//! further nodes for its primaries only.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{ReplicaIndex, ReplicaRole};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct PlacementConstraint {
    priority: i32,
}

impl PlacementConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    fn blocked_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut invalid = BTreeSet::new();
        for r in placement.replicas() {
            let Some(node) = solution.current_node(r.index()) else {
                continue;
            };
            if ctx.changed_only && !solution.changed_nodes().contains(&node) {
                continue;
            }
            let is_primary = solution.current_role(r.index()) == ReplicaRole::Primary;
            if placement
                .service_of_replica(r.index())
                .is_node_blocked(node, is_primary)
            {
                invalid.insert(r.index());
            }
        }
        invalid
    }
}

impl Constraint for PlacementConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::PlacementConstraint
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let invalid = self.blocked_replicas(solution, ctx);
        (!invalid.is_empty()).then(|| Violation::ReplicaSet(invalid))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        self.blocked_replicas(solution, ctx)
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for PlacementConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::PlacementConstraint
    }

    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) {
        let service = solution.placement().service_of_replica(replica);
        let is_primary = solution.current_role(replica) == ReplicaRole::Primary;
        candidates.filter(|node| !service.is_node_blocked(node, is_primary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{
        NodeIndex, NodeSpec, PartitionIndex, PartitionSpec, ReplicaSpec, ServiceSpec,
    };

    fn blocked_cluster() -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        for id in 0..3 {
            b.add_node(NodeSpec::new(id, vec![10])).unwrap();
        }
        let svc = b
            .add_service(
                ServiceSpec::new("svc")
                    .with_block_list(vec![NodeIndex::new(2)])
                    .with_primary_block_list(vec![NodeIndex::new(1)]),
            )
            .unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_replica_on_blocked_node_is_flagged() {
        let placement = blocked_cluster();
        let mut solution = TempSolution::new(&placement, None);
        let secondary = placement.partition(PartitionIndex::new(0)).replicas()[1];
        solution.move_replica(secondary, NodeIndex::new(2));

        let c = PlacementConstraint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid, BTreeSet::from([secondary]));
    }

    #[test]
    fn test_subspace_respects_primary_block_list() {
        let placement = blocked_cluster();
        let solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let c = PlacementConstraint::new(0);

        let mut primary_targets = NodeSet::new(&placement);
        primary_targets.select_all();
        c.get_target_nodes(
            &solution,
            replicas[0],
            &mut primary_targets,
            CheckContext::strict(),
            &mut rng,
        );
        // Primary: node 1 (primary block) and node 2 (full block) are out.
        assert_eq!(
            primary_targets.iter().collect::<Vec<_>>(),
            vec![NodeIndex::new(0)]
        );

        let mut secondary_targets = NodeSet::new(&placement);
        secondary_targets.select_all();
        c.get_target_nodes(
            &solution,
            replicas[1],
            &mut secondary_targets,
            CheckContext::strict(),
            &mut rng,
        );
        // Secondary: only the full block applies.
        assert!(secondary_targets.check(NodeIndex::new(1)));
        assert!(!secondary_targets.check(NodeIndex::new(2)));
    }
}
