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

//! Standby/upgrade location, upgraded-domain, and container-image
//! preferences. Never a hard filter: the subspace narrows to preferred
//! nodes only when some survive the narrowing, so a partition without
//! reachable preferences still places.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{NodeIndex, PartitionIndex, ReplicaIndex, ReplicaRole};
use smallvec::SmallVec;
use std::collections::BTreeSet;

/// Nodes the orchestrator would rather host a replica of `partition`
/// on: explicit upgrade/standby restoration locations, nodes in
/// already-upgraded upgrade domains (while the partition is in
/// upgrade), and nodes that host at least half of the owning service's
/// required container images.
fn preferred_nodes(
    solution: &TempSolution<'_>,
    partition: PartitionIndex,
    role: ReplicaRole,
) -> SmallVec<[NodeIndex; 8]> {
    let placement = solution.placement();
    let entry = placement.partition(partition);
    let mut nodes: SmallVec<[NodeIndex; 8]> = SmallVec::new();
    if role == ReplicaRole::Primary {
        nodes.extend(entry.primary_upgrade_location());
    }
    nodes.extend(entry.secondary_upgrade_locations().iter().copied());
    nodes.extend(entry.standby_locations().iter().copied());

    let required = placement.service_of_partition(partition).required_images();
    for n in placement.node_indices() {
        if nodes.contains(&n) {
            continue;
        }
        if entry.is_in_upgrade() && placement.is_node_in_upgraded_domain(n) {
            nodes.push(n);
            continue;
        }
        if !required.is_empty() {
            let node = placement.node(n);
            let hosted = required.iter().filter(|img| node.hosts_image(img)).count();
            if 2 * hosted >= required.len() {
                nodes.push(n);
            }
        }
    }
    nodes
}

#[derive(Debug)]
pub struct PreferredLocationConstraint {
    priority: i32,
}

impl PreferredLocationConstraint {
    pub fn new(priority: i32) -> Self {
        Self { priority }
    }

    /// Primaries of in-upgrade partitions that are away from their
    /// designated restoration node.
    fn displaced_primaries(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeSet<ReplicaIndex> {
        let placement = solution.placement();
        let mut invalid = BTreeSet::new();
        for p in placement.partition_indices() {
            if ctx.changed_only && !solution.changed_partitions().contains(&p) {
                continue;
            }
            let partition = placement.partition(p);
            if !partition.is_in_upgrade() {
                continue;
            }
            let Some(target) = partition.primary_upgrade_location() else {
                continue;
            };
            for &r in partition.replicas() {
                if solution.current_role(r) == ReplicaRole::Primary
                    && solution.current_node(r).is_some()
                    && solution.current_node(r) != Some(target)
                {
                    invalid.insert(r);
                }
            }
        }
        invalid
    }
}

impl Constraint for PreferredLocationConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::PreferredLocation
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let invalid = self.displaced_primaries(solution, ctx);
        (!invalid.is_empty()).then(|| Violation::ReplicaSet(invalid))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        self.displaced_primaries(solution, ctx)
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for PreferredLocationConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::PreferredLocation
    }

    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        _ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) {
        let partition = solution.placement().replica(replica).partition();
        let preferred = preferred_nodes(solution, partition, solution.current_role(replica));
        if preferred.is_empty() {
            return;
        }
        let mut narrowed = candidates.clone();
        narrowed.intersect(preferred);
        if !narrowed.is_empty() {
            *candidates = narrowed;
        }
    }

    fn get_nodes_for_replica_drop(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        candidates: &mut NodeSet<'_>,
    ) {
        // Prefer dropping away from preferred locations, if that leaves
        // anything to drop from.
        let preferred = preferred_nodes(solution, partition, ReplicaRole::Secondary);
        if preferred.is_empty() {
            return;
        }
        let mut narrowed = candidates.clone();
        narrowed.delete_nodes(preferred);
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
    use replica_alloc_model::prelude::{
        NodeSpec, PartitionIndex, PartitionSpec, ReplicaSpec, ServiceSpec,
    };

    fn upgrade_cluster() -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        for id in 0..3 {
            b.add_node(NodeSpec::new(id, vec![10])).unwrap();
        }
        let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(1)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(2)))
                .in_upgrade()
                .with_primary_upgrade_location(NodeIndex::new(0)),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_displaced_primary_is_flagged() {
        let placement = upgrade_cluster();
        let solution = TempSolution::new(&placement, None);
        let primary = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let c = PreferredLocationConstraint::new(2);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid, BTreeSet::from([primary]));
    }

    #[test]
    fn test_subspace_narrows_to_preferred_when_reachable() {
        let placement = upgrade_cluster();
        let solution = TempSolution::new(&placement, None);
        let primary = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let c = PreferredLocationConstraint::new(2);

        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, primary, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![NodeIndex::new(0)]);
    }

    #[test]
    fn test_preference_is_dropped_when_unreachable() {
        let placement = upgrade_cluster();
        let solution = TempSolution::new(&placement, None);
        let primary = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let c = PreferredLocationConstraint::new(2);

        // The preferred node was already filtered out upstream.
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        candidates.delete(NodeIndex::new(0));
        let before: Vec<_> = candidates.iter().collect();
        c.get_target_nodes(&solution, primary, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), before);
    }

    fn image_cluster() -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        b.add_node(NodeSpec::new(0, vec![10])).unwrap();
        b.add_node(NodeSpec::new(1, vec![10]).with_hosted_images(["web", "cache"])).unwrap();
        b.add_node(NodeSpec::new(2, vec![10]).with_hosted_images(["cache"])).unwrap();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_required_images(["web", "cache", "db"]))
            .unwrap();
        b.add_partition(PartitionSpec::new(0, svc, 1).with_new_replicas(1)).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_nodes_hosting_half_the_required_images_are_preferred() {
        // Node 1 hosts 2 of 3 required images, node 2 only 1 of 3.
        let placement = image_cluster();
        let solution = TempSolution::new(&placement, None);
        let replica = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let c = PreferredLocationConstraint::new(2);

        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, replica, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![NodeIndex::new(1)]);
    }

    #[test]
    fn test_image_preference_is_ignored_without_required_images() {
        let mut b = testkit::builder(1);
        b.add_node(NodeSpec::new(0, vec![10])).unwrap();
        b.add_node(NodeSpec::new(1, vec![10]).with_hosted_images(["web"])).unwrap();
        let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
        b.add_partition(PartitionSpec::new(0, svc, 1).with_new_replicas(1)).unwrap();
        let placement = b.build().unwrap();

        let solution = TempSolution::new(&placement, None);
        let replica = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let c = PreferredLocationConstraint::new(2);

        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        let before: Vec<_> = candidates.iter().collect();
        c.get_target_nodes(&solution, replica, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_upgraded_domain_nodes_are_preferred_during_upgrade() {
        let mut b = testkit::builder(1);
        b.add_node(NodeSpec::new(0, vec![10]).with_upgrade_domain("ud0")).unwrap();
        b.add_node(NodeSpec::new(1, vec![10]).with_upgrade_domain("ud1")).unwrap();
        b.add_node(NodeSpec::new(2, vec![10]).with_upgrade_domain("ud2")).unwrap();
        b.mark_upgrade_domain_upgraded("ud0");
        let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(1)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(2)))
                .in_upgrade(),
        )
        .unwrap();
        let placement = b.build().unwrap();

        let solution = TempSolution::new(&placement, None);
        let secondary = placement.partition(PartitionIndex::new(0)).replicas()[1];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let c = PreferredLocationConstraint::new(2);

        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, secondary, &mut candidates, CheckContext::strict(), &mut rng);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![NodeIndex::new(0)]);
    }
}
