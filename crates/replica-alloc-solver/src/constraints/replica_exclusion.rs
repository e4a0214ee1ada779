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

//! Two replicas of one partition never share a node. The static half
//! filters against the positions replicas entered the run with; the
//! dynamic half is regenerated from the overlay on every check and
//! catches collisions the search itself created.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{NodeIndex, PartitionIndex, ReplicaIndex};
use std::collections::{BTreeMap, BTreeSet};

fn partitions_to_check<'s>(
    solution: &'s TempSolution<'_>,
    ctx: CheckContext,
) -> Box<dyn Iterator<Item = PartitionIndex> + 's> {
    if ctx.changed_only {
        Box::new(solution.changed_partitions().iter().copied())
    } else {
        Box::new(solution.placement().partition_indices())
    }
}

/// Replicas of `partition` grouped by current node, only nodes hosting
/// more than one.
fn collisions(
    solution: &TempSolution<'_>,
    partition: PartitionIndex,
) -> BTreeMap<NodeIndex, Vec<ReplicaIndex>> {
    let mut by_node: BTreeMap<NodeIndex, Vec<ReplicaIndex>> = BTreeMap::new();
    for &r in solution.placement().partition(partition).replicas() {
        if let Some(node) = solution.current_node(r) {
            by_node.entry(node).or_default().push(r);
        }
    }
    by_node.retain(|_, rs| rs.len() > 1);
    by_node
}

/// Exclusion against the positions the run started with. Always on
/// (priority −1): the subspace is what keeps placement from stacking a
/// new replica onto a partition-mate's node.
#[derive(Debug)]
pub struct ReplicaExclusionStaticConstraint;

impl ReplicaExclusionStaticConstraint {
    /// Replicas standing on a node whose base occupant is a different
    /// replica of the same partition.
    fn intruders(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeSet<ReplicaIndex> {
        let mut invalid = BTreeSet::new();
        for partition in partitions_to_check(solution, ctx) {
            for (node, replicas) in collisions(solution, partition) {
                for &r in &replicas {
                    if solution.base_node(r) != Some(node)
                        && replicas
                            .iter()
                            .any(|&other| other != r && solution.base_node(other) == Some(node))
                    {
                        invalid.insert(r);
                    }
                }
            }
        }
        invalid
    }
}

impl Constraint for ReplicaExclusionStaticConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ReplicaExclusionStatic
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let invalid = self.intruders(solution, ctx);
        (!invalid.is_empty()).then(|| Violation::ReplicaSet(invalid))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        _rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        self.intruders(solution, ctx)
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for ReplicaExclusionStaticConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ReplicaExclusionStatic
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
        for &other in solution.placement().partition(partition).replicas() {
            if other == replica {
                continue;
            }
            // A replica never excludes itself: its own base node stays in.
            if let Some(node) = solution.base_node(other) {
                if solution.base_node(replica) != Some(node) {
                    candidates.delete(node);
                }
            }
        }
    }
}

/// Exclusion against the overlay's current positions. Regenerated fresh
/// on every check; of N colliding replicas one random keeper survives.
#[derive(Debug)]
pub struct ReplicaExclusionDynamicConstraint;

impl Constraint for ReplicaExclusionDynamicConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ReplicaExclusionDynamic
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let mut invalid = BTreeSet::new();
        for partition in partitions_to_check(solution, ctx) {
            for (node, replicas) in collisions(solution, partition) {
                // Deterministic keeper for reporting: the base occupant if
                // present, else the lowest index.
                let keeper = replicas
                    .iter()
                    .copied()
                    .find(|&r| solution.base_node(r) == Some(node))
                    .unwrap_or(replicas[0]);
                invalid.extend(replicas.iter().copied().filter(|&r| r != keeper));
            }
        }
        (!invalid.is_empty()).then(|| Violation::ReplicaSet(invalid))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let mut invalid = BTreeSet::new();
        for partition in partitions_to_check(solution, ctx) {
            for (_, replicas) in collisions(solution, partition) {
                let keeper = replicas[rng.gen_range(0..replicas.len())];
                invalid.extend(replicas.iter().copied().filter(|&r| r != keeper));
            }
        }
        invalid
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }
}

impl Subspace for ReplicaExclusionDynamicConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::ReplicaExclusionDynamic
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
        for &other in solution.placement().partition(partition).replicas() {
            if other == replica {
                continue;
            }
            if let Some(node) = solution.current_node(other) {
                candidates.delete(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;

    #[test]
    fn test_clean_solution_has_no_violations() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 1);
        let solution = TempSolution::new(&placement, None);
        let c = ReplicaExclusionDynamicConstraint;
        assert!(c.get_violations(&solution, CheckContext::strict()).is_none());
    }

    #[test]
    fn test_collision_flags_all_but_one() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 1);
        let mut solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        // Pile the second replica onto the first one's node.
        solution.move_replica(replicas[1], NodeIndex::new(0));

        let c = ReplicaExclusionDynamicConstraint;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid.len(), 1);

        // The static half blames the intruder, not the base occupant.
        let s = ReplicaExclusionStaticConstraint;
        let invalid = s.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid, BTreeSet::from([replicas[1]]));
    }

    #[test]
    fn test_dynamic_subspace_excludes_occupied_nodes() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 1);
        let solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        ReplicaExclusionDynamicConstraint.get_target_nodes(
            &solution,
            replicas[0],
            &mut candidates,
            CheckContext::strict(),
            &mut rng,
        );
        // Node 1 hosts the partition-mate; node 0 (self) and node 2 stay.
        assert!(!candidates.check(NodeIndex::new(1)));
        assert!(candidates.check(NodeIndex::new(0)));
        assert!(candidates.check(NodeIndex::new(2)));
    }

    #[test]
    fn test_static_filter_is_idempotent() {
        let placement = testkit::cluster_with_partition(4, &[10], 3, 1);
        let solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut once = NodeSet::new(&placement);
        once.select_all();
        let s = ReplicaExclusionStaticConstraint;
        s.get_target_nodes(&solution, replicas[0], &mut once, CheckContext::strict(), &mut rng);
        let mut twice = once.clone();
        s.get_target_nodes(&solution, replicas[0], &mut twice, CheckContext::strict(), &mut rng);
        assert_eq!(
            once.iter().collect::<Vec<_>>(),
            twice.iter().collect::<Vec<_>>()
        );
    }
}
