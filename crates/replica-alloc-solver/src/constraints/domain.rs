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

//! Fault- and upgrade-domain distribution, one implementation
//! discriminated by hierarchy kind. Three spread policies:
//!
//! - packing: every domain with nodes holds between floor(R/D) and
//!   ceil(R/D) of the R distribution-counting replicas across the D
//!   populated domains, recursively per level; replicas stuck in
//!   domains that lost all their nodes are discounted.
//! - quorum: no branch exceeds ceil(target / branches), widened by one
//!   when the target does not divide evenly; relaxed checks additionally
//!   grandfather counts the base solution already had.
//! - nonpacking: at most one replica per populated domain.

use crate::constraints::{CheckContext, Constraint, ConstraintKind, Subspace, Violation};
use crate::state::node_set::NodeSet;
use crate::state::replica_tree::ReplicaTree;
use crate::state::solution::TempSolution;
use rand::seq::index::sample;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{
    DomainDistribution, DomainKind, DomainTree, PartitionIndex, ReplicaIndex, ReplicaRole,
};
use replica_alloc_model::problem::domain::ROOT_DOMAIN;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpreadMode {
    Packing,
    Quorum,
    Nonpacking,
}

#[derive(Debug)]
pub struct DomainConstraint {
    domain_kind: DomainKind,
    priority: i32,
}

impl DomainConstraint {
    pub fn new(domain_kind: DomainKind, priority: i32) -> Self {
        Self {
            domain_kind,
            priority,
        }
    }

    #[inline]
    pub fn domain_kind(&self) -> DomainKind {
        self.domain_kind
    }

    fn spread_mode(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
    ) -> Option<SpreadMode> {
        let placement = solution.placement();
        let service = placement.service_of_partition(partition);
        let quorum = placement.settings().quorum_based_distribution(self.domain_kind)
            || service.auto_switch_to_quorum_based_logic();
        match self.domain_kind {
            DomainKind::Upgrade => Some(if quorum {
                SpreadMode::Quorum
            } else {
                SpreadMode::Packing
            }),
            DomainKind::Fault => match service.fd_distribution() {
                DomainDistribution::Ignore => None,
                DomainDistribution::Nonpacking => Some(SpreadMode::Nonpacking),
                DomainDistribution::Packing => Some(if quorum {
                    SpreadMode::Quorum
                } else {
                    SpreadMode::Packing
                }),
            },
        }
    }

    fn has_packing_violation(tree: &DomainTree, rt: &ReplicaTree, domain: usize) -> bool {
        let children = tree.children(domain);
        if children.is_empty() {
            return false;
        }
        let counted: Vec<usize> = children
            .iter()
            .copied()
            .filter(|&c| tree.node_count(c) > 0)
            .collect();
        if counted.is_empty() {
            return false;
        }
        let stuck: usize = children
            .iter()
            .copied()
            .filter(|&c| tree.node_count(c) == 0)
            .map(|c| rt.count(c))
            .sum();
        let r = rt.count(domain).saturating_sub(stuck);
        let d = counted.len();
        let floor = r / d;
        let ceil = r.div_ceil(d);
        for &c in &counted {
            let count = rt.count(c);
            if count < floor || count > ceil {
                return true;
            }
        }
        counted
            .iter()
            .any(|&c| Self::has_packing_violation(tree, rt, c))
    }

    /// Branch cap of the quorum policy: an even split of `target`,
    /// widened by one when it does not divide.
    fn quorum_cap(target: usize, branches: usize) -> usize {
        let mut cap = target / branches;
        if branches * cap < target {
            cap += 1;
        }
        cap
    }

    /// First level of the tree where more than one populated branch
    /// exists, reached by descending single-branch chains.
    fn quorum_level(tree: &DomainTree) -> Vec<usize> {
        let mut domain = ROOT_DOMAIN;
        loop {
            let eligible: Vec<usize> = tree
                .children(domain)
                .iter()
                .copied()
                .filter(|&c| tree.node_count(c) > 0)
                .collect();
            match eligible.len() {
                1 => domain = eligible[0],
                _ => return eligible,
            }
        }
    }

    fn has_quorum_violation(
        tree: &DomainTree,
        rt: &ReplicaTree,
        base_rt: Option<&ReplicaTree>,
        target: usize,
    ) -> bool {
        let eligible = Self::quorum_level(tree);
        if eligible.len() < 2 {
            return false;
        }
        let cap = Self::quorum_cap(target, eligible.len());
        eligible.iter().any(|&c| {
            let limit = match base_rt {
                Some(base) => cap.max(base.count(c)),
                None => cap,
            };
            rt.count(c) > limit
        })
    }

    fn has_nonpacking_violation(tree: &DomainTree, rt: &ReplicaTree) -> bool {
        tree.children(ROOT_DOMAIN)
            .iter()
            .any(|&c| tree.node_count(c) > 0 && rt.count(c) > 1)
    }

    /// Replicas standing in a domain that has no up nodes left.
    fn has_stuck_replicas(tree: &DomainTree, rt: &ReplicaTree) -> bool {
        (1..tree.len()).any(|d| tree.node_count(d) == 0 && rt.count(d) > 0)
    }

    /// Whether one partition violates this constraint's spread policy.
    pub fn has_partition_violation(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        ctx: CheckContext,
    ) -> bool {
        let Some(mode) = self.spread_mode(solution, partition) else {
            return false;
        };
        let placement = solution.placement();
        let tree = placement.domain_tree(self.domain_kind);
        if tree.is_trivial() {
            return false;
        }
        let rt = solution.replica_tree(partition, self.domain_kind);
        let base_rt = ctx
            .relaxed
            .then(|| solution.base_replica_tree(partition, self.domain_kind));
        if Self::has_stuck_replicas(tree, rt) {
            match base_rt {
                Some(base) if Self::has_stuck_replicas(tree, base) => {}
                _ => return true,
            }
        }
        let target = placement.partition(partition).target_replica_set_size();
        match mode {
            SpreadMode::Packing => {
                let violated = Self::has_packing_violation(tree, rt, ROOT_DOMAIN);
                // Relaxed passes grandfather layouts that came in broken.
                if violated && ctx.relaxed {
                    return !Self::has_packing_violation(
                        tree,
                        solution.base_replica_tree(partition, self.domain_kind),
                        ROOT_DOMAIN,
                    );
                }
                violated
            }
            SpreadMode::Quorum => Self::has_quorum_violation(tree, rt, base_rt, target),
            SpreadMode::Nonpacking => {
                let violated = Self::has_nonpacking_violation(tree, rt);
                if violated && ctx.relaxed {
                    return !Self::has_nonpacking_violation(
                        tree,
                        solution.base_replica_tree(partition, self.domain_kind),
                    );
                }
                violated
            }
        }
    }

    fn violating_partitions(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
    ) -> BTreeSet<PartitionIndex> {
        let mut violating = BTreeSet::new();
        let partitions: Vec<PartitionIndex> = if ctx.changed_only {
            solution.changed_partitions().iter().copied().collect()
        } else {
            solution.placement().partition_indices().collect()
        };
        for p in partitions {
            if self.has_partition_violation(solution, p, ctx) {
                violating.insert(p);
            }
        }
        violating
    }

    /// Distribution-counting replicas of `partition` currently inside
    /// `domain`'s subtree.
    fn replicas_in_domain(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        domain: usize,
    ) -> Vec<ReplicaIndex> {
        let placement = solution.placement();
        let tree = placement.domain_tree(self.domain_kind);
        placement
            .partition(partition)
            .replicas()
            .iter()
            .copied()
            .filter(|&r| {
                if !placement.replica(r).counts_for_distribution() {
                    return false;
                }
                match solution.current_node(r) {
                    Some(node) => {
                        tree.is_under(placement.node_leaf_domain(node, self.domain_kind), domain)
                    }
                    None => false,
                }
            })
            .collect()
    }

    /// Picks `k` of the given replicas, with the trivial cases resolved
    /// without consuming randomness.
    fn select_k(
        replicas: &[ReplicaIndex],
        k: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<ReplicaIndex> {
        let n = replicas.len();
        if k == 0 || n == 0 {
            return Vec::new();
        }
        if k >= n {
            return replicas.to_vec();
        }
        if k == n - 1 {
            let spared = rng.gen_range(0..n);
            return replicas
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != spared)
                .map(|(_, &r)| r)
                .collect();
        }
        sample(rng, n, k).into_iter().map(|i| replicas[i]).collect()
    }

    /// Replicas to evict from one violating partition: everything stuck
    /// in a domain without nodes first, then enough replicas from each
    /// overflowing domain to get back under its cap.
    fn invalid_replicas_of_partition(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> Vec<ReplicaIndex> {
        let placement = solution.placement();
        let tree = placement.domain_tree(self.domain_kind);
        let rt = solution.replica_tree(partition, self.domain_kind);
        let mode = match self.spread_mode(solution, partition) {
            Some(m) => m,
            None => return Vec::new(),
        };
        let mut invalid = Vec::new();

        // Zero-node domains drain completely, whatever the mode.
        for &r in placement.partition(partition).replicas() {
            if !placement.replica(r).counts_for_distribution() {
                continue;
            }
            if let Some(node) = solution.current_node(r) {
                if tree.node_count(placement.node_leaf_domain(node, self.domain_kind)) == 0 {
                    invalid.push(r);
                }
            }
        }

        let level: Vec<usize> = match mode {
            SpreadMode::Quorum => Self::quorum_level(tree),
            _ => tree.children(ROOT_DOMAIN).to_vec(),
        };

        let counted: Vec<usize> = level
            .iter()
            .copied()
            .filter(|&c| tree.node_count(c) > 0)
            .collect();
        if counted.is_empty() {
            return invalid;
        }
        let target = placement.partition(partition).target_replica_set_size();
        let stuck: usize = level
            .iter()
            .filter(|&&c| tree.node_count(c) == 0)
            .map(|&c| rt.count(c))
            .sum();
        let cap = match mode {
            SpreadMode::Packing => rt.total().saturating_sub(stuck).div_ceil(counted.len()),
            SpreadMode::Quorum => Self::quorum_cap(target, counted.len()),
            SpreadMode::Nonpacking => 1,
        };
        for &c in &counted {
            let limit = if ctx.relaxed {
                cap.max(solution.base_replica_tree(partition, self.domain_kind).count(c))
            } else {
                cap
            };
            let count = rt.count(c);
            if count > limit {
                let members = self.replicas_in_domain(solution, partition, c);
                invalid.extend(Self::select_k(&members, count - limit, rng));
            }
        }
        invalid
    }
}

impl Constraint for DomainConstraint {
    fn kind(&self) -> ConstraintKind {
        match self.domain_kind {
            DomainKind::Fault => ConstraintKind::FaultDomain,
            DomainKind::Upgrade => ConstraintKind::UpgradeDomain,
        }
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation> {
        let violating = self.violating_partitions(solution, ctx);
        (!violating.is_empty()).then(|| Violation::PartitionSet(violating))
    }

    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex> {
        let mut invalid = BTreeSet::new();
        for partition in self.violating_partitions(solution, ctx) {
            invalid.extend(self.invalid_replicas_of_partition(solution, partition, ctx, rng));
        }
        invalid
    }

    fn subspace(&self) -> &dyn Subspace {
        self
    }

}

impl Subspace for DomainConstraint {
    fn kind(&self) -> ConstraintKind {
        Constraint::kind(self)
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
        let partition = placement.replica(replica).partition();
        let Some(mode) = self.spread_mode(solution, partition) else {
            return;
        };
        let tree = placement.domain_tree(self.domain_kind);
        if tree.is_trivial() {
            return;
        }
        if !placement.replica(replica).counts_for_distribution() {
            return;
        }

        // Counts with this replica lifted out, so moving inside its own
        // domain is not penalized.
        let mut rt = solution.replica_tree(partition, self.domain_kind).clone();
        if let Some(node) = solution.current_node(replica) {
            rt.remove_replica(tree, placement.node_leaf_domain(node, self.domain_kind));
        }

        let level: Vec<usize> = match mode {
            SpreadMode::Quorum => Self::quorum_level(tree),
            _ => tree
                .children(ROOT_DOMAIN)
                .iter()
                .copied()
                .filter(|&c| tree.node_count(c) > 0)
                .collect(),
        };
        if level.len() < 2 {
            return;
        }
        let target = placement.partition(partition).target_replica_set_size();
        let cap = match mode {
            SpreadMode::Packing => (rt.total() + 1).div_ceil(level.len()),
            SpreadMode::Quorum => Self::quorum_cap(target, level.len()),
            SpreadMode::Nonpacking => 1,
        };

        candidates.filter(|node| {
            let leaf = placement.node_leaf_domain(node, self.domain_kind);
            let Some(&domain) = level.iter().find(|&&c| tree.is_under(leaf, c)) else {
                return false;
            };
            let limit = if ctx.relaxed {
                cap.max(
                    solution
                        .base_replica_tree(partition, self.domain_kind)
                        .count(domain),
                )
            } else {
                cap
            };
            rt.count(domain) < limit
        });
    }

    fn get_nodes_for_replica_drop(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        candidates: &mut NodeSet<'_>,
    ) {
        let placement = solution.placement();
        let tree = placement.domain_tree(self.domain_kind);
        if tree.is_trivial() {
            return;
        }
        let rt = solution.replica_tree(partition, self.domain_kind);
        let base = solution.base_replica_tree(partition, self.domain_kind);
        // Prefer dropping where the run has piled replicas above the
        // base layout.
        let mut narrowed = candidates.clone();
        narrowed.filter(|node| {
            let leaf = placement.node_leaf_domain(node, self.domain_kind);
            let top = tree.path_from_root(leaf).first().copied().unwrap_or(leaf);
            rt.count(top) > base.count(top)
        });
        if !narrowed.is_empty() {
            *candidates = narrowed;
        }
    }

    fn promote_secondary(
        &self,
        solution: &TempSolution<'_>,
        partition: PartitionIndex,
        candidates: &mut NodeSet<'_>,
    ) {
        if self.domain_kind != DomainKind::Upgrade {
            return;
        }
        let placement = solution.placement();
        let primary_node = placement
            .partition(partition)
            .replicas()
            .iter()
            .copied()
            .find(|&r| solution.current_role(r) == ReplicaRole::Primary)
            .and_then(|r| solution.current_node(r));
        let Some(primary_node) = primary_node else {
            return;
        };
        let primary_ud = placement.node_leaf_domain(primary_node, DomainKind::Upgrade);
        candidates.filter(|node| {
            placement.node_leaf_domain(node, DomainKind::Upgrade) == primary_ud
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;
    use replica_alloc_model::prelude::{
        NodeIndex, NodeSpec, PartitionSpec, ReplicaSpec, ServiceSpec,
    };

    /// Two fault domains, `per_domain` nodes each; one partition with
    /// `replicas` existing replicas laid out round-robin over all nodes.
    fn spread_cluster(
        per_domain: usize,
        replicas: usize,
        distribution: DomainDistribution,
    ) -> replica_alloc_model::prelude::Placement {
        let mut b = testkit::builder(1);
        let node_count = per_domain * 2;
        for id in 0..node_count {
            let fd = if id < per_domain { "fd0" } else { "fd1" };
            b.add_node(NodeSpec::new(id as u64, vec![100]).with_fault_domain([fd]))
                .unwrap();
        }
        let svc = b
            .add_service(ServiceSpec::new("svc").with_fd_distribution(distribution))
            .unwrap();
        let mut partition = PartitionSpec::new(0, svc, replicas);
        for i in 0..replicas {
            let role = if i == 0 {
                ReplicaRole::Primary
            } else {
                ReplicaRole::Secondary
            };
            partition = partition
                .with_replica(ReplicaSpec::existing(role, NodeIndex::new(i % node_count)));
        }
        b.add_partition(partition).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_balanced_packing_layout_is_clean() {
        let placement = spread_cluster(2, 4, DomainDistribution::Packing);
        let solution = TempSolution::new(&placement, None);
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        assert!(!c.has_partition_violation(&solution, PartitionIndex::new(0), CheckContext::strict()));
    }

    #[test]
    fn test_skewed_packing_layout_violates_floor_ceil() {
        let placement = spread_cluster(2, 4, DomainDistribution::Packing);
        let mut solution = TempSolution::new(&placement, None);
        // Move a replica from fd1 (node 2) over to fd0: split becomes 3/1.
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        solution.move_replica(replicas[2], NodeIndex::new(1));
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        assert!(c.has_partition_violation(&solution, PartitionIndex::new(0), CheckContext::strict()));

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        // 3 in fd0 against a ceil of 2: exactly one replica must leave.
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_nonpacking_flags_one_excess_replica_per_domain() {
        let placement = spread_cluster(2, 2, DomainDistribution::Nonpacking);
        let mut solution = TempSolution::new(&placement, None);
        // Both replicas into fd0 (nodes 0 and 1).
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        solution.move_replica(replicas[1], NodeIndex::new(1));
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let invalid = c.get_invalid_replicas(&solution, CheckContext::strict(), &mut rng);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_quorum_cap_widens_on_indivisible_target() {
        // target 3 over 2 branches: 3/2 = 1, 2*1 < 3, so the cap is 2.
        assert_eq!(DomainConstraint::quorum_cap(3, 2), 2);
        assert_eq!(DomainConstraint::quorum_cap(4, 2), 2);
        assert_eq!(DomainConstraint::quorum_cap(5, 5), 1);
    }

    #[test]
    fn test_relaxed_check_grandfathers_base_layout() {
        // Base layout already skewed 2/0 under nonpacking.
        let mut b = testkit::builder(1);
        b.add_node(NodeSpec::new(0, vec![100]).with_fault_domain(["fd0"])).unwrap();
        b.add_node(NodeSpec::new(1, vec![100]).with_fault_domain(["fd0"])).unwrap();
        b.add_node(NodeSpec::new(2, vec![100]).with_fault_domain(["fd1"])).unwrap();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_fd_distribution(DomainDistribution::Nonpacking))
            .unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
        )
        .unwrap();
        let placement = b.build().unwrap();
        let solution = TempSolution::new(&placement, None);
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        assert!(c.has_partition_violation(&solution, PartitionIndex::new(0), CheckContext::strict()));
        assert!(!c.has_partition_violation(&solution, PartitionIndex::new(0), CheckContext::relaxed()));
    }

    #[test]
    fn test_subspace_excludes_full_domains() {
        let placement = spread_cluster(2, 3, DomainDistribution::Packing);
        let solution = TempSolution::new(&placement, None);
        // Layout: fd0 holds replicas on nodes 0 and 1, fd1 holds one on
        // node 2. Placing replica 2 (currently fd1) elsewhere: fd0 is at
        // its cap of 2 once the mover is lifted out.
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut candidates = NodeSet::new(&placement);
        candidates.select_all();
        c.get_target_nodes(&solution, replicas[2], &mut candidates, CheckContext::strict(), &mut rng);
        assert!(!candidates.check(NodeIndex::new(0)));
        assert!(!candidates.check(NodeIndex::new(1)));
        assert!(candidates.check(NodeIndex::new(2)));
        assert!(candidates.check(NodeIndex::new(3)));
    }

    #[test]
    fn test_replica_on_nodeless_domain_drains_first() {
        let mut b = testkit::builder(1);
        b.add_node(NodeSpec::new(0, vec![100]).with_fault_domain(["fd0"])).unwrap();
        b.add_node(NodeSpec::new(1, vec![100]).with_fault_domain(["fd1"]).down()).unwrap();
        b.add_node(NodeSpec::new(2, vec![100]).with_fault_domain(["fd2"])).unwrap();
        let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
        )
        .unwrap();
        let placement = b.build().unwrap();
        let solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let c = DomainConstraint::new(DomainKind::Fault, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let invalid =
            c.invalid_replicas_of_partition(&solution, PartitionIndex::new(0), CheckContext::strict(), &mut rng);
        assert!(invalid.contains(&replicas[1]));
    }
}
