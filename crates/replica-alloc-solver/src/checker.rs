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

//! The search driver for one scheduling pass: wires up the active
//! constraints in checking order, places new replicas, drops extras,
//! corrects violations, takes randomized balancing steps and restores
//! upgrade locations. Rebuilt per [`Placement`]; it never fails hard —
//! unsatisfiable replicas are simply left unplaced.

use crate::constraints::affinity::AffinityConstraint;
use crate::constraints::application_capacity::ApplicationCapacityConstraint;
use crate::constraints::block_list::PlacementConstraint;
use crate::constraints::domain::DomainConstraint;
use crate::constraints::node_capacity::NodeCapacityConstraint;
use crate::constraints::preferred_location::PreferredLocationConstraint;
use crate::constraints::replica_exclusion::{
    ReplicaExclusionDynamicConstraint, ReplicaExclusionStaticConstraint,
};
use crate::constraints::scaleout::ScaleoutCountConstraint;
use crate::constraints::throttling::ThrottlingConstraint;
use crate::constraints::{CheckContext, Constraint, ConstraintKind, ViolationList};
use crate::state::node_set::NodeSet;
use crate::state::solution::{Movement, SlotRef, TempSolution};
use crate::support::rng::SeedSequencer;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use smallvec::{smallvec, SmallVec};
use replica_alloc_model::prelude::{
    DomainKind, NodeIndex, PartitionIndex, Placement, ReplicaIndex, ReplicaRole,
};
use std::collections::BTreeSet;

pub struct Checker<'a> {
    placement: &'a Placement,
    constraints: Vec<Box<dyn Constraint + 'a>>,
    affinity_constraint_index: Option<usize>,
    /// Constraints whose subspaces depend only on run-start data; the
    /// random walk reuses them for fresh moves without re-deriving the
    /// dynamic ones.
    static_constraint_indexes: Vec<usize>,
    max_priority: i32,
    max_priority_to_use: i32,
    /// Global movement-slot cap, set when throttling is a hard
    /// constraint and any phase enforces it.
    throttled_move_cap: Option<usize>,
}

impl<'a> Checker<'a> {
    pub fn new(placement: &'a Placement) -> Self {
        let settings = placement.settings();
        let mut constraints: Vec<Box<dyn Constraint + 'a>> = Vec::new();
        let mut static_constraint_indexes = Vec::new();

        constraints.push(Box::new(ReplicaExclusionStaticConstraint));
        static_constraint_indexes.push(0);

        if settings.placement_constraint_priority >= 0 {
            static_constraint_indexes.push(constraints.len());
            constraints.push(Box::new(PlacementConstraint::new(
                settings.placement_constraint_priority,
            )));
        }
        if settings.preferred_location_constraint_priority >= 0 {
            static_constraint_indexes.push(constraints.len());
            constraints.push(Box::new(PreferredLocationConstraint::new(
                settings.preferred_location_constraint_priority,
            )));
        }
        let mut throttled_move_cap = None;
        if settings.throttling_constraint_priority >= 0 {
            let enforced = settings.throttle_placement_phase
                || settings.throttle_balancing_phase
                || settings.throttle_constraint_check_phase;
            if settings.throttling_constraint_priority == 0 && enforced {
                throttled_move_cap = ThrottlingConstraint::get_throttled_move_count(placement);
            }
            constraints.push(Box::new(ThrottlingConstraint::new(
                settings.throttling_constraint_priority,
            )));
        }
        if settings.fault_domain_constraint_priority >= 0 {
            constraints.push(Box::new(DomainConstraint::new(
                DomainKind::Fault,
                settings.fault_domain_constraint_priority,
            )));
        }
        // A trivial or one-node-per-domain upgrade tree constrains
        // nothing, so the constraint is left out entirely.
        let ud_tree = placement.domain_tree(DomainKind::Upgrade);
        if settings.upgrade_domain_constraint_priority >= 0
            && !ud_tree.is_trivial()
            && !ud_tree.is_per_node()
        {
            constraints.push(Box::new(DomainConstraint::new(
                DomainKind::Upgrade,
                settings.upgrade_domain_constraint_priority,
            )));
        }
        constraints.push(Box::new(ReplicaExclusionDynamicConstraint));
        if settings.capacity_constraint_priority >= 0 {
            constraints.push(Box::new(NodeCapacityConstraint::new(
                settings.capacity_constraint_priority,
            )));
        }
        if settings.scaleout_count_constraint_priority >= 0 {
            constraints.push(Box::new(ScaleoutCountConstraint::new(
                settings.scaleout_count_constraint_priority,
            )));
        }
        if settings.application_capacity_constraint_priority >= 0 {
            constraints.push(Box::new(ApplicationCapacityConstraint::new(
                settings.application_capacity_constraint_priority,
            )));
        }
        // Affinity always goes last: parent partitions place without any
        // restriction from their children and get reconciled afterwards.
        let mut affinity_constraint_index = None;
        if settings.affinity_constraint_priority >= 0 {
            affinity_constraint_index = Some(constraints.len());
            constraints.push(Box::new(AffinityConstraint::new(
                settings.affinity_constraint_priority,
            )));
        }

        let max_priority = constraints
            .iter()
            .map(|c| c.priority())
            .max()
            .unwrap_or(0)
            .max(0);
        Self {
            placement,
            constraints,
            affinity_constraint_index,
            static_constraint_indexes,
            max_priority,
            max_priority_to_use: max_priority,
            throttled_move_cap,
        }
    }

    #[inline]
    pub fn placement(&self) -> &'a Placement {
        self.placement
    }

    #[inline]
    pub fn constraints(&self) -> &[Box<dyn Constraint + 'a>] {
        &self.constraints
    }

    #[inline]
    pub fn max_priority(&self) -> i32 {
        self.max_priority
    }

    #[inline]
    pub fn max_priority_to_use(&self) -> i32 {
        self.max_priority_to_use
    }

    /// Caps which constraints later passes enforce; clamped to the
    /// wired-up maximum.
    pub fn set_max_priority_to_use(&mut self, priority: i32) {
        self.max_priority_to_use = priority.min(self.max_priority);
    }

    #[inline]
    pub fn throttled_move_cap(&self) -> Option<usize> {
        self.throttled_move_cap
    }

    /// A fresh overlay for this pass, slot-capped when throttling is
    /// hard.
    pub fn new_solution(&self) -> TempSolution<'a> {
        TempSolution::new(self.placement, self.throttled_move_cap)
    }

    /// Runs the full phase sequence of one pass on a fresh overlay. Each
    /// phase draws from its own stream derived from `(sequencer, pass)`,
    /// so the same inputs replay the same solution.
    pub fn run_pass(
        &self,
        sequencer: &SeedSequencer,
        pass: usize,
        balancing_steps: usize,
    ) -> TempSolution<'a> {
        let mut solution = self.new_solution();

        let mut rng = sequencer.phase_rng(pass, 0);
        self.place_new_replicas(&mut solution, &mut rng);
        self.drop_extra_replicas(&mut solution);

        let mut rng = sequencer.phase_rng(pass, 1);
        if !self.correct_solution(&mut solution, self.max_priority_to_use, &mut rng) {
            tracing::debug!(pass, "correction left invalid replicas");
        }

        let mut rng = sequencer.phase_rng(pass, 2);
        for _ in 0..balancing_steps {
            self.move_solution_randomly(&mut solution, &mut rng);
        }

        let mut rng = sequencer.phase_rng(pass, 3);
        self.check_upgrade_partitions_to_be_placed(&mut solution, &mut rng);
        self.check_swap_primary_upgrade_partition(&mut solution, &mut rng);
        solution
    }

    // ---- placement ---------------------------------------------------

    /// Places every new replica, partitions in parent-before-child order,
    /// each one through the full subspace chain. Replicas with no legal
    /// node stay unplaced.
    pub fn place_new_replicas(&self, solution: &mut TempSolution<'a>, rng: &mut ChaCha8Rng) {
        let placement = self.placement;
        let ctx = CheckContext::strict();
        for &partition in placement.partitions_in_order() {
            let entry = placement.partition(partition);
            if entry.new_replica_count() == 0 {
                continue;
            }
            if entry.is_in_single_replica_upgrade()
                && self.try_singleton_upgrade_placement(solution, partition, ctx, rng)
            {
                continue;
            }
            for &replica in entry.replicas() {
                if !placement.replica(replica).is_new() || solution.current_node(replica).is_some()
                {
                    continue;
                }
                let mut chosen = self.choose_node_for_placement(solution, replica, ctx, rng);
                if chosen.is_none()
                    && placement.settings().move_existing_replica_for_placement
                    && self.make_room_for_placement(solution, replica, ctx, rng)
                {
                    chosen = self.choose_node_for_placement(solution, replica, ctx, rng);
                }
                match chosen {
                    Some(node) => solution.place_replica(replica, node),
                    None => {
                        tracing::debug!(
                            replica = replica.get(),
                            partition = partition.get(),
                            "no legal node for new replica"
                        );
                    }
                }
            }
        }
        self.correct_non_partially_placement(solution);
    }

    /// Narrows the full subspace chain for `replica` and picks a node.
    fn choose_node_for_placement(
        &self,
        solution: &TempSolution<'a>,
        replica: ReplicaIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> Option<NodeIndex> {
        let mut candidates = NodeSet::new(self.placement);
        candidates.select_all();
        for c in &self.constraints {
            c.subspace()
                .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
            if candidates.is_empty() {
                return None;
            }
        }
        self.pick_node(solution, &candidates, rng)
    }

    fn pick_node(
        &self,
        solution: &TempSolution<'a>,
        candidates: &NodeSet<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Option<NodeIndex> {
        let settings = self.placement.settings();
        if settings.dummy_plb_enabled {
            return candidates.select_highest_node_id();
        }
        if settings.use_node_load_as_heuristic {
            // Defragmentation flavor: prefer the fullest node that fits.
            return candidates
                .iter()
                .max_by_key(|&n| solution.node_load(n).iter().sum::<i64>());
        }
        candidates.select_random(rng)
    }

    /// Frees a node for a replica that fits nowhere by relocating one
    /// existing replica. Capacity is the only constraint a relocation
    /// can fix, so the node is chosen through every other subspace and
    /// its heaviest movable non-primary occupant is moved away through
    /// the full chain. `true` when a relocation happened.
    fn make_room_for_placement(
        &self,
        solution: &mut TempSolution<'a>,
        replica: ReplicaIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let placement = self.placement;
        let mut candidates = NodeSet::new(placement);
        candidates.select_all();
        for c in &self.constraints {
            if c.kind() == ConstraintKind::NodeCapacity {
                continue;
            }
            c.subspace()
                .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
            if candidates.is_empty() {
                return false;
            }
        }
        let Some(node) = self.pick_node(solution, &candidates, rng) else {
            return false;
        };
        let occupant = solution
            .replicas_on_node(node)
            .iter()
            .copied()
            .filter(|&r| {
                placement.replica(r).is_movable()
                    && solution.current_role(r) != ReplicaRole::Primary
            })
            .max_by_key(|&r| placement.replica(r).load().iter().sum::<i64>());
        let Some(occupant) = occupant else {
            return false;
        };
        let mut targets = NodeSet::new(placement);
        targets.select_all();
        for c in &self.constraints {
            c.subspace()
                .get_target_nodes(solution, occupant, &mut targets, ctx, rng);
            if targets.is_empty() {
                return false;
            }
        }
        targets.delete(node);
        let Some(target) = self.pick_node(solution, &targets, rng) else {
            return false;
        };
        solution.move_replica(occupant, target)
    }

    /// Singleton-replica-upgrade batching: the partition's replacement
    /// replica, together with those of affinity-linked or scaleout-one
    /// siblings, goes to one shared node, promoted to primary.
    fn try_singleton_upgrade_placement(
        &self,
        solution: &mut TempSolution<'a>,
        partition: PartitionIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let placement = self.placement;
        let group = self.singleton_upgrade_group(partition);
        let mut new_replicas = Vec::new();
        for &p in &group {
            for &r in placement.partition(p).replicas() {
                if placement.replica(r).is_new() && solution.current_node(r).is_none() {
                    new_replicas.push(r);
                }
            }
        }
        if new_replicas.is_empty() {
            return false;
        }
        let mut candidates = NodeSet::new(placement);
        candidates.select_all();
        for &r in &new_replicas {
            for c in &self.constraints {
                c.subspace()
                    .get_target_nodes(solution, r, &mut candidates, ctx, rng);
                if candidates.is_empty() {
                    return false;
                }
            }
        }
        let Some(node) = self.pick_node(solution, &candidates, rng) else {
            return false;
        };
        for &r in &new_replicas {
            solution.place_replica(r, node);
            let p = placement.replica(r).partition();
            let parent_in_upgrade = placement
                .partition(p)
                .parent_partition()
                .is_some_and(|pp| placement.partition(pp).is_in_upgrade());
            if !parent_in_upgrade {
                solution.set_role(r, ReplicaRole::Primary);
            }
            solution.mark_singleton_optimized(p);
        }
        true
    }

    /// The partition plus other single-replica-upgrade partitions that
    /// must land with it: affinity parent/children and partitions of a
    /// scaleout-one application.
    fn singleton_upgrade_group(&self, partition: PartitionIndex) -> SmallVec<[PartitionIndex; 4]> {
        let placement = self.placement;
        let mut group: SmallVec<[PartitionIndex; 4]> = smallvec![partition];
        for p in placement.partition_indices() {
            if p == partition {
                continue;
            }
            let entry = placement.partition(p);
            if !entry.is_in_single_replica_upgrade() {
                continue;
            }
            let linked = entry.parent_partition() == Some(partition)
                || placement.partition(partition).parent_partition() == Some(p);
            let scaleout_one = match (
                placement.application_of_partition(p),
                placement.application_of_partition(partition),
            ) {
                (Some(a), Some(b)) if a == b => {
                    placement.application(a).scaleout_count() == Some(1)
                }
                _ => false,
            };
            if linked || scaleout_one {
                group.push(p);
            }
        }
        group
    }

    /// A partition that forbids partial placement either places all of
    /// its creations or none of them.
    fn correct_non_partially_placement(&self, solution: &mut TempSolution<'a>) {
        let placement = self.placement;
        for partition in placement.partition_indices() {
            let entry = placement.partition(partition);
            if entry.partially_place()
                || entry.new_replica_count() == 0
                || entry.existing_replica_count() > 0
            {
                continue;
            }
            let new_replicas: Vec<ReplicaIndex> = entry
                .replicas()
                .iter()
                .copied()
                .filter(|&r| placement.replica(r).is_new())
                .collect();
            let placed = new_replicas
                .iter()
                .filter(|&&r| solution.current_node(r).is_some())
                .count();
            if placed == 0 || placed == new_replicas.len() {
                continue;
            }
            tracing::debug!(
                partition = partition.get(),
                placed,
                total = new_replicas.len(),
                "cancelling partial placement"
            );
            for r in new_replicas {
                solution.cancel_placement(r);
            }
        }
    }

    // ---- drops -------------------------------------------------------

    /// Drops the surplus replicas of over-target partitions, children
    /// before parents. Each victim is the non-primary movable replica
    /// whose removal yields the best balance score; constraint drop
    /// preferences steer which nodes are drained first.
    pub fn drop_extra_replicas(&self, solution: &mut TempSolution<'a>) {
        let placement = self.placement;
        for &partition in placement.partitions_in_order().iter().rev() {
            let entry = placement.partition(partition);
            let target = entry.target_replica_set_size();
            let mut placed = solution.placed_replica_count(partition);
            while placed > target {
                let mut preferred = NodeSet::new(placement);
                preferred.select_all();
                for c in &self.constraints {
                    c.subspace()
                        .get_nodes_for_replica_drop(solution, partition, &mut preferred);
                }
                let droppable: Vec<ReplicaIndex> = entry
                    .replicas()
                    .iter()
                    .copied()
                    .filter(|&r| {
                        placement.replica(r).is_movable()
                            && solution.current_role(r) != ReplicaRole::Primary
                            && solution.current_node(r).is_some()
                    })
                    .collect();
                let mut pool: Vec<ReplicaIndex> = droppable
                    .iter()
                    .copied()
                    .filter(|&r| {
                        solution
                            .current_node(r)
                            .is_some_and(|n| preferred.check(n))
                    })
                    .collect();
                if pool.is_empty() {
                    pool = droppable;
                }
                if pool.is_empty() {
                    break;
                }
                let mut best: Option<(ReplicaIndex, f64)> = None;
                for &r in &pool {
                    let change = solution.try_change(r, None);
                    let score = solution.avg_std_dev_score();
                    solution.undo_change(change);
                    // Lower is better, first candidate keeps ties.
                    if best.map_or(true, |(_, s)| score < s) {
                        best = Some((r, score));
                    }
                }
                let Some((victim, _)) = best else { break };
                if !solution.drop_replica(victim) {
                    tracing::debug!(
                        partition = partition.get(),
                        "movement slots exhausted while dropping extras"
                    );
                    break;
                }
                placed -= 1;
            }
        }
    }

    // ---- correction --------------------------------------------------

    /// Constraint-local corrections for every constraint at or below
    /// `max_priority`, followed by a global relocation pass. `false`
    /// when some invalid replica has no legal target.
    pub fn correct_solution(
        &self,
        solution: &mut TempSolution<'a>,
        max_priority: i32,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let ctx = CheckContext::relaxed();
        #[cfg(debug_assertions)]
        let before = self.get_violations(solution, ctx);
        for c in &self.constraints {
            if c.priority() > max_priority {
                continue;
            }
            if solution.is_swap_preferred() && !c.allows_correction_by_swap() {
                continue;
            }
            let invalid = c.get_invalid_replicas(solution, ctx, rng);
            for replica in invalid {
                let mut candidates = NodeSet::new(self.placement);
                candidates.select_all();
                c.subspace()
                    .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
                if let Some(current) = solution.current_node(replica) {
                    candidates.delete(current);
                }
                if let Some(node) = self.pick_node(solution, &candidates, rng) {
                    solution.move_replica(replica, node);
                } else {
                    tracing::debug!(
                        replica = replica.get(),
                        constraint = %c.name(),
                        "no correction target"
                    );
                }
            }
        }
        let ok = self.move_solution(solution, max_priority, rng);
        #[cfg(debug_assertions)]
        if ok {
            let after = self.get_violations(solution, ctx);
            debug_assert!(
                after.compare(&before) != crate::constraints::ViolationRelation::Greater,
                "correction regressed violations: {} -> {}",
                before,
                after
            );
        }
        ok
    }

    /// Relocates every still-invalid replica through the intersection of
    /// all active subspaces. `false` when any replica cannot find a
    /// legal node or the movement slots run out.
    pub fn move_solution(
        &self,
        solution: &mut TempSolution<'a>,
        max_priority: i32,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let ctx = CheckContext::relaxed();
        for _ in 0..2 {
            let mut invalid = BTreeSet::new();
            for c in &self.constraints {
                if c.priority() > max_priority {
                    continue;
                }
                invalid.extend(c.get_invalid_replicas(solution, ctx, rng));
            }
            if invalid.is_empty() {
                return true;
            }
            for replica in invalid {
                let mut candidates = NodeSet::new(self.placement);
                candidates.select_all();
                for c in &self.constraints {
                    if c.priority() > max_priority {
                        continue;
                    }
                    c.subspace()
                        .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
                    if candidates.is_empty() {
                        break;
                    }
                }
                if let Some(current) = solution.current_node(replica) {
                    candidates.delete(current);
                }
                let Some(node) = self.pick_node(solution, &candidates, rng) else {
                    tracing::debug!(replica = replica.get(), "no legal target for invalid replica");
                    return false;
                };
                if !solution.move_replica(replica, node) {
                    tracing::debug!(replica = replica.get(), "movement slots exhausted");
                    return false;
                }
            }
        }
        // The second sweep must have converged.
        for c in &self.constraints {
            if c.priority() > max_priority {
                continue;
            }
            if !c.get_invalid_replicas(solution, ctx, rng).is_empty() {
                return false;
            }
        }
        true
    }

    // ---- randomized search -------------------------------------------

    /// One randomized balancing step over the creation+migration slot
    /// space: re-place an unfilled creation, cancel a live movement
    /// (backward step), or generate a fresh move or primary swap. Any
    /// affinity damage is repaired in the same step. `false` when the
    /// step found nothing to do or could not finish legally.
    pub fn move_solution_randomly(
        &self,
        solution: &mut TempSolution<'a>,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let total = solution.max_creations_and_migrations();
        if total == 0 {
            return false;
        }
        let settings = self.placement.settings();
        let ctx = CheckContext::relaxed();
        let position = rng.gen_range(0..total);
        match solution.slot_at(position) {
            SlotRef::Creation(replica) => {
                let partition = self.placement.replica(replica).partition();
                if solution.is_singleton_optimized(partition) {
                    return false;
                }
                let Some(node) = self.choose_node_through_static(solution, replica, ctx, rng)
                else {
                    return false;
                };
                solution.place_replica(replica, node);
            }
            SlotRef::Migration(slot) => {
                let movement = solution.movement_in_slot(slot).copied();
                match movement {
                    Some(Movement::Drop { .. }) => return false,
                    Some(Movement::Move { replica, .. }) => {
                        let partition = self.placement.replica(replica).partition();
                        if solution.is_singleton_optimized(partition) {
                            return false;
                        }
                        solution.cancel_movement(slot);
                    }
                    Some(Movement::Swap { .. }) => {
                        solution.cancel_movement(slot);
                    }
                    None => {
                        let movable: Vec<ReplicaIndex> = self
                            .placement
                            .replicas()
                            .iter()
                            .filter(|r| !r.is_new() && r.is_movable())
                            .map(|r| r.index())
                            .collect();
                        if movable.is_empty() {
                            return false;
                        }
                        let replica = movable[rng.gen_range(0..movable.len())];
                        if rng.gen_bool(settings.swap_primary_probability) {
                            if !self.try_random_swap(solution, replica, rng) {
                                return false;
                            }
                        } else {
                            let Some(node) =
                                self.choose_node_through_static(solution, replica, ctx, rng)
                            else {
                                return false;
                            };
                            if !solution.move_replica(replica, node) {
                                return false;
                            }
                        }
                    }
                }
            }
        }
        self.correct_affinity(solution, ctx, rng);
        self.move_solution(solution, self.max_priority_to_use, rng)
    }

    /// Swaps the partition's primary with a random secondary whose node
    /// survives the promotion filters.
    fn try_random_swap(
        &self,
        solution: &mut TempSolution<'a>,
        replica: ReplicaIndex,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let placement = self.placement;
        let partition = placement.replica(replica).partition();
        let members = placement.partition(partition).replicas();
        let Some(primary) = members
            .iter()
            .copied()
            .find(|&r| solution.current_role(r) == ReplicaRole::Primary)
        else {
            return false;
        };
        if solution.current_node(primary).is_none() {
            return false;
        }
        let mut candidates = NodeSet::new(placement);
        candidates.select_all();
        for c in &self.constraints {
            c.subspace()
                .promote_secondary(solution, partition, &mut candidates);
        }
        let eligible: Vec<ReplicaIndex> = members
            .iter()
            .copied()
            .filter(|&r| {
                solution.current_role(r) == ReplicaRole::Secondary
                    && solution
                        .current_node(r)
                        .is_some_and(|n| candidates.check(n))
            })
            .collect();
        if eligible.is_empty() {
            return false;
        }
        let secondary = eligible[rng.gen_range(0..eligible.len())];
        solution.swap_replicas(primary, secondary)
    }

    /// Candidate node for a fresh random move, filtered only through the
    /// static subspaces.
    fn choose_node_through_static(
        &self,
        solution: &TempSolution<'a>,
        replica: ReplicaIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> Option<NodeIndex> {
        let mut candidates = NodeSet::new(self.placement);
        candidates.select_all();
        for &i in &self.static_constraint_indexes {
            self.constraints[i]
                .subspace()
                .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
            if candidates.is_empty() {
                return None;
            }
        }
        if let Some(current) = solution.current_node(replica) {
            candidates.delete(current);
        }
        self.pick_node(solution, &candidates, rng)
    }

    fn correct_affinity(
        &self,
        solution: &mut TempSolution<'a>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) {
        let Some(i) = self.affinity_constraint_index else {
            return;
        };
        let c = &self.constraints[i];
        let invalid = c.get_invalid_replicas(solution, ctx, rng);
        for replica in invalid {
            let mut candidates = NodeSet::new(self.placement);
            candidates.select_all();
            c.subspace()
                .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
            if let Some(current) = solution.current_node(replica) {
                candidates.delete(current);
            }
            if let Some(node) = self.pick_node(solution, &candidates, rng) {
                solution.move_replica(replica, node);
            }
        }
    }

    // ---- upgrade restoration -------------------------------------------

    /// Restores in-upgrade partitions to their designated locations,
    /// primary first, through the full subspace chain. An unreachable
    /// location yields a void movement at the last-resort priority.
    pub fn check_upgrade_partitions_to_be_placed(
        &self,
        solution: &mut TempSolution<'a>,
        rng: &mut ChaCha8Rng,
    ) {
        let placement = self.placement;
        let ctx = CheckContext::relaxed();
        for partition in placement.partition_indices() {
            let entry = placement.partition(partition);
            if !entry.is_in_upgrade() {
                continue;
            }
            if let Some(target) = entry.primary_upgrade_location() {
                let primary = entry
                    .replicas()
                    .iter()
                    .copied()
                    .find(|&r| solution.current_role(r) == ReplicaRole::Primary);
                if let Some(primary) = primary {
                    if solution.current_node(primary) != Some(target)
                        && !self.restore_to(solution, primary, target, ctx, rng)
                        && self.max_priority_to_use == 0
                    {
                        solution.add_void_movement(primary);
                    }
                }
            }
            let mut open: Vec<NodeIndex> = entry
                .secondary_upgrade_locations()
                .iter()
                .copied()
                .filter(|&t| {
                    !entry.replicas().iter().any(|&r| {
                        solution.current_role(r) == ReplicaRole::Secondary
                            && solution.current_node(r) == Some(t)
                    })
                })
                .collect();
            for &r in entry.replicas() {
                if open.is_empty() {
                    break;
                }
                if solution.current_role(r) != ReplicaRole::Secondary {
                    continue;
                }
                let Some(node) = solution.current_node(r) else {
                    continue;
                };
                if entry.secondary_upgrade_locations().contains(&node) {
                    continue;
                }
                let target = open[0];
                if self.restore_to(solution, r, target, ctx, rng) {
                    open.remove(0);
                } else if self.max_priority_to_use == 0 {
                    solution.add_void_movement(r);
                }
            }
        }
    }

    fn restore_to(
        &self,
        solution: &mut TempSolution<'a>,
        replica: ReplicaIndex,
        target: NodeIndex,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let mut candidates = NodeSet::new(self.placement);
        candidates.select_all();
        for c in &self.constraints {
            c.subspace()
                .get_target_nodes(solution, replica, &mut candidates, ctx, rng);
            if candidates.is_empty() {
                return false;
            }
        }
        if !candidates.check(target) {
            return false;
        }
        solution.move_replica(replica, target)
    }

    /// Swaps an in-upgrade partition's primary back onto its designated
    /// node when a secondary already stands there. Emits a void movement
    /// when domain rules forbid the promotion.
    pub fn check_swap_primary_upgrade_partition(
        &self,
        solution: &mut TempSolution<'a>,
        _rng: &mut ChaCha8Rng,
    ) {
        let placement = self.placement;
        for partition in placement.partition_indices() {
            let entry = placement.partition(partition);
            if !entry.is_in_upgrade() {
                continue;
            }
            let Some(target) = entry.primary_upgrade_location() else {
                continue;
            };
            let members = entry.replicas();
            let Some(primary) = members
                .iter()
                .copied()
                .find(|&r| solution.current_role(r) == ReplicaRole::Primary)
            else {
                continue;
            };
            if solution.current_node(primary) == Some(target) {
                continue;
            }
            // A target-one partition has no secondary to swap with.
            if entry.is_target_one() {
                if self.max_priority_to_use == 0 {
                    solution.add_void_movement(primary);
                }
                continue;
            }
            let Some(secondary) = members.iter().copied().find(|&r| {
                solution.current_role(r) == ReplicaRole::Secondary
                    && solution.current_node(r) == Some(target)
            }) else {
                continue;
            };
            let mut candidates = NodeSet::new(placement);
            candidates.select_all();
            for c in &self.constraints {
                c.subspace()
                    .promote_secondary(solution, partition, &mut candidates);
            }
            let allowed = candidates.check(target);
            if !allowed || !solution.swap_replicas(primary, secondary) {
                if self.max_priority_to_use == 0 {
                    solution.add_void_movement(primary);
                }
                tracing::debug!(
                    partition = partition.get(),
                    "primary swap-back unavailable"
                );
            }
        }
    }

    // ---- reporting -----------------------------------------------------

    /// Everything wrong with `solution`, keyed by constraint priority and
    /// kind.
    pub fn get_violations(&self, solution: &TempSolution<'a>, ctx: CheckContext) -> ViolationList {
        let mut list = ViolationList::new();
        for c in &self.constraints {
            if let Some(violation) = c.get_violations(solution, ctx) {
                list.insert(c.priority(), c.kind(), violation);
            }
        }
        list
    }
}
