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

use crate::state::replica_tree::ReplicaTree;
use fxhash::{FxHashMap, FxHashSet};
use replica_alloc_core::math::stats::{avg_std_dev, RunningStats};
use replica_alloc_core::prelude::LoadEntry;
use replica_alloc_model::prelude::{
    ApplicationIndex, DomainKind, NodeIndex, PartitionIndex, Placement, ReplicaIndex, ReplicaRole,
};
use std::collections::BTreeSet;

/// One proposed change occupying a migration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Move {
        replica: ReplicaIndex,
        from: Option<NodeIndex>,
        to: NodeIndex,
    },
    Swap {
        primary: ReplicaIndex,
        secondary: ReplicaIndex,
    },
    Drop {
        replica: ReplicaIndex,
        from: NodeIndex,
    },
}

/// A position in the creation+migration slot space the random walk
/// samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Creation(ReplicaIndex),
    Migration(usize),
}

/// Undo token for a trial assignment change.
#[derive(Debug, Clone, Copy)]
pub struct TrialChange {
    replica: ReplicaIndex,
    prior: Option<NodeIndex>,
}

#[derive(Debug, Clone, Default)]
struct AppNodeState {
    load: LoadEntry,
    count: usize,
}

/// Absolute bookkeeping tables for one solution snapshot. The base and
/// current halves of a [`TempSolution`] are two instances of this, kept
/// consistent through the single `apply` primitive so that every move
/// and its cancellation are exact mirror images (the round-trip law).
#[derive(Debug, Clone)]
struct SolutionState {
    assignments: Vec<Option<NodeIndex>>,
    node_loads: Vec<LoadEntry>,
    moving_in_loads: Vec<LoadEntry>,
    in_build_counts: Vec<usize>,
    node_replicas: Vec<BTreeSet<ReplicaIndex>>,
    app_nodes: FxHashMap<usize, FxHashMap<usize, AppNodeState>>,
    app_totals: FxHashMap<usize, LoadEntry>,
    sp_node_counts: FxHashMap<usize, FxHashMap<usize, usize>>,
    fd_trees: Vec<ReplicaTree>,
    ud_trees: Vec<ReplicaTree>,
}

impl SolutionState {
    fn empty(placement: &Placement) -> Self {
        let metric_count = placement.metric_count();
        let node_count = placement.node_count();
        let node_loads = placement
            .nodes()
            .iter()
            .map(|n| n.base_loads().clone())
            .collect();
        Self {
            assignments: vec![None; placement.replicas().len()],
            node_loads,
            moving_in_loads: vec![LoadEntry::zeroed(metric_count); node_count],
            in_build_counts: vec![0; node_count],
            node_replicas: vec![BTreeSet::new(); node_count],
            app_nodes: FxHashMap::default(),
            app_totals: FxHashMap::default(),
            sp_node_counts: FxHashMap::default(),
            fd_trees: placement
                .partitions()
                .iter()
                .map(|_| ReplicaTree::new(placement.domain_tree(DomainKind::Fault)))
                .collect(),
            ud_trees: placement
                .partitions()
                .iter()
                .map(|_| ReplicaTree::new(placement.domain_tree(DomainKind::Upgrade)))
                .collect(),
        }
    }

    /// Moves `replica` from its current node to `to`, updating every
    /// table. `to == None` means the replica leaves the cluster (drop or
    /// unplaced creation).
    fn apply(&mut self, placement: &Placement, replica: ReplicaIndex, to: Option<NodeIndex>) {
        let from = self.assignments[replica.get()];
        if from == to {
            return;
        }
        let r = placement.replica(replica);
        let partition = r.partition();
        let service = placement.service_of_partition(partition);
        let app = service.application();
        let sp = service.service_package();
        let base = r.base_node();

        if let Some(from) = from {
            let f = from.get();
            self.node_loads[f] -= r.load();
            if Some(from) != base {
                self.moving_in_loads[f] -= r.load();
            }
            if r.is_in_build() {
                self.in_build_counts[f] -= 1;
            }
            self.node_replicas[f].remove(&replica);
            if let Some(app) = app {
                let per_node = self.app_nodes.entry(app.get()).or_default();
                let state = per_node.get_mut(&f).expect("application load on node");
                state.load -= r.load();
                state.count -= 1;
                if state.count == 0 {
                    per_node.remove(&f);
                }
                let total = self.app_totals.entry(app.get()).or_insert_with(|| {
                    LoadEntry::zeroed(placement.metric_count())
                });
                *total -= r.load();
            }
            if let Some(sp) = sp {
                let per_node = self.sp_node_counts.entry(sp.get()).or_default();
                let count = per_node.get_mut(&f).expect("service package on node");
                *count -= 1;
                if *count == 0 {
                    per_node.remove(&f);
                    self.node_loads[f] -= placement.service_package(sp).node_load();
                }
            }
            if r.counts_for_distribution() {
                let fd_leaf = placement.node_leaf_domain(from, DomainKind::Fault);
                let ud_leaf = placement.node_leaf_domain(from, DomainKind::Upgrade);
                self.fd_trees[partition.get()]
                    .remove_replica(placement.domain_tree(DomainKind::Fault), fd_leaf);
                self.ud_trees[partition.get()]
                    .remove_replica(placement.domain_tree(DomainKind::Upgrade), ud_leaf);
            }
        }

        if let Some(to) = to {
            let t = to.get();
            self.node_loads[t] += r.load();
            if Some(to) != base {
                self.moving_in_loads[t] += r.load();
            }
            if r.is_in_build() {
                self.in_build_counts[t] += 1;
            }
            self.node_replicas[t].insert(replica);
            if let Some(app) = app {
                let metric_count = placement.metric_count();
                let per_node = self.app_nodes.entry(app.get()).or_default();
                let state = per_node.entry(t).or_insert_with(|| AppNodeState {
                    load: LoadEntry::zeroed(metric_count),
                    count: 0,
                });
                state.load += r.load();
                state.count += 1;
                let total = self
                    .app_totals
                    .entry(app.get())
                    .or_insert_with(|| LoadEntry::zeroed(metric_count));
                *total += r.load();
            }
            if let Some(sp) = sp {
                let per_node = self.sp_node_counts.entry(sp.get()).or_default();
                let count = per_node.entry(t).or_insert(0);
                *count += 1;
                if *count == 1 {
                    self.node_loads[t] += placement.service_package(sp).node_load();
                }
            }
            if r.counts_for_distribution() {
                let fd_leaf = placement.node_leaf_domain(to, DomainKind::Fault);
                let ud_leaf = placement.node_leaf_domain(to, DomainKind::Upgrade);
                self.fd_trees[partition.get()]
                    .add_replica(placement.domain_tree(DomainKind::Fault), fd_leaf);
                self.ud_trees[partition.get()]
                    .add_replica(placement.domain_tree(DomainKind::Upgrade), ud_leaf);
            }
        }

        self.assignments[replica.get()] = to;
    }
}

/// The mutable overlay of one scheduling attempt: proposed assignments
/// and the bookkeeping the constraints read, relative to a frozen base
/// snapshot (the last accepted configuration). Discarded or harvested
/// atomically at the end of the attempt.
#[derive(Debug, Clone)]
pub struct TempSolution<'a> {
    placement: &'a Placement,
    base: SolutionState,
    current: SolutionState,
    creations: Vec<ReplicaIndex>,
    movements: Vec<Option<Movement>>,
    replica_slots: FxHashMap<ReplicaIndex, usize>,
    void_movements: Vec<ReplicaIndex>,
    role_overrides: FxHashMap<ReplicaIndex, ReplicaRole>,
    singleton_optimized: FxHashSet<PartitionIndex>,
    changed_nodes: BTreeSet<NodeIndex>,
    changed_partitions: BTreeSet<PartitionIndex>,
    is_swap_preferred: bool,
    allow_parent_to_move: bool,
}

impl<'a> TempSolution<'a> {
    /// Builds the overlay over `placement`. `max_movement_slots` caps how
    /// many existing replicas may be in flight at once (the throttled
    /// move count when throttling is a hard constraint).
    pub fn new(placement: &'a Placement, max_movement_slots: Option<usize>) -> Self {
        let mut base = SolutionState::empty(placement);
        for r in placement.replicas() {
            if let Some(node) = r.base_node() {
                base.apply(placement, r.index(), Some(node));
            }
        }
        let current = base.clone();
        let creations = placement.new_replica_indices();
        let slot_count = max_movement_slots
            .unwrap_or(usize::MAX)
            .min(placement.movable_replica_count());
        Self {
            placement,
            base,
            current,
            creations,
            movements: vec![None; slot_count],
            replica_slots: FxHashMap::default(),
            void_movements: Vec::new(),
            role_overrides: FxHashMap::default(),
            singleton_optimized: FxHashSet::default(),
            changed_nodes: BTreeSet::new(),
            changed_partitions: BTreeSet::new(),
            is_swap_preferred: false,
            allow_parent_to_move: false,
        }
    }

    #[inline]
    pub fn placement(&self) -> &'a Placement {
        self.placement
    }

    #[inline]
    pub fn current_node(&self, replica: ReplicaIndex) -> Option<NodeIndex> {
        self.current.assignments[replica.get()]
    }

    #[inline]
    pub fn base_node(&self, replica: ReplicaIndex) -> Option<NodeIndex> {
        self.base.assignments[replica.get()]
    }

    /// Role under the overlay: upgrade promotions and swaps are tracked
    /// in a side table, never by mutating the arena.
    #[inline]
    pub fn current_role(&self, replica: ReplicaIndex) -> ReplicaRole {
        self.role_overrides
            .get(&replica)
            .copied()
            .unwrap_or_else(|| self.placement.replica(replica).role())
    }

    #[inline]
    pub fn set_role(&mut self, replica: ReplicaIndex, role: ReplicaRole) {
        self.role_overrides.insert(replica, role);
    }

    #[inline]
    pub fn is_swap_preferred(&self) -> bool {
        self.is_swap_preferred
    }

    #[inline]
    pub fn set_swap_preferred(&mut self, preferred: bool) {
        self.is_swap_preferred = preferred;
    }

    #[inline]
    pub fn allow_parent_to_move(&self) -> bool {
        self.allow_parent_to_move
    }

    #[inline]
    pub fn set_allow_parent_to_move(&mut self, allow: bool) {
        self.allow_parent_to_move = allow;
    }

    #[inline]
    pub fn mark_singleton_optimized(&mut self, partition: PartitionIndex) {
        self.singleton_optimized.insert(partition);
    }

    #[inline]
    pub fn is_singleton_optimized(&self, partition: PartitionIndex) -> bool {
        self.singleton_optimized.contains(&partition)
    }

    // ---- slot space ------------------------------------------------

    #[inline]
    pub fn creation_count(&self) -> usize {
        self.creations.len()
    }

    #[inline]
    pub fn movement_slot_count(&self) -> usize {
        self.movements.len()
    }

    /// Size of the space the random walk samples positions from.
    #[inline]
    pub fn max_creations_and_migrations(&self) -> usize {
        self.creations.len() + self.movements.len()
    }

    pub fn slot_at(&self, position: usize) -> SlotRef {
        if position < self.creations.len() {
            SlotRef::Creation(self.creations[position])
        } else {
            SlotRef::Migration(position - self.creations.len())
        }
    }

    #[inline]
    pub fn movement_in_slot(&self, slot: usize) -> Option<&Movement> {
        self.movements[slot].as_ref()
    }

    pub fn void_movements(&self) -> &[ReplicaIndex] {
        &self.void_movements
    }

    /// Records an explicit no-op acknowledgment for a move that cannot
    /// be completed.
    pub fn add_void_movement(&mut self, replica: ReplicaIndex) {
        self.void_movements.push(replica);
    }

    fn free_slot(&self) -> Option<usize> {
        self.movements.iter().position(|m| m.is_none())
    }

    // ---- mutation --------------------------------------------------

    fn apply_assignment(&mut self, replica: ReplicaIndex, to: Option<NodeIndex>) {
        let from = self.current_node(replica);
        if from == to {
            return;
        }
        if let Some(n) = from {
            self.changed_nodes.insert(n);
        }
        if let Some(n) = to {
            self.changed_nodes.insert(n);
        }
        self.changed_partitions
            .insert(self.placement.replica(replica).partition());
        self.current.apply(self.placement, replica, to);
    }

    /// Places a new replica. New replicas live in the creation slot
    /// space and never consume a migration slot.
    pub fn place_replica(&mut self, replica: ReplicaIndex, node: NodeIndex) {
        debug_assert!(self.placement.replica(replica).is_new(), "not a creation");
        self.apply_assignment(replica, Some(node));
    }

    /// Clears a creation back to unplaced.
    pub fn cancel_placement(&mut self, replica: ReplicaIndex) {
        debug_assert!(self.placement.replica(replica).is_new(), "not a creation");
        self.apply_assignment(replica, None);
    }

    /// Moves an existing replica, claiming (or reusing) a migration
    /// slot. `false` when every slot is taken, which is how the
    /// throttled movement cap manifests.
    pub fn move_replica(&mut self, replica: ReplicaIndex, to: NodeIndex) -> bool {
        if self.placement.replica(replica).is_new() {
            self.place_replica(replica, to);
            return true;
        }
        let slot = match self.replica_slots.get(&replica) {
            Some(&s) => s,
            None => match self.free_slot() {
                Some(s) => s,
                None => return false,
            },
        };
        let from = self.current_node(replica);
        self.apply_assignment(replica, Some(to));
        if Some(to) == self.base_node(replica) {
            // Back at base: the slot no longer carries a change.
            self.movements[slot] = None;
            self.replica_slots.remove(&replica);
        } else {
            self.movements[slot] = Some(Movement::Move {
                replica,
                from,
                to,
            });
            self.replica_slots.insert(replica, slot);
        }
        true
    }

    /// Drops an existing replica, claiming a migration slot.
    pub fn drop_replica(&mut self, replica: ReplicaIndex) -> bool {
        let Some(from) = self.current_node(replica) else {
            return false;
        };
        let slot = match self.replica_slots.get(&replica) {
            Some(&s) => s,
            None => match self.free_slot() {
                Some(s) => s,
                None => return false,
            },
        };
        self.apply_assignment(replica, None);
        self.movements[slot] = Some(Movement::Drop { replica, from });
        self.replica_slots.insert(replica, slot);
        true
    }

    /// Exchanges the nodes of a primary and one of its secondaries. The
    /// replicas keep their roles, so the primary role and its load land
    /// on the secondary's node.
    pub fn swap_replicas(&mut self, primary: ReplicaIndex, secondary: ReplicaIndex) -> bool {
        let (Some(p_node), Some(s_node)) =
            (self.current_node(primary), self.current_node(secondary))
        else {
            return false;
        };
        let slot = match self.replica_slots.get(&primary) {
            Some(&s) => s,
            None => match self.free_slot() {
                Some(s) => s,
                None => return false,
            },
        };
        self.apply_assignment(primary, Some(s_node));
        self.apply_assignment(secondary, Some(p_node));
        self.movements[slot] = Some(Movement::Swap { primary, secondary });
        self.replica_slots.insert(primary, slot);
        self.replica_slots.insert(secondary, slot);
        true
    }

    /// Reverts whatever occupies `slot` back to base.
    pub fn cancel_movement(&mut self, slot: usize) {
        let Some(movement) = self.movements[slot] else {
            return;
        };
        match movement {
            Movement::Move { replica, .. } | Movement::Drop { replica, .. } => {
                let base = self.base_node(replica);
                self.apply_assignment(replica, base);
                self.replica_slots.remove(&replica);
            }
            Movement::Swap { primary, secondary } => {
                let p_base = self.base_node(primary);
                let s_base = self.base_node(secondary);
                self.apply_assignment(primary, p_base);
                self.apply_assignment(secondary, s_base);
                self.replica_slots.remove(&primary);
                self.replica_slots.remove(&secondary);
            }
        }
        self.movements[slot] = None;
    }

    /// Applies a trial assignment that can be undone exactly.
    pub fn try_change(&mut self, replica: ReplicaIndex, to: Option<NodeIndex>) -> TrialChange {
        let prior = self.current_node(replica);
        self.apply_assignment(replica, to);
        TrialChange { replica, prior }
    }

    pub fn undo_change(&mut self, change: TrialChange) {
        self.apply_assignment(change.replica, change.prior);
    }

    // ---- queries ---------------------------------------------------

    /// Current absolute load of a node (base loads, replica loads and
    /// service-package footprints; disappearing load and reservations
    /// are added by the capacity checks).
    #[inline]
    pub fn node_load(&self, node: NodeIndex) -> &LoadEntry {
        &self.current.node_loads[node.get()]
    }

    #[inline]
    pub fn base_node_load(&self, node: NodeIndex) -> &LoadEntry {
        &self.base.node_loads[node.get()]
    }

    /// Node load counting only changes that moved load *into* the node
    /// this run, on top of the base layout. Used when transient
    /// overcommit must be prevented.
    pub fn move_in_only_node_load(&self, node: NodeIndex) -> LoadEntry {
        let mut load = self.base.node_loads[node.get()].clone();
        load += &self.current.moving_in_loads[node.get()];
        load
    }

    #[inline]
    pub fn in_build_count(&self, node: NodeIndex) -> usize {
        self.current.in_build_counts[node.get()]
    }

    #[inline]
    pub fn replicas_on_node(&self, node: NodeIndex) -> &BTreeSet<ReplicaIndex> {
        &self.current.node_replicas[node.get()]
    }

    /// Replicas that were moved onto `node` during this run.
    pub fn moved_in_replicas(&self, node: NodeIndex) -> Vec<ReplicaIndex> {
        self.current.node_replicas[node.get()]
            .iter()
            .copied()
            .filter(|&r| self.base_node(r) != Some(node))
            .collect()
    }

    pub fn app_node_load(&self, app: ApplicationIndex, node: NodeIndex) -> Option<&LoadEntry> {
        self.current
            .app_nodes
            .get(&app.get())
            .and_then(|m| m.get(&node.get()))
            .map(|s| &s.load)
    }

    pub fn app_node_count(&self, app: ApplicationIndex, node: NodeIndex) -> usize {
        self.current
            .app_nodes
            .get(&app.get())
            .and_then(|m| m.get(&node.get()))
            .map_or(0, |s| s.count)
    }

    pub fn app_total_load(&self, app: ApplicationIndex) -> Option<&LoadEntry> {
        self.current.app_totals.get(&app.get())
    }

    pub fn base_app_node_load(
        &self,
        app: ApplicationIndex,
        node: NodeIndex,
    ) -> Option<&LoadEntry> {
        self.base
            .app_nodes
            .get(&app.get())
            .and_then(|m| m.get(&node.get()))
            .map(|s| &s.load)
    }

    pub fn base_app_total_load(&self, app: ApplicationIndex) -> Option<&LoadEntry> {
        self.base.app_totals.get(&app.get())
    }

    /// Replicas of the given service package currently on `node`. The
    /// package footprint is charged while this is non-zero.
    pub fn service_package_count(
        &self,
        sp: replica_alloc_model::prelude::ServicePackageIndex,
        node: NodeIndex,
    ) -> usize {
        self.current
            .sp_node_counts
            .get(&sp.get())
            .and_then(|m| m.get(&node.get()))
            .copied()
            .unwrap_or(0)
    }

    /// Distinct nodes currently hosting the application, ordered.
    pub fn app_nodes(&self, app: ApplicationIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .current
            .app_nodes
            .get(&app.get())
            .map(|m| m.keys().map(|&n| NodeIndex::new(n)).collect())
            .unwrap_or_default();
        nodes.sort_unstable();
        nodes
    }

    pub fn base_app_nodes(&self, app: ApplicationIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .base
            .app_nodes
            .get(&app.get())
            .map(|m| m.keys().map(|&n| NodeIndex::new(n)).collect())
            .unwrap_or_default();
        nodes.sort_unstable();
        nodes
    }

    /// Load every reserving application still holds back on `node`:
    /// the unused remainder of each reservation, per metric.
    pub fn application_reserved_load(&self, node: NodeIndex) -> LoadEntry {
        self.reserved_load_in(&self.current, node, None)
    }

    /// Reserved load on `node` with one application's reservation
    /// ignored (used when evicting a whole application from the node).
    pub fn application_reserved_load_without(
        &self,
        node: NodeIndex,
        skip: ApplicationIndex,
    ) -> LoadEntry {
        self.reserved_load_in(&self.current, node, Some(skip))
    }

    pub fn base_application_reserved_load(&self, node: NodeIndex) -> LoadEntry {
        self.reserved_load_in(&self.base, node, None)
    }

    fn reserved_load_in(
        &self,
        state: &SolutionState,
        node: NodeIndex,
        skip: Option<ApplicationIndex>,
    ) -> LoadEntry {
        let mut reserved = LoadEntry::zeroed(self.placement.metric_count());
        for (app_raw, per_node) in &state.app_nodes {
            if skip.map(|a| a.get()) == Some(*app_raw) {
                continue;
            }
            let app = self.placement.application(ApplicationIndex::new(*app_raw));
            if !app.has_reservation() {
                continue;
            }
            if let Some(s) = per_node.get(&node.get()) {
                for m in 0..reserved.len() {
                    let remainder = app.reservation().get(m) - s.load.get(m);
                    if remainder > 0 {
                        reserved.add_load(m, remainder);
                    }
                }
            }
        }
        reserved
    }

    /// Replica counts per domain for one partition, under the overlay.
    #[inline]
    pub fn replica_tree(&self, partition: PartitionIndex, kind: DomainKind) -> &ReplicaTree {
        match kind {
            DomainKind::Fault => &self.current.fd_trees[partition.get()],
            DomainKind::Upgrade => &self.current.ud_trees[partition.get()],
        }
    }

    /// The same counts in the base snapshot (for grandfathering).
    #[inline]
    pub fn base_replica_tree(&self, partition: PartitionIndex, kind: DomainKind) -> &ReplicaTree {
        match kind {
            DomainKind::Fault => &self.base.fd_trees[partition.get()],
            DomainKind::Upgrade => &self.base.ud_trees[partition.get()],
        }
    }

    #[inline]
    pub fn changed_nodes(&self) -> &BTreeSet<NodeIndex> {
        &self.changed_nodes
    }

    #[inline]
    pub fn changed_partitions(&self) -> &BTreeSet<PartitionIndex> {
        &self.changed_partitions
    }

    /// Replicas of `partition` currently on `node`.
    pub fn partition_replicas_on_node(
        &self,
        partition: PartitionIndex,
        node: NodeIndex,
    ) -> Vec<ReplicaIndex> {
        self.placement
            .partition(partition)
            .replicas()
            .iter()
            .copied()
            .filter(|&r| self.current_node(r) == Some(node))
            .collect()
    }

    /// Number of replicas a partition currently has placed.
    pub fn placed_replica_count(&self, partition: PartitionIndex) -> usize {
        self.placement
            .partition(partition)
            .replicas()
            .iter()
            .filter(|r| self.current_node(**r).is_some())
            .count()
    }

    /// Mean per-metric standard deviation of node loads: the balance
    /// score trial drops are ranked by (lower is better).
    pub fn avg_std_dev_score(&self) -> f64 {
        let metric_count = self.placement.metric_count();
        let mut stats = vec![RunningStats::new(); metric_count];
        for node in self.placement.up_node_indices() {
            let load = self.node_load(node);
            for (m, stat) in stats.iter_mut().enumerate() {
                stat.push_int(load.get(m));
            }
        }
        avg_std_dev(stats.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    #[test]
    fn test_base_population_counts_loads() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let solution = TempSolution::new(&placement, None);
        // Replica load defaults to 4 on each of the two base nodes.
        assert_eq!(solution.node_load(NodeIndex::new(0)).get(0), 4);
        assert_eq!(solution.node_load(NodeIndex::new(1)).get(0), 4);
        assert_eq!(solution.node_load(NodeIndex::new(2)).get(0), 0);
    }

    #[test]
    fn test_move_then_cancel_restores_loads_exactly() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let mut solution = TempSolution::new(&placement, None);
        let before: Vec<LoadEntry> = placement
            .node_indices()
            .map(|n| solution.node_load(n).clone())
            .collect();
        let replica = placement.partition(PartitionIndex::new(0)).replicas()[1];
        assert!(solution.move_replica(replica, NodeIndex::new(2)));
        assert_ne!(solution.node_load(NodeIndex::new(2)).get(0), 0);

        let slot = *solution.replica_slots.get(&replica).unwrap();
        solution.cancel_movement(slot);
        let after: Vec<LoadEntry> = placement
            .node_indices()
            .map(|n| solution.node_load(n).clone())
            .collect();
        assert_eq!(before, after);
        assert!(solution.movement_in_slot(slot).is_none());
    }

    #[test]
    fn test_try_change_round_trip() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let mut solution = TempSolution::new(&placement, None);
        let replica = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let before = solution.node_load(NodeIndex::new(0)).clone();

        let change = solution.try_change(replica, None);
        assert_eq!(solution.node_load(NodeIndex::new(0)).get(0), before.get(0) - 4);
        solution.undo_change(change);
        assert_eq!(solution.node_load(NodeIndex::new(0)), &before);
    }

    #[test]
    fn test_moving_back_to_base_frees_the_slot() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let mut solution = TempSolution::new(&placement, Some(1));
        let replica = placement.partition(PartitionIndex::new(0)).replicas()[0];
        let base = solution.base_node(replica).unwrap();
        assert!(solution.move_replica(replica, NodeIndex::new(2)));
        // Single slot is now taken by `replica`; moving it home releases it.
        assert!(solution.move_replica(replica, base));
        let other = placement.partition(PartitionIndex::new(0)).replicas()[1];
        assert!(solution.move_replica(other, NodeIndex::new(2)));
    }

    #[test]
    fn test_slot_cap_limits_concurrent_migrations() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let mut solution = TempSolution::new(&placement, Some(1));
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        assert!(solution.move_replica(replicas[0], NodeIndex::new(2)));
        assert!(!solution.move_replica(replicas[1], NodeIndex::new(2)));
    }

    #[test]
    fn test_swap_exchanges_nodes_and_keeps_roles() {
        let placement = testkit::cluster_with_partition(3, &[10], 2, 4);
        let mut solution = TempSolution::new(&placement, None);
        let replicas = placement.partition(PartitionIndex::new(0)).replicas().to_vec();
        let (primary, secondary) = (replicas[0], replicas[1]);
        let p_node = solution.current_node(primary).unwrap();
        let s_node = solution.current_node(secondary).unwrap();

        assert!(solution.swap_replicas(primary, secondary));
        assert_eq!(solution.current_node(primary), Some(s_node));
        assert_eq!(solution.current_node(secondary), Some(p_node));
        assert_eq!(solution.current_role(primary), ReplicaRole::Primary);
        assert_eq!(solution.current_role(secondary), ReplicaRole::Secondary);

        // Cancelling restores both to base.
        solution.cancel_movement(0);
        assert_eq!(solution.current_node(primary), Some(p_node));
        assert_eq!(solution.current_node(secondary), Some(s_node));
    }

    #[test]
    fn test_replica_tree_follows_moves() {
        let placement = testkit::two_domain_cluster(4, &[10]);
        let mut solution = TempSolution::new(&placement, None);
        let partition = PartitionIndex::new(0);
        let replica = placement.partition(partition).replicas()[0];
        let from = solution.current_node(replica).unwrap();
        let to = NodeIndex::new(3); // other fault domain in this fixture
        let from_leaf = placement.node_leaf_domain(from, DomainKind::Fault);
        let to_leaf = placement.node_leaf_domain(to, DomainKind::Fault);

        let before = solution.replica_tree(partition, DomainKind::Fault).count(from_leaf);
        solution.move_replica(replica, to);
        let tree = solution.replica_tree(partition, DomainKind::Fault);
        assert_eq!(tree.count(from_leaf), before - 1);
        assert_eq!(tree.count(to_leaf), 1);
        // Base tree is untouched.
        assert_eq!(
            solution.base_replica_tree(partition, DomainKind::Fault).count(from_leaf),
            before
        );
    }

    #[test]
    fn test_service_package_footprint_counted_once_per_node() {
        let placement = testkit::cluster_with_service_package(2, &[20], 3);
        let solution = TempSolution::new(&placement, None);
        // Two replicas of the same package share node 0: footprint (3)
        // charged once, replica loads are zero in this fixture.
        assert_eq!(solution.node_load(NodeIndex::new(0)).get(0), 3);
    }

    #[test]
    fn test_application_reserved_load_is_remainder() {
        let placement = testkit::cluster_with_reserving_app(2, &[20], 6, 2);
        let solution = TempSolution::new(&placement, None);
        // One replica with load 2 on node 0; the app reserves 6.
        let reserved = solution.application_reserved_load(NodeIndex::new(0));
        assert_eq!(reserved.get(0), 4);
        // Nothing reserved where the app has no presence.
        let empty = solution.application_reserved_load(NodeIndex::new(1));
        assert_eq!(empty.get(0), 0);
    }
}
