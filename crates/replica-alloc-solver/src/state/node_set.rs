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

use fixedbitset::FixedBitSet;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{NodeIndex, Placement};

/// The mutable candidate target-node set for one filtering pass. Down
/// nodes never enter through `select_all`; only an explicit `add` (a
/// replica returning to its own node) can bring one in.
///
/// `count` is maintained eagerly so `is_empty`/`count` stay O(1): the
/// subspace chain short-circuits as soon as the set drains.
#[derive(Debug, Clone)]
pub struct NodeSet<'a> {
    placement: &'a Placement,
    bits: FixedBitSet,
    count: usize,
}

impl<'a> NodeSet<'a> {
    /// Starts empty.
    pub fn new(placement: &'a Placement) -> Self {
        Self {
            placement,
            bits: FixedBitSet::with_capacity(placement.node_count()),
            count: 0,
        }
    }

    /// Resets the set to every up node in the placement.
    pub fn select_all(&mut self) {
        self.bits.clear();
        self.count = 0;
        for node in self.placement.up_node_indices() {
            self.bits.insert(node.get());
            self.count += 1;
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn check(&self, node: NodeIndex) -> bool {
        self.bits.contains(node.get())
    }

    /// Inserts a node regardless of its up/down state.
    pub fn add(&mut self, node: NodeIndex) {
        if !self.bits.contains(node.get()) {
            self.bits.insert(node.get());
            self.count += 1;
        }
    }

    pub fn delete(&mut self, node: NodeIndex) {
        if self.bits.contains(node.get()) {
            self.bits.remove(node.get());
            self.count -= 1;
        }
    }

    pub fn delete_nodes<I: IntoIterator<Item = NodeIndex>>(&mut self, nodes: I) {
        for node in nodes {
            self.delete(node);
        }
    }

    /// Retains only nodes passing the predicate.
    pub fn filter<F: FnMut(NodeIndex) -> bool>(&mut self, mut pred: F) {
        let mut removed = 0usize;
        for i in 0..self.bits.len() {
            if self.bits.contains(i) && !pred(NodeIndex::new(i)) {
                self.bits.remove(i);
                removed += 1;
            }
        }
        self.count -= removed;
    }

    /// Set intersection against another set over the same universe.
    pub fn simple_intersect(&mut self, other: &NodeSet<'_>) {
        debug_assert_eq!(self.bits.len(), other.bits.len(), "node universe mismatch");
        self.bits.intersect_with(&other.bits);
        self.count = self.bits.count_ones(..);
    }

    /// Set union against another set over the same universe.
    pub fn simple_union(&mut self, other: &NodeSet<'_>) {
        debug_assert_eq!(self.bits.len(), other.bits.len(), "node universe mismatch");
        self.bits.union_with(&other.bits);
        self.count = self.bits.count_ones(..);
    }

    /// Intersects with the nodes yielded by `nodes`.
    pub fn intersect<I: IntoIterator<Item = NodeIndex>>(&mut self, nodes: I) {
        let mut keep = FixedBitSet::with_capacity(self.bits.len());
        for node in nodes {
            keep.insert(node.get());
        }
        self.bits.intersect_with(&keep);
        self.count = self.bits.count_ones(..);
    }

    /// Adds all nodes yielded by `nodes`.
    pub fn union_with<I: IntoIterator<Item = NodeIndex>>(&mut self, nodes: I) {
        for node in nodes {
            self.add(node);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.bits.ones().map(NodeIndex::new)
    }

    /// Uniform random pick among the remaining candidates; `None` when
    /// the set is empty (the soft-failure path, not an error).
    pub fn select_random(&self, rng: &mut ChaCha8Rng) -> Option<NodeIndex> {
        if self.count == 0 {
            return None;
        }
        let nth = rng.gen_range(0..self.count);
        self.iter().nth(nth)
    }

    /// Deterministic pick by highest external node id, for the dummy-PLB
    /// reproducibility mode.
    pub fn select_highest_node_id(&self) -> Option<NodeIndex> {
        self.iter().max_by_key(|&n| self.placement.node(n).id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use rand::SeedableRng;

    fn node_set(placement: &Placement) -> NodeSet<'_> {
        let mut set = NodeSet::new(placement);
        set.select_all();
        set
    }

    #[test]
    fn test_select_all_skips_down_nodes() {
        let placement = testkit::cluster_with_down_node(4, 2);
        let set = node_set(&placement);
        assert_eq!(set.count(), 3);
        assert!(!set.check(NodeIndex::new(2)));
    }

    #[test]
    fn test_explicit_add_brings_down_node_back() {
        let placement = testkit::cluster_with_down_node(4, 2);
        let mut set = node_set(&placement);
        set.add(NodeIndex::new(2));
        assert!(set.check(NodeIndex::new(2)));
        assert_eq!(set.count(), 4);
    }

    #[test]
    fn test_filter_and_delete_maintain_count() {
        let placement = testkit::uniform_cluster(5, &[10]);
        let mut set = node_set(&placement);
        set.filter(|n| n.get() % 2 == 0); // keep 0, 2, 4
        assert_eq!(set.count(), 3);
        set.delete(NodeIndex::new(2));
        set.delete(NodeIndex::new(2)); // second delete is a no-op
        assert_eq!(set.count(), 2);
        assert!(set.is_empty() == false);
    }

    #[test]
    fn test_simple_intersect_and_union() {
        let placement = testkit::uniform_cluster(4, &[10]);
        let mut a = node_set(&placement);
        a.filter(|n| n.get() < 2); // {0, 1}
        let mut b = node_set(&placement);
        b.filter(|n| n.get() >= 1); // {1, 2, 3}
        let mut i = a.clone();
        i.simple_intersect(&b);
        assert_eq!(i.iter().collect::<Vec<_>>(), vec![NodeIndex::new(1)]);
        a.simple_union(&b);
        assert_eq!(a.count(), 4);
    }

    #[test]
    fn test_select_random_is_uniform_over_members_and_none_when_empty() {
        let placement = testkit::uniform_cluster(3, &[10]);
        let mut set = node_set(&placement);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..32 {
            let picked = set.select_random(&mut rng).unwrap();
            assert!(set.check(picked));
        }
        set.filter(|_| false);
        assert!(set.select_random(&mut rng).is_none());
    }

    #[test]
    fn test_select_highest_node_id() {
        let placement = testkit::uniform_cluster(3, &[10]);
        let set = node_set(&placement);
        // testkit assigns ascending external ids, so the highest id is
        // the last node.
        assert_eq!(set.select_highest_node_id(), Some(NodeIndex::new(2)));
    }
}
