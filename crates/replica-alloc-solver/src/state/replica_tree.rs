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

use replica_alloc_model::problem::domain::{DomainTree, ROOT_DOMAIN};

/// The dynamic half of a domain hierarchy for one partition: replica
/// counts per domain segment, index-aligned with the static
/// [`DomainTree`]. The two trees move in lock-step; a shape mismatch is
/// a modeling bug and panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTree {
    counts: Vec<usize>,
}

impl ReplicaTree {
    pub fn new(tree: &DomainTree) -> Self {
        Self {
            counts: vec![0; tree.len()],
        }
    }

    /// Registers one replica under `leaf`, incrementing counts up to the
    /// root.
    pub fn add_replica(&mut self, tree: &DomainTree, leaf: usize) {
        debug_assert_eq!(self.counts.len(), tree.len(), "domain tree shape mismatch");
        let mut current = Some(leaf);
        while let Some(d) = current {
            self.counts[d] += 1;
            current = tree.parent(d);
        }
    }

    /// Removes one replica from `leaf`. Underflow means the trees fell
    /// out of lock-step.
    pub fn remove_replica(&mut self, tree: &DomainTree, leaf: usize) {
        debug_assert_eq!(self.counts.len(), tree.len(), "domain tree shape mismatch");
        let mut current = Some(leaf);
        while let Some(d) = current {
            assert!(
                self.counts[d] > 0,
                "replica count underflow at domain {}",
                d
            );
            self.counts[d] -= 1;
            current = tree.parent(d);
        }
    }

    #[inline]
    pub fn count(&self, domain: usize) -> usize {
        self.counts[domain]
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.counts[ROOT_DOMAIN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_tree() -> (DomainTree, usize, usize) {
        let mut t = DomainTree::new();
        let a = t.ensure_path(&["dc0", "rack0"]);
        let b = t.ensure_path(&["dc0", "rack1"]);
        (t, a, b)
    }

    #[test]
    fn test_add_and_remove_keep_chain_consistent() {
        let (tree, a, b) = two_level_tree();
        let mut rt = ReplicaTree::new(&tree);
        rt.add_replica(&tree, a);
        rt.add_replica(&tree, a);
        rt.add_replica(&tree, b);
        assert_eq!(rt.count(a), 2);
        assert_eq!(rt.count(b), 1);
        assert_eq!(rt.count(tree.parent(a).unwrap()), 3);
        assert_eq!(rt.total(), 3);

        rt.remove_replica(&tree, a);
        assert_eq!(rt.count(a), 1);
        assert_eq!(rt.total(), 2);
    }

    #[test]
    #[should_panic(expected = "replica count underflow")]
    fn test_underflow_panics() {
        let (tree, a, _) = two_level_tree();
        let mut rt = ReplicaTree::new(&tree);
        rt.remove_replica(&tree, a);
    }
}
