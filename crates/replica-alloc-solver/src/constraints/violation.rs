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

use crate::constraints::ConstraintKind;
use replica_alloc_model::prelude::{ApplicationIndex, NodeIndex, PartitionIndex, ReplicaIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of comparing two violations or violation lists. Violations
/// form a partial order: disjoint or crossing sets are simply
/// incomparable, never "equal enough".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationRelation {
    Smaller,
    Equal,
    Greater,
    Incomparable,
}

impl ViolationRelation {
    fn combine(self, other: ViolationRelation) -> ViolationRelation {
        use ViolationRelation::*;
        match (self, other) {
            (Equal, r) | (r, Equal) => r,
            (Smaller, Smaller) => Smaller,
            (Greater, Greater) => Greater,
            _ => Incomparable,
        }
    }
}

fn compare_sets<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> ViolationRelation {
    if a == b {
        ViolationRelation::Equal
    } else if a.is_subset(b) {
        ViolationRelation::Smaller
    } else if b.is_subset(a) {
        ViolationRelation::Greater
    } else {
        ViolationRelation::Incomparable
    }
}

fn compare_maps<K: Ord + Copy>(
    a: &BTreeMap<K, i64>,
    b: &BTreeMap<K, i64>,
) -> ViolationRelation {
    let mut rel = ViolationRelation::Equal;
    for key in a.keys().chain(b.keys()) {
        let va = a.get(key).copied().unwrap_or(0);
        let vb = b.get(key).copied().unwrap_or(0);
        let r = match va.cmp(&vb) {
            std::cmp::Ordering::Less => ViolationRelation::Smaller,
            std::cmp::Ordering::Equal => ViolationRelation::Equal,
            std::cmp::Ordering::Greater => ViolationRelation::Greater,
        };
        rel = rel.combine(r);
        if rel == ViolationRelation::Incomparable {
            return rel;
        }
    }
    rel
}

/// What one constraint found wrong with a solution. The shape depends on
/// the constraint family: replica-set constraints name offending
/// replicas, capacity constraints the per-node overage, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Replicas standing on nodes the constraint forbids.
    ReplicaSet(BTreeSet<ReplicaIndex>),
    /// Partitions whose domain distribution is broken.
    PartitionSet(BTreeSet<PartitionIndex>),
    /// Load above capacity, per node (entries are always positive).
    NodeLoad(BTreeMap<NodeIndex, i64>),
    /// Applications spread over more nodes than allowed, with the
    /// overage per application.
    ScaleoutCount(BTreeMap<ApplicationIndex, i64>),
}

impl Violation {
    pub fn is_empty(&self) -> bool {
        match self {
            Violation::ReplicaSet(s) => s.is_empty(),
            Violation::PartitionSet(s) => s.is_empty(),
            Violation::NodeLoad(m) => m.is_empty(),
            Violation::ScaleoutCount(m) => m.is_empty(),
        }
    }

    pub fn compare(&self, other: &Violation) -> ViolationRelation {
        match (self, other) {
            (Violation::ReplicaSet(a), Violation::ReplicaSet(b)) => compare_sets(a, b),
            (Violation::PartitionSet(a), Violation::PartitionSet(b)) => compare_sets(a, b),
            (Violation::NodeLoad(a), Violation::NodeLoad(b)) => compare_maps(a, b),
            (Violation::ScaleoutCount(a), Violation::ScaleoutCount(b)) => compare_maps(a, b),
            _ => ViolationRelation::Incomparable,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::ReplicaSet(s) => write!(f, "{} replicas misplaced", s.len()),
            Violation::PartitionSet(s) => write!(f, "{} partitions unbalanced", s.len()),
            Violation::NodeLoad(m) => {
                let total: i64 = m.values().sum();
                write!(f, "{} over capacity on {} nodes", total, m.len())
            }
            Violation::ScaleoutCount(m) => write!(f, "{} applications over scaleout", m.len()),
        }
    }
}

/// Violations of one full check pass, keyed by constraint priority and
/// kind. Lists over the same placement are compared key-wise; a solution
/// is acceptable when its list is no worse than the one it started from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationList {
    entries: BTreeMap<(i32, ConstraintKind), Violation>,
}

impl ViolationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, priority: i32, kind: ConstraintKind, violation: Violation) {
        if !violation.is_empty() {
            self.entries.insert((priority, kind), violation);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, priority: i32, kind: ConstraintKind) -> Option<&Violation> {
        self.entries.get(&(priority, kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(i32, ConstraintKind), &Violation)> {
        self.entries.iter()
    }

    /// Key-wise partial-order comparison. A key missing on one side
    /// counts as an empty violation there.
    pub fn compare(&self, other: &ViolationList) -> ViolationRelation {
        let mut rel = ViolationRelation::Equal;
        let keys: BTreeSet<_> = self.entries.keys().chain(other.entries.keys()).collect();
        for key in keys {
            let r = match (self.entries.get(key), other.entries.get(key)) {
                (Some(a), Some(b)) => a.compare(b),
                (Some(_), None) => ViolationRelation::Greater,
                (None, Some(_)) => ViolationRelation::Smaller,
                (None, None) => ViolationRelation::Equal,
            };
            rel = rel.combine(r);
            if rel == ViolationRelation::Incomparable {
                return rel;
            }
        }
        rel
    }

    /// The non-regression test: this list introduces no violation absent
    /// from `other` and worsens none.
    pub fn is_no_worse_than(&self, other: &ViolationList) -> bool {
        matches!(
            self.compare(other),
            ViolationRelation::Smaller | ViolationRelation::Equal
        )
    }
}

impl std::fmt::Display for ViolationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "no violations");
        }
        for (i, ((priority, kind), violation)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{:?}@{}: {}", kind, priority, violation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicas(ids: &[usize]) -> Violation {
        Violation::ReplicaSet(ids.iter().map(|&i| ReplicaIndex::new(i)).collect())
    }

    #[test]
    fn test_subset_violation_is_smaller() {
        let a = replicas(&[1]);
        let b = replicas(&[1, 2]);
        assert_eq!(a.compare(&b), ViolationRelation::Smaller);
        assert_eq!(b.compare(&a), ViolationRelation::Greater);
        assert_eq!(a.compare(&a), ViolationRelation::Equal);
    }

    #[test]
    fn test_crossing_sets_are_incomparable() {
        let a = replicas(&[1, 3]);
        let b = replicas(&[1, 2]);
        assert_eq!(a.compare(&b), ViolationRelation::Incomparable);
    }

    #[test]
    fn test_node_load_compares_per_node() {
        let mut a = BTreeMap::new();
        a.insert(NodeIndex::new(0), 5);
        let mut b = BTreeMap::new();
        b.insert(NodeIndex::new(0), 5);
        b.insert(NodeIndex::new(1), 2);
        assert_eq!(
            Violation::NodeLoad(a.clone()).compare(&Violation::NodeLoad(b.clone())),
            ViolationRelation::Smaller
        );
        // Shrinking one node while growing another is incomparable.
        a.insert(NodeIndex::new(1), 4);
        b.insert(NodeIndex::new(0), 3);
        assert_eq!(
            Violation::NodeLoad(a).compare(&Violation::NodeLoad(b)),
            ViolationRelation::Incomparable
        );
    }

    #[test]
    fn test_list_missing_key_counts_as_empty() {
        let mut a = ViolationList::new();
        let mut b = ViolationList::new();
        b.insert(0, ConstraintKind::NodeCapacity, {
            let mut m = BTreeMap::new();
            m.insert(NodeIndex::new(0), 3);
            Violation::NodeLoad(m)
        });
        assert!(a.is_no_worse_than(&b));
        assert!(!b.is_no_worse_than(&a));

        a.insert(0, ConstraintKind::FaultDomain, replicas(&[0]));
        // New violation kind on one side, removed kind on the other.
        assert_eq!(a.compare(&b), ViolationRelation::Incomparable);
    }

    #[test]
    fn test_empty_violation_is_not_recorded() {
        let mut list = ViolationList::new();
        list.insert(0, ConstraintKind::FaultDomain, replicas(&[]));
        assert!(list.is_empty());
    }
}
