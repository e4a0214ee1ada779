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

use crate::common::{NodeIndex, PartitionIndex, ReplicaIndex, ReplicaRole};
use replica_alloc_core::prelude::LoadEntry;

/// One (partition, role) slot. Identity is the stable `ReplicaIndex`, so
/// replica sets iterate deterministically. A replica with no base node is
/// a new replica the run must place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementReplica {
    index: ReplicaIndex,
    partition: PartitionIndex,
    role: ReplicaRole,
    base_node: Option<NodeIndex>,
    is_movable: bool,
    is_to_be_dropped: bool,
    is_in_transition: bool,
    should_disappear: bool,
    is_in_build: bool,
    load: LoadEntry,
}

impl PlacementReplica {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: ReplicaIndex,
        partition: PartitionIndex,
        role: ReplicaRole,
        base_node: Option<NodeIndex>,
        is_movable: bool,
        is_to_be_dropped: bool,
        is_in_transition: bool,
        should_disappear: bool,
        is_in_build: bool,
        load: LoadEntry,
    ) -> Self {
        Self {
            index,
            partition,
            role,
            base_node,
            is_movable,
            is_to_be_dropped,
            is_in_transition,
            should_disappear,
            is_in_build,
            load,
        }
    }

    #[inline]
    pub fn index(&self) -> ReplicaIndex {
        self.index
    }

    #[inline]
    pub fn partition(&self) -> PartitionIndex {
        self.partition
    }

    /// Role the replica entered the run with. Role changes during the run
    /// (swap, upgrade promotion) live in the solution's role overlay.
    #[inline]
    pub fn role(&self) -> ReplicaRole {
        self.role
    }

    #[inline]
    pub fn base_node(&self) -> Option<NodeIndex> {
        self.base_node
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        self.base_node.is_none() && !self.is_to_be_dropped
    }

    #[inline]
    pub fn is_movable(&self) -> bool {
        self.is_movable
    }

    #[inline]
    pub fn is_to_be_dropped(&self) -> bool {
        self.is_to_be_dropped
    }

    #[inline]
    pub fn is_in_transition(&self) -> bool {
        self.is_in_transition
    }

    /// Still occupying its node, but already scheduled to leave.
    #[inline]
    pub fn should_disappear(&self) -> bool {
        self.should_disappear
    }

    /// Counts against a throttled node's concurrent-build cap.
    #[inline]
    pub fn is_in_build(&self) -> bool {
        self.is_in_build
    }

    #[inline]
    pub fn is_primary(&self) -> bool {
        self.role.is_primary()
    }

    #[inline]
    pub fn is_stand_by(&self) -> bool {
        self.role.is_stand_by()
    }

    #[inline]
    pub fn load(&self) -> &LoadEntry {
        &self.load
    }

    /// Whether this replica participates in domain-distribution counting.
    #[inline]
    pub fn counts_for_distribution(&self) -> bool {
        !self.is_stand_by() && !self.is_to_be_dropped && !self.should_disappear
    }
}

impl std::fmt::Display for PlacementReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} of {}", self.index, self.role, self.partition)
    }
}
