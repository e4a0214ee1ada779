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

use crate::common::{NodeIndex, PartitionId, PartitionIndex, ReplicaIndex, ServiceIndex};

/// One service partition: target size, its replicas (existing and new),
/// and upgrade bookkeeping. Mutated only through the solution overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    id: PartitionId,
    service: ServiceIndex,
    target_replica_set_size: usize,
    replicas: Vec<ReplicaIndex>,
    new_replica_count: usize,
    order: usize,
    parent_partition: Option<PartitionIndex>,
    is_in_upgrade: bool,
    primary_upgrade_location: Option<NodeIndex>,
    secondary_upgrade_locations: Vec<NodeIndex>,
    standby_locations: Vec<NodeIndex>,
    partially_place: bool,
}

impl PartitionEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PartitionId,
        service: ServiceIndex,
        target_replica_set_size: usize,
        replicas: Vec<ReplicaIndex>,
        new_replica_count: usize,
        order: usize,
        parent_partition: Option<PartitionIndex>,
        is_in_upgrade: bool,
        primary_upgrade_location: Option<NodeIndex>,
        secondary_upgrade_locations: Vec<NodeIndex>,
        standby_locations: Vec<NodeIndex>,
        partially_place: bool,
    ) -> Self {
        Self {
            id,
            service,
            target_replica_set_size,
            replicas,
            new_replica_count,
            order,
            parent_partition,
            is_in_upgrade,
            primary_upgrade_location,
            secondary_upgrade_locations,
            standby_locations,
            partially_place,
        }
    }

    #[inline]
    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    #[inline]
    pub(crate) fn set_parent_partition(&mut self, parent: Option<PartitionIndex>) {
        self.parent_partition = parent;
    }

    #[inline]
    pub fn id(&self) -> PartitionId {
        self.id
    }

    #[inline]
    pub fn service(&self) -> ServiceIndex {
        self.service
    }

    #[inline]
    pub fn target_replica_set_size(&self) -> usize {
        self.target_replica_set_size
    }

    /// All replica slots of this partition, existing and new, in stable
    /// index order.
    #[inline]
    pub fn replicas(&self) -> &[ReplicaIndex] {
        &self.replicas
    }

    #[inline]
    pub fn new_replica_count(&self) -> usize {
        self.new_replica_count
    }

    #[inline]
    pub fn existing_replica_count(&self) -> usize {
        self.replicas.len() - self.new_replica_count
    }

    /// Parent-before-child iteration rank, assigned by the builder.
    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    /// First partition of the affinity-parent service, when this
    /// partition's service has an affinity link.
    #[inline]
    pub fn parent_partition(&self) -> Option<PartitionIndex> {
        self.parent_partition
    }

    #[inline]
    pub fn is_in_upgrade(&self) -> bool {
        self.is_in_upgrade
    }

    /// Node the orchestrator wants the primary restored to after upgrade.
    #[inline]
    pub fn primary_upgrade_location(&self) -> Option<NodeIndex> {
        self.primary_upgrade_location
    }

    #[inline]
    pub fn secondary_upgrade_locations(&self) -> &[NodeIndex] {
        &self.secondary_upgrade_locations
    }

    #[inline]
    pub fn standby_locations(&self) -> &[NodeIndex] {
        &self.standby_locations
    }

    /// Whether placing a strict subset of the missing replicas is
    /// acceptable for this partition.
    #[inline]
    pub fn partially_place(&self) -> bool {
        self.partially_place
    }

    #[inline]
    pub fn is_target_one(&self) -> bool {
        self.target_replica_set_size == 1
    }

    #[inline]
    pub fn is_in_single_replica_upgrade(&self) -> bool {
        self.is_in_upgrade && self.is_target_one()
    }
}

impl std::fmt::Display for PartitionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} target={} replicas={}",
            self.id,
            self.target_replica_set_size,
            self.replicas.len()
        )
    }
}
