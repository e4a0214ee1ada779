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

use crate::common::{
    ApplicationIndex, DomainKind, NodeIndex, PartitionIndex, ReplicaIndex, ServiceIndex,
    ServicePackageIndex,
};
use crate::problem::application::{ApplicationEntry, ServicePackageEntry};
use crate::problem::domain::DomainTree;
use crate::problem::node::NodeEntry;
use crate::problem::partition::PartitionEntry;
use crate::problem::replica::PlacementReplica;
use crate::problem::service::ServiceEntry;
use crate::settings::PlbSettings;
use std::collections::BTreeSet;

/// The arena for one scheduling pass: every entity of the run, referenced
/// by stable index, plus the static domain trees and the run settings.
/// Read-only once built; all proposed changes live in the solver's
/// solution overlay.
#[derive(Debug, Clone)]
pub struct Placement {
    pub(crate) metric_names: Vec<String>,
    pub(crate) nodes: Vec<NodeEntry>,
    pub(crate) services: Vec<ServiceEntry>,
    pub(crate) partitions: Vec<PartitionEntry>,
    pub(crate) replicas: Vec<PlacementReplica>,
    pub(crate) applications: Vec<ApplicationEntry>,
    pub(crate) service_packages: Vec<ServicePackageEntry>,
    pub(crate) fault_domain_tree: DomainTree,
    pub(crate) upgrade_domain_tree: DomainTree,
    pub(crate) partition_order: Vec<PartitionIndex>,
    pub(crate) application_partitions: Vec<Vec<PartitionIndex>>,
    pub(crate) upgraded_upgrade_domains: BTreeSet<usize>,
    pub(crate) settings: PlbSettings,
}

impl Placement {
    #[inline]
    pub fn metric_count(&self) -> usize {
        self.metric_names.len()
    }

    #[inline]
    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, index: NodeIndex) -> &NodeEntry {
        &self.nodes[index.get()]
    }

    #[inline]
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.nodes.len()).map(NodeIndex::new)
    }

    #[inline]
    pub fn up_node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_up())
            .map(|(i, _)| NodeIndex::new(i))
    }

    #[inline]
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    #[inline]
    pub fn service(&self, index: ServiceIndex) -> &ServiceEntry {
        &self.services[index.get()]
    }

    #[inline]
    pub fn partitions(&self) -> &[PartitionEntry] {
        &self.partitions
    }

    #[inline]
    pub fn partition(&self, index: PartitionIndex) -> &PartitionEntry {
        &self.partitions[index.get()]
    }

    #[inline]
    pub fn partition_indices(&self) -> impl Iterator<Item = PartitionIndex> {
        (0..self.partitions.len()).map(PartitionIndex::new)
    }

    /// Partitions in parent-before-child order.
    #[inline]
    pub fn partitions_in_order(&self) -> &[PartitionIndex] {
        &self.partition_order
    }

    #[inline]
    pub fn replicas(&self) -> &[PlacementReplica] {
        &self.replicas
    }

    #[inline]
    pub fn replica(&self, index: ReplicaIndex) -> &PlacementReplica {
        &self.replicas[index.get()]
    }

    #[inline]
    pub fn applications(&self) -> &[ApplicationEntry] {
        &self.applications
    }

    #[inline]
    pub fn application(&self, index: ApplicationIndex) -> &ApplicationEntry {
        &self.applications[index.get()]
    }

    #[inline]
    pub fn application_indices(&self) -> impl Iterator<Item = ApplicationIndex> {
        (0..self.applications.len()).map(ApplicationIndex::new)
    }

    /// Partitions belonging to services of the given application.
    #[inline]
    pub fn partitions_of_application(&self, app: ApplicationIndex) -> &[PartitionIndex] {
        &self.application_partitions[app.get()]
    }

    #[inline]
    pub fn service_packages(&self) -> &[ServicePackageEntry] {
        &self.service_packages
    }

    #[inline]
    pub fn service_package(&self, index: ServicePackageIndex) -> &ServicePackageEntry {
        &self.service_packages[index.get()]
    }

    #[inline]
    pub fn domain_tree(&self, kind: DomainKind) -> &DomainTree {
        match kind {
            DomainKind::Fault => &self.fault_domain_tree,
            DomainKind::Upgrade => &self.upgrade_domain_tree,
        }
    }

    /// Leaf domain of a node in the requested hierarchy.
    #[inline]
    pub fn node_leaf_domain(&self, node: NodeIndex, kind: DomainKind) -> usize {
        let n = self.node(node);
        match kind {
            DomainKind::Fault => n.fault_domain(),
            DomainKind::Upgrade => n.upgrade_domain(),
        }
    }

    /// True when the node sits in an upgrade domain whose rolling
    /// upgrade has already completed.
    #[inline]
    pub fn is_node_in_upgraded_domain(&self, node: NodeIndex) -> bool {
        self.upgraded_upgrade_domains
            .contains(&self.node_leaf_domain(node, DomainKind::Upgrade))
    }

    #[inline]
    pub fn settings(&self) -> &PlbSettings {
        &self.settings
    }

    /// The service owning a partition.
    #[inline]
    pub fn service_of_partition(&self, partition: PartitionIndex) -> &ServiceEntry {
        self.service(self.partition(partition).service())
    }

    /// The service owning a replica.
    #[inline]
    pub fn service_of_replica(&self, replica: ReplicaIndex) -> &ServiceEntry {
        self.service_of_partition(self.replica(replica).partition())
    }

    #[inline]
    pub fn application_of_partition(&self, partition: PartitionIndex) -> Option<ApplicationIndex> {
        self.service_of_partition(partition).application()
    }

    #[inline]
    pub fn service_package_of_partition(
        &self,
        partition: PartitionIndex,
    ) -> Option<ServicePackageIndex> {
        self.service_of_partition(partition).service_package()
    }

    /// All new (yet unplaced) replicas, in stable order.
    pub fn new_replica_indices(&self) -> Vec<ReplicaIndex> {
        self.replicas
            .iter()
            .filter(|r| r.is_new())
            .map(|r| r.index())
            .collect()
    }

    /// Count of replicas eligible to move during balancing.
    pub fn movable_replica_count(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| !r.is_new() && r.is_movable())
            .count()
    }
}
