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
    ApplicationIndex, DomainDistribution, NodeId, NodeIndex, PartitionId, PartitionIndex,
    ReplicaIndex, ReplicaRole, ServiceIndex, ServicePackageIndex,
};
use crate::problem::application::{ApplicationEntry, ServicePackageEntry};
use crate::problem::domain::DomainTree;
use crate::problem::err::{
    AffinityCycleError, DuplicateNodeIdError, MetricArityMismatchError, PlacementBuildError,
    UnknownNodeError, UnknownServiceError,
};
use crate::problem::node::NodeEntry;
use crate::problem::partition::PartitionEntry;
use crate::problem::prob::Placement;
use crate::problem::replica::PlacementReplica;
use crate::problem::service::ServiceEntry;
use crate::settings::PlbSettings;
use replica_alloc_core::prelude::LoadEntry;
use std::collections::BTreeSet;

/// Declarative node description consumed by [`PlacementBuilder::add_node`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    id: u64,
    is_up: bool,
    total_capacities: Vec<i64>,
    buffered_capacities: Option<Vec<i64>>,
    base_loads: Option<Vec<i64>>,
    should_disappear_loads: Option<Vec<i64>>,
    fault_domain_path: Vec<String>,
    upgrade_domain: Option<String>,
    is_throttled: bool,
    max_concurrent_builds: Option<usize>,
    is_deactivated: bool,
    hosted_images: Vec<String>,
}

impl NodeSpec {
    pub fn new(id: u64, total_capacities: Vec<i64>) -> Self {
        Self {
            id,
            is_up: true,
            total_capacities,
            buffered_capacities: None,
            base_loads: None,
            should_disappear_loads: None,
            fault_domain_path: Vec::new(),
            upgrade_domain: None,
            is_throttled: false,
            max_concurrent_builds: None,
            is_deactivated: false,
            hosted_images: Vec::new(),
        }
    }

    pub fn down(mut self) -> Self {
        self.is_up = false;
        self
    }

    pub fn with_buffered_capacities(mut self, caps: Vec<i64>) -> Self {
        self.buffered_capacities = Some(caps);
        self
    }

    pub fn with_base_loads(mut self, loads: Vec<i64>) -> Self {
        self.base_loads = Some(loads);
        self
    }

    pub fn with_should_disappear_loads(mut self, loads: Vec<i64>) -> Self {
        self.should_disappear_loads = Some(loads);
        self
    }

    pub fn with_fault_domain<S: Into<String>>(
        mut self,
        path: impl IntoIterator<Item = S>,
    ) -> Self {
        self.fault_domain_path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_upgrade_domain(mut self, ud: impl Into<String>) -> Self {
        self.upgrade_domain = Some(ud.into());
        self
    }

    pub fn throttled(mut self, max_concurrent_builds: usize) -> Self {
        self.is_throttled = true;
        self.max_concurrent_builds = Some(max_concurrent_builds);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_deactivated = true;
        self
    }

    pub fn with_hosted_images<S: Into<String>>(
        mut self,
        images: impl IntoIterator<Item = S>,
    ) -> Self {
        self.hosted_images = images.into_iter().map(Into::into).collect();
        self
    }
}

/// Declarative service description.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    name: String,
    block_list: Vec<NodeIndex>,
    primary_block_list: Vec<NodeIndex>,
    on_every_node: bool,
    fd_distribution: DomainDistribution,
    auto_switch_to_quorum_based_logic: bool,
    affinity_parent: Option<ServiceIndex>,
    aligned_affinity: bool,
    application: Option<ApplicationIndex>,
    service_package: Option<ServicePackageIndex>,
    primary_default_load: Option<Vec<i64>>,
    secondary_default_load: Option<Vec<i64>>,
    required_images: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block_list: Vec::new(),
            primary_block_list: Vec::new(),
            on_every_node: false,
            fd_distribution: DomainDistribution::default(),
            auto_switch_to_quorum_based_logic: false,
            affinity_parent: None,
            aligned_affinity: false,
            application: None,
            service_package: None,
            primary_default_load: None,
            secondary_default_load: None,
            required_images: Vec::new(),
        }
    }

    pub fn with_block_list(mut self, nodes: Vec<NodeIndex>) -> Self {
        self.block_list = nodes;
        self
    }

    pub fn with_primary_block_list(mut self, nodes: Vec<NodeIndex>) -> Self {
        self.primary_block_list = nodes;
        self
    }

    pub fn on_every_node(mut self) -> Self {
        self.on_every_node = true;
        self
    }

    pub fn with_fd_distribution(mut self, distribution: DomainDistribution) -> Self {
        self.fd_distribution = distribution;
        self
    }

    pub fn auto_switch_to_quorum(mut self) -> Self {
        self.auto_switch_to_quorum_based_logic = true;
        self
    }

    pub fn with_affinity_parent(mut self, parent: ServiceIndex) -> Self {
        self.affinity_parent = Some(parent);
        self
    }

    pub fn aligned(mut self) -> Self {
        self.aligned_affinity = true;
        self
    }

    pub fn with_application(mut self, app: ApplicationIndex) -> Self {
        self.application = Some(app);
        self
    }

    pub fn with_service_package(mut self, sp: ServicePackageIndex) -> Self {
        self.service_package = Some(sp);
        self
    }

    pub fn with_default_loads(mut self, primary: Vec<i64>, secondary: Vec<i64>) -> Self {
        self.primary_default_load = Some(primary);
        self.secondary_default_load = Some(secondary);
        self
    }

    pub fn with_required_images<S: Into<String>>(
        mut self,
        images: impl IntoIterator<Item = S>,
    ) -> Self {
        self.required_images = images.into_iter().map(Into::into).collect();
        self
    }
}

/// Declarative application description.
#[derive(Debug, Clone)]
pub struct ApplicationSpec {
    name: String,
    total_capacity: Option<Vec<i64>>,
    per_node_capacity: Option<Vec<i64>>,
    reservation: Option<Vec<i64>>,
    scaleout_count: Option<usize>,
}

impl ApplicationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_capacity: None,
            per_node_capacity: None,
            reservation: None,
            scaleout_count: None,
        }
    }

    pub fn with_total_capacity(mut self, cap: Vec<i64>) -> Self {
        self.total_capacity = Some(cap);
        self
    }

    pub fn with_per_node_capacity(mut self, cap: Vec<i64>) -> Self {
        self.per_node_capacity = Some(cap);
        self
    }

    pub fn with_reservation(mut self, reservation: Vec<i64>) -> Self {
        self.reservation = Some(reservation);
        self
    }

    pub fn with_scaleout(mut self, count: usize) -> Self {
        self.scaleout_count = Some(count);
        self
    }
}

/// One replica slot inside a [`PartitionSpec`].
#[derive(Debug, Clone)]
pub struct ReplicaSpec {
    role: ReplicaRole,
    node: Option<NodeIndex>,
    is_movable: bool,
    is_to_be_dropped: bool,
    is_in_transition: bool,
    should_disappear: bool,
    is_in_build: bool,
    load: Option<Vec<i64>>,
}

impl ReplicaSpec {
    /// An existing replica residing on `node`.
    pub fn existing(role: ReplicaRole, node: NodeIndex) -> Self {
        Self {
            role,
            node: Some(node),
            is_movable: true,
            is_to_be_dropped: false,
            is_in_transition: false,
            should_disappear: false,
            is_in_build: false,
            load: None,
        }
    }

    /// A replica the run must create and place.
    pub fn new_replica(role: ReplicaRole) -> Self {
        Self {
            role,
            node: None,
            is_movable: true,
            is_to_be_dropped: false,
            is_in_transition: false,
            should_disappear: false,
            is_in_build: true,
            load: None,
        }
    }

    pub fn unmovable(mut self) -> Self {
        self.is_movable = false;
        self
    }

    pub fn to_be_dropped(mut self) -> Self {
        self.is_to_be_dropped = true;
        self
    }

    pub fn in_transition(mut self) -> Self {
        self.is_in_transition = true;
        self
    }

    pub fn disappearing(mut self) -> Self {
        self.should_disappear = true;
        self
    }

    pub fn in_build(mut self) -> Self {
        self.is_in_build = true;
        self
    }

    pub fn with_load(mut self, load: Vec<i64>) -> Self {
        self.load = Some(load);
        self
    }
}

/// Declarative partition description.
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    id: u64,
    service: ServiceIndex,
    target_replica_set_size: usize,
    replicas: Vec<ReplicaSpec>,
    is_in_upgrade: bool,
    primary_upgrade_location: Option<NodeIndex>,
    secondary_upgrade_locations: Vec<NodeIndex>,
    standby_locations: Vec<NodeIndex>,
    partially_place: bool,
}

impl PartitionSpec {
    pub fn new(id: u64, service: ServiceIndex, target_replica_set_size: usize) -> Self {
        Self {
            id,
            service,
            target_replica_set_size,
            replicas: Vec::new(),
            is_in_upgrade: false,
            primary_upgrade_location: None,
            secondary_upgrade_locations: Vec::new(),
            standby_locations: Vec::new(),
            partially_place: true,
        }
    }

    pub fn with_replica(mut self, replica: ReplicaSpec) -> Self {
        self.replicas.push(replica);
        self
    }

    /// Appends `count` new secondary replicas (the common creation shape).
    pub fn with_new_replicas(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.replicas.push(ReplicaSpec::new_replica(ReplicaRole::Secondary));
        }
        self
    }

    pub fn in_upgrade(mut self) -> Self {
        self.is_in_upgrade = true;
        self
    }

    pub fn with_primary_upgrade_location(mut self, node: NodeIndex) -> Self {
        self.primary_upgrade_location = Some(node);
        self
    }

    pub fn with_secondary_upgrade_locations(mut self, nodes: Vec<NodeIndex>) -> Self {
        self.secondary_upgrade_locations = nodes;
        self
    }

    pub fn with_standby_locations(mut self, nodes: Vec<NodeIndex>) -> Self {
        self.standby_locations = nodes;
        self
    }

    pub fn no_partial_place(mut self) -> Self {
        self.partially_place = false;
        self
    }
}

/// Validating builder for a [`Placement`] arena.
#[derive(Debug)]
pub struct PlacementBuilder {
    metric_names: Vec<String>,
    settings: PlbSettings,
    nodes: Vec<NodeEntry>,
    node_ids: Vec<NodeId>,
    services: Vec<ServiceEntry>,
    partitions: Vec<PartitionEntry>,
    replicas: Vec<PlacementReplica>,
    applications: Vec<ApplicationEntry>,
    service_packages: Vec<ServicePackageEntry>,
    fault_domain_tree: DomainTree,
    upgrade_domain_tree: DomainTree,
    upgraded_upgrade_domains: BTreeSet<usize>,
}

impl PlacementBuilder {
    pub fn new(metric_names: Vec<String>, settings: PlbSettings) -> Self {
        Self {
            metric_names,
            settings,
            nodes: Vec::new(),
            node_ids: Vec::new(),
            services: Vec::new(),
            partitions: Vec::new(),
            replicas: Vec::new(),
            applications: Vec::new(),
            service_packages: Vec::new(),
            fault_domain_tree: DomainTree::new(),
            upgrade_domain_tree: DomainTree::new(),
            upgraded_upgrade_domains: BTreeSet::new(),
        }
    }

    /// Records that the named upgrade domain has finished its rolling
    /// upgrade. Nodes in it become preferred restoration targets.
    pub fn mark_upgrade_domain_upgraded(&mut self, ud: impl Into<String>) {
        let leaf = self.upgrade_domain_tree.ensure_path(&[ud.into()]);
        self.upgraded_upgrade_domains.insert(leaf);
    }

    #[inline]
    fn metric_count(&self) -> usize {
        self.metric_names.len()
    }

    fn check_arity(&self, what: &str, v: &[i64]) -> Result<(), MetricArityMismatchError> {
        if v.len() != self.metric_count() {
            return Err(MetricArityMismatchError::new(
                what,
                self.metric_count(),
                v.len(),
            ));
        }
        Ok(())
    }

    fn load_or_zero(&self, v: Option<Vec<i64>>, what: &str) -> Result<LoadEntry, MetricArityMismatchError> {
        match v {
            Some(v) => {
                self.check_arity(what, &v)?;
                Ok(LoadEntry::from_values(v))
            }
            None => Ok(LoadEntry::zeroed(self.metric_count())),
        }
    }

    fn capacity_or_unlimited(
        &self,
        v: Option<Vec<i64>>,
        what: &str,
    ) -> Result<LoadEntry, MetricArityMismatchError> {
        match v {
            Some(v) => {
                self.check_arity(what, &v)?;
                Ok(LoadEntry::from_values(v))
            }
            None => Ok(LoadEntry::from_values(vec![-1; self.metric_count()])),
        }
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeIndex, PlacementBuildError> {
        let id = NodeId::new(spec.id);
        if self.node_ids.contains(&id) {
            return Err(DuplicateNodeIdError::new(id).into());
        }
        self.check_arity("node total capacity", &spec.total_capacities)?;
        let total = LoadEntry::from_values(spec.total_capacities);
        let buffered = match spec.buffered_capacities {
            Some(v) => {
                self.check_arity("node buffered capacity", &v)?;
                LoadEntry::from_values(v)
            }
            None => total.clone(),
        };
        let base_loads = self.load_or_zero(spec.base_loads, "node base load")?;
        let disappearing =
            self.load_or_zero(spec.should_disappear_loads, "node disappearing load")?;

        let index = NodeIndex::new(self.nodes.len());
        // A node with no stated fault domain gets its own leaf, so the
        // packing math sees one domain per such node.
        let fd_path: Vec<String> = if spec.fault_domain_path.is_empty() {
            vec![format!("fd:{}", spec.id)]
        } else {
            spec.fault_domain_path
        };
        let ud_name = spec
            .upgrade_domain
            .unwrap_or_else(|| format!("ud:{}", spec.id));
        let fd_leaf = self.fault_domain_tree.ensure_path(&fd_path);
        let ud_leaf = self.upgrade_domain_tree.ensure_path(&[ud_name]);
        if spec.is_up {
            self.fault_domain_tree.record_node(fd_leaf);
            self.upgrade_domain_tree.record_node(ud_leaf);
        }

        self.nodes.push(NodeEntry::new(
            id,
            spec.is_up,
            total,
            buffered,
            base_loads,
            disappearing,
            fd_leaf,
            ud_leaf,
            spec.is_throttled,
            spec.max_concurrent_builds,
            spec.is_deactivated,
            spec.hosted_images,
        ));
        self.node_ids.push(id);
        Ok(index)
    }

    pub fn add_application(
        &mut self,
        spec: ApplicationSpec,
    ) -> Result<ApplicationIndex, PlacementBuildError> {
        let total = self.capacity_or_unlimited(spec.total_capacity, "application total capacity")?;
        let per_node =
            self.capacity_or_unlimited(spec.per_node_capacity, "application per-node capacity")?;
        let reservation = self.load_or_zero(spec.reservation, "application reservation")?;
        let index = ApplicationIndex::new(self.applications.len());
        self.applications.push(ApplicationEntry::new(
            spec.name,
            total,
            per_node,
            reservation,
            spec.scaleout_count,
        ));
        Ok(index)
    }

    pub fn add_service_package(
        &mut self,
        name: impl Into<String>,
        node_load: Vec<i64>,
    ) -> Result<ServicePackageIndex, PlacementBuildError> {
        self.check_arity("service package load", &node_load)?;
        let index = ServicePackageIndex::new(self.service_packages.len());
        self.service_packages
            .push(ServicePackageEntry::new(name.into(), LoadEntry::from_values(node_load)));
        Ok(index)
    }

    pub fn add_service(&mut self, spec: ServiceSpec) -> Result<ServiceIndex, PlacementBuildError> {
        for &n in spec.block_list.iter().chain(spec.primary_block_list.iter()) {
            if n.get() >= self.nodes.len() {
                return Err(UnknownNodeError::new(n).into());
            }
        }
        if let Some(parent) = spec.affinity_parent {
            if parent.get() >= self.services.len() {
                return Err(UnknownServiceError::new(parent).into());
            }
        }
        let primary = self.load_or_zero(spec.primary_default_load, "service primary load")?;
        let secondary = self.load_or_zero(spec.secondary_default_load, "service secondary load")?;
        let index = ServiceIndex::new(self.services.len());
        self.services.push(ServiceEntry::new(
            spec.name,
            spec.block_list,
            spec.primary_block_list,
            spec.on_every_node,
            spec.fd_distribution,
            spec.auto_switch_to_quorum_based_logic,
            spec.affinity_parent,
            spec.aligned_affinity,
            spec.application,
            spec.service_package,
            primary,
            secondary,
            spec.required_images,
        ));
        Ok(index)
    }

    pub fn add_partition(
        &mut self,
        spec: PartitionSpec,
    ) -> Result<PartitionIndex, PlacementBuildError> {
        if spec.service.get() >= self.services.len() {
            return Err(UnknownServiceError::new(spec.service).into());
        }
        for &n in spec
            .secondary_upgrade_locations
            .iter()
            .chain(spec.standby_locations.iter())
            .chain(spec.primary_upgrade_location.iter())
        {
            if n.get() >= self.nodes.len() {
                return Err(UnknownNodeError::new(n).into());
            }
        }

        let partition_index = PartitionIndex::new(self.partitions.len());
        let mut replica_indices = Vec::with_capacity(spec.replicas.len());
        let mut new_count = 0usize;
        for r in spec.replicas {
            if let Some(n) = r.node {
                if n.get() >= self.nodes.len() {
                    return Err(UnknownNodeError::new(n).into());
                }
            } else {
                new_count += 1;
            }
            let load = match r.load {
                Some(v) => {
                    self.check_arity("replica load", &v)?;
                    LoadEntry::from_values(v)
                }
                None => {
                    let service = &self.services[spec.service.get()];
                    if r.role.is_primary() {
                        service.primary_default_load().clone()
                    } else {
                        service.secondary_default_load().clone()
                    }
                }
            };
            let replica_index = ReplicaIndex::new(self.replicas.len());
            self.replicas.push(PlacementReplica::new(
                replica_index,
                partition_index,
                r.role,
                r.node,
                r.is_movable,
                r.is_to_be_dropped,
                r.is_in_transition,
                r.should_disappear,
                r.is_in_build,
                load,
            ));
            replica_indices.push(replica_index);
        }

        self.partitions.push(PartitionEntry::new(
            PartitionId::new(spec.id),
            spec.service,
            spec.target_replica_set_size,
            replica_indices,
            new_count,
            0, // order assigned in build()
            None,
            spec.is_in_upgrade,
            spec.primary_upgrade_location,
            spec.secondary_upgrade_locations,
            spec.standby_locations,
            spec.partially_place,
        ));
        Ok(partition_index)
    }

    /// Affinity depth of a service: 0 without a parent, parent + 1
    /// otherwise. Detects cycles.
    fn affinity_depth(&self, service: ServiceIndex) -> Result<usize, AffinityCycleError> {
        let mut depth = 0usize;
        let mut current = self.services[service.get()].affinity_parent();
        while let Some(parent) = current {
            depth += 1;
            if depth > self.services.len() {
                return Err(AffinityCycleError::new(service));
            }
            current = self.services[parent.get()].affinity_parent();
        }
        Ok(depth)
    }

    pub fn build(mut self) -> Result<Placement, PlacementBuildError> {
        // Parent-before-child order: sort partitions by affinity depth of
        // their service, ties by insertion order.
        let mut order: Vec<PartitionIndex> =
            (0..self.partitions.len()).map(PartitionIndex::new).collect();
        let mut depths = Vec::with_capacity(self.partitions.len());
        for p in &self.partitions {
            depths.push(self.affinity_depth(p.service())?);
        }
        order.sort_by_key(|p| (depths[p.get()], p.get()));
        for (rank, p) in order.iter().enumerate() {
            self.partitions[p.get()].set_order(rank);
        }

        // Link each child partition to the first partition of its
        // affinity-parent service.
        for i in 0..self.partitions.len() {
            let service = self.partitions[i].service();
            if let Some(parent_service) = self.services[service.get()].affinity_parent() {
                let parent = self
                    .partitions
                    .iter()
                    .enumerate()
                    .find(|(_, p)| p.service() == parent_service)
                    .map(|(j, _)| PartitionIndex::new(j));
                self.partitions[i].set_parent_partition(parent);
            }
        }

        let mut application_partitions = vec![Vec::new(); self.applications.len()];
        for (i, p) in self.partitions.iter().enumerate() {
            if let Some(app) = self.services[p.service().get()].application() {
                application_partitions[app.get()].push(PartitionIndex::new(i));
            }
        }

        Ok(Placement {
            metric_names: self.metric_names,
            nodes: self.nodes,
            services: self.services,
            partitions: self.partitions,
            replicas: self.replicas,
            applications: self.applications,
            service_packages: self.service_packages,
            fault_domain_tree: self.fault_domain_tree,
            upgrade_domain_tree: self.upgrade_domain_tree,
            partition_order: order,
            application_partitions,
            upgraded_upgrade_domains: self.upgraded_upgrade_domains,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_builder() -> PlacementBuilder {
        let mut b = PlacementBuilder::new(vec!["cpu".into()], PlbSettings::default());
        b.add_node(NodeSpec::new(0, vec![10])).unwrap();
        b.add_node(NodeSpec::new(1, vec![10])).unwrap();
        b
    }

    #[test]
    fn test_duplicate_node_id_is_rejected() {
        let mut b = two_node_builder();
        let err = b.add_node(NodeSpec::new(0, vec![10])).unwrap_err();
        assert!(matches!(err, PlacementBuildError::DuplicateNodeId(_)));
    }

    #[test]
    fn test_capacity_arity_is_checked() {
        let mut b = two_node_builder();
        let err = b.add_node(NodeSpec::new(2, vec![10, 20])).unwrap_err();
        assert!(matches!(err, PlacementBuildError::MetricArityMismatch(_)));
    }

    #[test]
    fn test_down_node_not_counted_in_domain_tree() {
        let mut b = PlacementBuilder::new(vec!["cpu".into()], PlbSettings::default());
        b.add_node(NodeSpec::new(0, vec![10]).with_fault_domain(["fd0"]))
            .unwrap();
        b.add_node(NodeSpec::new(1, vec![10]).with_fault_domain(["fd0"]).down())
            .unwrap();
        let placement = b.build().unwrap();
        let tree = placement.domain_tree(crate::common::DomainKind::Fault);
        let leaf = placement.node(NodeIndex::new(0)).fault_domain();
        assert_eq!(tree.node_count(leaf), 1);
    }

    #[test]
    fn test_upgraded_domain_marking_reaches_member_nodes() {
        let mut b = PlacementBuilder::new(vec!["cpu".into()], PlbSettings::default());
        b.add_node(NodeSpec::new(0, vec![10]).with_upgrade_domain("ud0"))
            .unwrap();
        b.add_node(NodeSpec::new(1, vec![10]).with_upgrade_domain("ud1"))
            .unwrap();
        b.mark_upgrade_domain_upgraded("ud0");
        let placement = b.build().unwrap();
        assert!(placement.is_node_in_upgraded_domain(NodeIndex::new(0)));
        assert!(!placement.is_node_in_upgraded_domain(NodeIndex::new(1)));
    }

    #[test]
    fn test_block_list_must_reference_known_nodes() {
        let mut b = two_node_builder();
        let err = b
            .add_service(ServiceSpec::new("svc").with_block_list(vec![NodeIndex::new(9)]))
            .unwrap_err();
        assert!(matches!(err, PlacementBuildError::UnknownNode(_)));
    }

    #[test]
    fn test_replica_defaults_come_from_service() {
        let mut b = two_node_builder();
        let svc = b
            .add_service(ServiceSpec::new("svc").with_default_loads(vec![5], vec![3]))
            .unwrap();
        b.add_partition(
            PartitionSpec::new(0, svc, 2)
                .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
        )
        .unwrap();
        let placement = b.build().unwrap();
        assert_eq!(placement.replica(ReplicaIndex::new(0)).load().get(0), 5);
        assert_eq!(placement.replica(ReplicaIndex::new(1)).load().get(0), 3);
    }

    #[test]
    fn test_parent_partitions_order_before_children() {
        let mut b = two_node_builder();
        let parent = b.add_service(ServiceSpec::new("parent")).unwrap();
        let child = b
            .add_service(ServiceSpec::new("child").with_affinity_parent(parent))
            .unwrap();
        // Insert the child partition first; order must still put the
        // parent partition ahead.
        let child_partition = b
            .add_partition(PartitionSpec::new(0, child, 1).with_new_replicas(1))
            .unwrap();
        let parent_partition = b
            .add_partition(PartitionSpec::new(1, parent, 1).with_new_replicas(1))
            .unwrap();
        let placement = b.build().unwrap();
        let order = placement.partitions_in_order();
        assert_eq!(order[0], parent_partition);
        assert_eq!(order[1], child_partition);
        assert_eq!(
            placement.partition(child_partition).parent_partition(),
            Some(parent_partition)
        );
    }

    #[test]
    fn test_new_replica_count() {
        let mut b = two_node_builder();
        let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
        let p = b
            .add_partition(
                PartitionSpec::new(0, svc, 3)
                    .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
                    .with_new_replicas(2),
            )
            .unwrap();
        let placement = b.build().unwrap();
        assert_eq!(placement.partition(p).new_replica_count(), 2);
        assert_eq!(placement.partition(p).existing_replica_count(), 1);
    }
}
