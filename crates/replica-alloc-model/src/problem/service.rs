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

use crate::common::{ApplicationIndex, DomainDistribution, NodeIndex, ServiceIndex, ServicePackageIndex};
use replica_alloc_core::prelude::LoadEntry;

/// Per-service placement policy: block lists, domain distribution,
/// affinity link, default replica loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
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
    primary_default_load: LoadEntry,
    secondary_default_load: LoadEntry,
    required_images: Vec<String>,
}

impl ServiceEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
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
        primary_default_load: LoadEntry,
        secondary_default_load: LoadEntry,
        required_images: Vec<String>,
    ) -> Self {
        Self {
            name,
            block_list,
            primary_block_list,
            on_every_node,
            fd_distribution,
            auto_switch_to_quorum_based_logic,
            affinity_parent,
            aligned_affinity,
            application,
            service_package,
            primary_default_load,
            secondary_default_load,
            required_images,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nodes this service may never be placed on.
    #[inline]
    pub fn block_list(&self) -> &[NodeIndex] {
        &self.block_list
    }

    /// Nodes this service's primary may never be placed on.
    #[inline]
    pub fn primary_block_list(&self) -> &[NodeIndex] {
        &self.primary_block_list
    }

    #[inline]
    pub fn is_node_blocked(&self, node: NodeIndex, is_primary: bool) -> bool {
        self.block_list.contains(&node)
            || (is_primary && self.primary_block_list.contains(&node))
    }

    #[inline]
    pub fn on_every_node(&self) -> bool {
        self.on_every_node
    }

    #[inline]
    pub fn fd_distribution(&self) -> DomainDistribution {
        self.fd_distribution
    }

    /// Services with many replicas relative to the domain count opt in to
    /// quorum-based spread instead of strict packing.
    #[inline]
    pub fn auto_switch_to_quorum_based_logic(&self) -> bool {
        self.auto_switch_to_quorum_based_logic
    }

    #[inline]
    pub fn affinity_parent(&self) -> Option<ServiceIndex> {
        self.affinity_parent
    }

    #[inline]
    pub fn aligned_affinity(&self) -> bool {
        self.aligned_affinity
    }

    #[inline]
    pub fn application(&self) -> Option<ApplicationIndex> {
        self.application
    }

    #[inline]
    pub fn service_package(&self) -> Option<ServicePackageIndex> {
        self.service_package
    }

    #[inline]
    pub fn primary_default_load(&self) -> &LoadEntry {
        &self.primary_default_load
    }

    #[inline]
    pub fn secondary_default_load(&self) -> &LoadEntry {
        &self.secondary_default_load
    }

    /// Container images a node must pull before it can host this
    /// service.
    #[inline]
    pub fn required_images(&self) -> &[String] {
        &self.required_images
    }
}

impl std::fmt::Display for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Service({})", self.name)
    }
}
