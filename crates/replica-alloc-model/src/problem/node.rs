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

use crate::common::NodeId;
use replica_alloc_core::prelude::LoadEntry;

/// One cluster node as seen by a single placement run. Immutable for the
/// duration of the run; load deltas live in the solution overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    id: NodeId,
    is_up: bool,
    total_capacities: LoadEntry,
    buffered_capacities: LoadEntry,
    base_loads: LoadEntry,
    should_disappear_loads: LoadEntry,
    fault_domain: usize,
    upgrade_domain: usize,
    is_throttled: bool,
    max_concurrent_builds: Option<usize>,
    is_deactivated: bool,
    hosted_images: Vec<String>,
}

impl NodeEntry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: NodeId,
        is_up: bool,
        total_capacities: LoadEntry,
        buffered_capacities: LoadEntry,
        base_loads: LoadEntry,
        should_disappear_loads: LoadEntry,
        fault_domain: usize,
        upgrade_domain: usize,
        is_throttled: bool,
        max_concurrent_builds: Option<usize>,
        is_deactivated: bool,
        hosted_images: Vec<String>,
    ) -> Self {
        Self {
            id,
            is_up,
            total_capacities,
            buffered_capacities,
            base_loads,
            should_disappear_loads,
            fault_domain,
            upgrade_domain,
            is_throttled,
            max_concurrent_builds,
            is_deactivated,
            hosted_images,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.is_up
    }

    #[inline]
    pub fn total_capacities(&self) -> &LoadEntry {
        &self.total_capacities
    }

    #[inline]
    pub fn buffered_capacities(&self) -> &LoadEntry {
        &self.buffered_capacities
    }

    /// Load from replicas that are not part of this placement run.
    #[inline]
    pub fn base_loads(&self) -> &LoadEntry {
        &self.base_loads
    }

    /// Load that is still on the node but belongs to replicas the
    /// orchestrator has already decided to remove.
    #[inline]
    pub fn should_disappear_loads(&self) -> &LoadEntry {
        &self.should_disappear_loads
    }

    /// Leaf index into the placement's fault-domain tree.
    #[inline]
    pub fn fault_domain(&self) -> usize {
        self.fault_domain
    }

    /// Leaf index into the placement's upgrade-domain tree.
    #[inline]
    pub fn upgrade_domain(&self) -> usize {
        self.upgrade_domain
    }

    #[inline]
    pub fn is_throttled(&self) -> bool {
        self.is_throttled
    }

    /// In-build cap when throttled; `None` means unlimited.
    #[inline]
    pub fn max_concurrent_builds(&self) -> Option<usize> {
        self.max_concurrent_builds
    }

    #[inline]
    pub fn is_deactivated(&self) -> bool {
        self.is_deactivated
    }

    /// Container images already present on the node.
    #[inline]
    pub fn hosted_images(&self) -> &[String] {
        &self.hosted_images
    }

    #[inline]
    pub fn hosts_image(&self, image: &str) -> bool {
        self.hosted_images.iter().any(|i| i == image)
    }

    /// Capacity vector used for a check: buffered when requested and the
    /// node has a buffered vector, total otherwise.
    #[inline]
    pub fn capacities(&self, use_buffered: bool) -> &LoadEntry {
        if use_buffered {
            &self.buffered_capacities
        } else {
            &self.total_capacities
        }
    }
}

impl std::fmt::Display for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} capacities={}",
            self.id,
            if self.is_up { "" } else { " (down)" },
            self.total_capacities
        )
    }
}
