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

use replica_alloc_core::prelude::LoadEntry;

/// Application-level aggregation above partitions: total and per-node
/// capacities, load reservation, scale-out cap. A negative capacity entry
/// means "unlimited" for that metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEntry {
    name: String,
    total_capacity: LoadEntry,
    per_node_capacity: LoadEntry,
    reservation: LoadEntry,
    scaleout_count: Option<usize>,
}

impl ApplicationEntry {
    pub(crate) fn new(
        name: String,
        total_capacity: LoadEntry,
        per_node_capacity: LoadEntry,
        reservation: LoadEntry,
        scaleout_count: Option<usize>,
    ) -> Self {
        Self {
            name,
            total_capacity,
            per_node_capacity,
            reservation,
            scaleout_count,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn total_capacity(&self) -> &LoadEntry {
        &self.total_capacity
    }

    #[inline]
    pub fn per_node_capacity(&self) -> &LoadEntry {
        &self.per_node_capacity
    }

    /// Load the application reserves on every node it occupies, whether
    /// its replicas use it or not.
    #[inline]
    pub fn reservation(&self) -> &LoadEntry {
        &self.reservation
    }

    /// Maximum number of distinct nodes this application may span;
    /// `None` means unbounded.
    #[inline]
    pub fn scaleout_count(&self) -> Option<usize> {
        self.scaleout_count
    }

    #[inline]
    pub fn has_total_capacity(&self) -> bool {
        self.total_capacity.iter().any(|c| c >= 0)
    }

    #[inline]
    pub fn has_per_node_capacity(&self) -> bool {
        self.per_node_capacity.iter().any(|c| c >= 0)
    }

    #[inline]
    pub fn has_reservation(&self) -> bool {
        self.reservation.iter().any(|r| r > 0)
    }
}

impl std::fmt::Display for ApplicationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Application({})", self.name)
    }
}

/// A code/service package deployed onto nodes. Its footprint is charged
/// once per node no matter how many of its replicas share the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePackageEntry {
    name: String,
    node_load: LoadEntry,
}

impl ServicePackageEntry {
    pub(crate) fn new(name: String, node_load: LoadEntry) -> Self {
        Self { name, node_load }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-node footprint, charged on first residency only.
    #[inline]
    pub fn node_load(&self) -> &LoadEntry {
        &self.node_load
    }
}

impl std::fmt::Display for ServicePackageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServicePackage({})", self.name)
    }
}
