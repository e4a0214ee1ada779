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

pub trait IdentifierMarkerName: Copy {
    const NAME: &'static str;
}

/// A typed wrapper around an externally assigned identifier (the id the
/// orchestrator knows an entity by, as opposed to its arena index).
#[repr(transparent)]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier<I, U>(I, core::marker::PhantomData<U>);

impl<I, U> Identifier<I, U> {
    #[inline]
    pub fn new(id: I) -> Self {
        Self(id, core::marker::PhantomData)
    }

    #[inline]
    pub fn value(&self) -> &I {
        &self.0
    }

    #[inline]
    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<I, U> std::fmt::Display for Identifier<I, U>
where
    I: std::fmt::Display,
    U: IdentifierMarkerName,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", U::NAME, self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdMarker;

impl IdentifierMarkerName for NodeIdMarker {
    const NAME: &'static str = "NodeId";
}

pub type NodeId = Identifier<u64, NodeIdMarker>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionIdMarker;

impl IdentifierMarkerName for PartitionIdMarker {
    const NAME: &'static str = "PartitionId";
}

pub type PartitionId = Identifier<u64, PartitionIdMarker>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeIndex({})", self.0)
    }
}

impl From<usize> for NodeIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceIndex(pub usize);

impl ServiceIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ServiceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceIndex({})", self.0)
    }
}

impl From<usize> for ServiceIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionIndex(pub usize);

impl PartitionIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PartitionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PartitionIndex({})", self.0)
    }
}

impl From<usize> for PartitionIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaIndex(pub usize);

impl ReplicaIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ReplicaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplicaIndex({})", self.0)
    }
}

impl From<usize> for ReplicaIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplicationIndex(pub usize);

impl ApplicationIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ApplicationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApplicationIndex({})", self.0)
    }
}

impl From<usize> for ApplicationIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServicePackageIndex(pub usize);

impl ServicePackageIndex {
    #[inline]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ServicePackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServicePackageIndex({})", self.0)
    }
}

impl From<usize> for ServicePackageIndex {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

/// Role of a replica inside its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReplicaRole {
    Primary,
    Secondary,
    StandBy,
    None,
}

impl ReplicaRole {
    #[inline]
    pub fn is_primary(self) -> bool {
        matches!(self, ReplicaRole::Primary)
    }

    #[inline]
    pub fn is_stand_by(self) -> bool {
        matches!(self, ReplicaRole::StandBy)
    }
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReplicaRole::Primary => "Primary",
            ReplicaRole::Secondary => "Secondary",
            ReplicaRole::StandBy => "StandBy",
            ReplicaRole::None => "None",
        };
        write!(f, "{}", s)
    }
}

/// Discriminates the two isomorphic domain hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainKind {
    Fault,
    Upgrade,
}

impl DomainKind {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            DomainKind::Fault => "FaultDomain",
            DomainKind::Upgrade => "UpgradeDomain",
        }
    }
}

impl std::fmt::Display for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a service wants its replicas spread over a domain hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DomainDistribution {
    /// Domain placement is not constrained for this service.
    Ignore,
    /// Replicas spread within floor/ceil of an even split per domain.
    #[default]
    Packing,
    /// At most one replica per domain that has eligible nodes.
    Nonpacking,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display_uses_marker_name() {
        let id = NodeId::new(7);
        assert_eq!(format!("{}", id), "NodeId(7)");
        assert_eq!(*id.value(), 7);
    }

    #[test]
    fn test_index_round_trip() {
        let idx = ReplicaIndex::new(3);
        assert_eq!(idx.get(), 3);
        assert_eq!(ReplicaIndex::from(3), idx);
        assert_eq!(format!("{}", idx), "ReplicaIndex(3)");
    }

    #[test]
    fn test_role_predicates() {
        assert!(ReplicaRole::Primary.is_primary());
        assert!(!ReplicaRole::Secondary.is_primary());
        assert!(ReplicaRole::StandBy.is_stand_by());
    }

    #[test]
    fn test_default_distribution_is_packing() {
        assert_eq!(DomainDistribution::default(), DomainDistribution::Packing);
    }
}
