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

use crate::common::{NodeId, NodeIndex, ServiceIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicateNodeIdError {
    id: NodeId,
}

impl DuplicateNodeIdError {
    pub fn new(id: NodeId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl std::fmt::Display for DuplicateNodeIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A node with id {} was added twice", self.id)
    }
}

impl std::error::Error for DuplicateNodeIdError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricArityMismatchError {
    what: String,
    expected: usize,
    actual: usize,
}

impl MetricArityMismatchError {
    pub fn new(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self {
            what: what.into(),
            expected,
            actual,
        }
    }

    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn actual(&self) -> usize {
        self.actual
    }
}

impl std::fmt::Display for MetricArityMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} has {} metric entries, the placement declares {}",
            self.what, self.actual, self.expected
        )
    }
}

impl std::error::Error for MetricArityMismatchError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownNodeError {
    node: NodeIndex,
}

impl UnknownNodeError {
    pub fn new(node: NodeIndex) -> Self {
        Self { node }
    }

    pub fn node(&self) -> NodeIndex {
        self.node
    }
}

impl std::fmt::Display for UnknownNodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reference to unknown node {}", self.node)
    }
}

impl std::error::Error for UnknownNodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownServiceError {
    service: ServiceIndex,
}

impl UnknownServiceError {
    pub fn new(service: ServiceIndex) -> Self {
        Self { service }
    }

    pub fn service(&self) -> ServiceIndex {
        self.service
    }
}

impl std::fmt::Display for UnknownServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reference to unknown service {}", self.service)
    }
}

impl std::error::Error for UnknownServiceError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityCycleError {
    service: ServiceIndex,
}

impl AffinityCycleError {
    pub fn new(service: ServiceIndex) -> Self {
        Self { service }
    }

    pub fn service(&self) -> ServiceIndex {
        self.service
    }
}

impl std::fmt::Display for AffinityCycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Affinity links of service {} form a cycle",
            self.service
        )
    }
}

impl std::error::Error for AffinityCycleError {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlacementBuildError {
    DuplicateNodeId(DuplicateNodeIdError),
    MetricArityMismatch(MetricArityMismatchError),
    UnknownNode(UnknownNodeError),
    UnknownService(UnknownServiceError),
    AffinityCycle(AffinityCycleError),
}

impl std::fmt::Display for PlacementBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementBuildError::DuplicateNodeId(e) => write!(f, "{}", e),
            PlacementBuildError::MetricArityMismatch(e) => write!(f, "{}", e),
            PlacementBuildError::UnknownNode(e) => write!(f, "{}", e),
            PlacementBuildError::UnknownService(e) => write!(f, "{}", e),
            PlacementBuildError::AffinityCycle(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PlacementBuildError {}

impl From<DuplicateNodeIdError> for PlacementBuildError {
    fn from(err: DuplicateNodeIdError) -> Self {
        PlacementBuildError::DuplicateNodeId(err)
    }
}

impl From<MetricArityMismatchError> for PlacementBuildError {
    fn from(err: MetricArityMismatchError) -> Self {
        PlacementBuildError::MetricArityMismatch(err)
    }
}

impl From<UnknownNodeError> for PlacementBuildError {
    fn from(err: UnknownNodeError) -> Self {
        PlacementBuildError::UnknownNode(err)
    }
}

impl From<UnknownServiceError> for PlacementBuildError {
    fn from(err: UnknownServiceError) -> Self {
        PlacementBuildError::UnknownService(err)
    }
}

impl From<AffinityCycleError> for PlacementBuildError {
    fn from(err: AffinityCycleError) -> Self {
        PlacementBuildError::AffinityCycle(err)
    }
}
