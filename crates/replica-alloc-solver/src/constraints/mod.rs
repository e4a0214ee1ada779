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

pub mod affinity;
pub mod application_capacity;
pub mod block_list;
pub mod domain;
pub mod node_capacity;
pub mod preferred_location;
pub mod replica_exclusion;
pub mod scaleout;
pub mod throttling;
pub mod violation;

use crate::state::node_set::NodeSet;
use crate::state::solution::TempSolution;
use rand_chacha::ChaCha8Rng;
use replica_alloc_model::prelude::{PartitionIndex, ReplicaIndex};
use std::collections::BTreeSet;

pub use violation::{Violation, ViolationList, ViolationRelation};

/// Closed set of constraint families, in the order the checker wires
/// them up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintKind {
    ReplicaExclusionStatic,
    PlacementConstraint,
    PreferredLocation,
    Throttling,
    FaultDomain,
    UpgradeDomain,
    ReplicaExclusionDynamic,
    NodeCapacity,
    ScaleoutCount,
    ApplicationCapacity,
    Affinity,
}

impl ConstraintKind {
    pub fn name(self) -> &'static str {
        match self {
            ConstraintKind::ReplicaExclusionStatic => "ReplicaExclusionStatic",
            ConstraintKind::PlacementConstraint => "PlacementConstraint",
            ConstraintKind::PreferredLocation => "PreferredLocation",
            ConstraintKind::Throttling => "Throttling",
            ConstraintKind::FaultDomain => "FaultDomain",
            ConstraintKind::UpgradeDomain => "UpgradeDomain",
            ConstraintKind::ReplicaExclusionDynamic => "ReplicaExclusionDynamic",
            ConstraintKind::NodeCapacity => "NodeCapacity",
            ConstraintKind::ScaleoutCount => "ScaleoutCount",
            ConstraintKind::ApplicationCapacity => "ApplicationCapacity",
            ConstraintKind::Affinity => "Affinity",
        }
    }
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Flags steering one check pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckContext {
    /// Only look at nodes/partitions the overlay touched.
    pub changed_only: bool,
    /// Grandfather violations already present in the base solution.
    pub relaxed: bool,
    /// Check against buffered instead of total capacities.
    pub use_buffered_capacity: bool,
}

impl CheckContext {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn relaxed() -> Self {
        Self {
            relaxed: true,
            ..Self::default()
        }
    }

    pub fn with_changed_only(mut self, changed_only: bool) -> Self {
        self.changed_only = changed_only;
        self
    }

    pub fn with_buffered_capacity(mut self, buffered: bool) -> Self {
        self.use_buffered_capacity = buffered;
        self
    }
}

/// What one constraint check found.
#[derive(Debug, Clone)]
pub struct ConstraintCheckResult {
    pub kind: ConstraintKind,
    pub invalid_replicas: BTreeSet<ReplicaIndex>,
}

impl ConstraintCheckResult {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.invalid_replicas.is_empty()
    }
}

/// The candidate-filtering half of a constraint: narrows a [`NodeSet`]
/// to the nodes where a replica may legally stand (or which nodes a
/// partition may drop from / promote on).
pub trait Subspace: std::fmt::Debug {
    fn kind(&self) -> ConstraintKind;

    /// Removes nodes `replica` must not land on from `candidates`.
    fn get_target_nodes(
        &self,
        solution: &TempSolution<'_>,
        replica: ReplicaIndex,
        candidates: &mut NodeSet<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    );

    /// Narrows `candidates` to nodes this constraint would rather drop a
    /// replica of `partition` from. Intersects only when the result stays
    /// non-empty; preferences never empty the drop set.
    fn get_nodes_for_replica_drop(
        &self,
        _solution: &TempSolution<'_>,
        _partition: PartitionIndex,
        _candidates: &mut NodeSet<'_>,
    ) {
    }

    /// Narrows the secondaries eligible for promotion to primary of
    /// `partition` (swap targets).
    fn promote_secondary(
        &self,
        _solution: &TempSolution<'_>,
        _partition: PartitionIndex,
        _candidates: &mut NodeSet<'_>,
    ) {
    }
}

/// One placement rule: detects violations, names the replicas to evict,
/// and exposes its filtering subspace.
pub trait Constraint: std::fmt::Debug {
    fn kind(&self) -> ConstraintKind;

    /// Correction order; negative disables, 0 is hard, larger is softer.
    fn priority(&self) -> i32;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Everything wrong under this constraint, or `None` when clean.
    fn get_violations(&self, solution: &TempSolution<'_>, ctx: CheckContext) -> Option<Violation>;

    /// The replicas that must move for the violations to clear. Random
    /// choices (which of N equivalent offenders) come from `rng`.
    fn get_invalid_replicas(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> BTreeSet<ReplicaIndex>;

    fn subspace(&self) -> &dyn Subspace;

    /// Whether the checker may fix this constraint's violations by
    /// swapping a primary with one of its secondaries instead of
    /// moving replicas.
    fn allows_correction_by_swap(&self) -> bool {
        false
    }

    fn check(
        &self,
        solution: &TempSolution<'_>,
        ctx: CheckContext,
        rng: &mut ChaCha8Rng,
    ) -> ConstraintCheckResult {
        ConstraintCheckResult {
            kind: self.kind(),
            invalid_replicas: self.get_invalid_replicas(solution, ctx, rng),
        }
    }
}

impl std::fmt::Display for dyn Constraint + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name(), self.priority())
    }
}
