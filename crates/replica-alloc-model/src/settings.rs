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

use serde::Deserialize;

/// Per-run engine configuration, constructed once and passed by reference
/// into every constraint and search object. A negative constraint
/// priority disables the constraint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlbSettings {
    pub placement_constraint_priority: i32,
    pub preferred_location_constraint_priority: i32,
    pub capacity_constraint_priority: i32,
    pub affinity_constraint_priority: i32,
    pub fault_domain_constraint_priority: i32,
    pub upgrade_domain_constraint_priority: i32,
    pub scaleout_count_constraint_priority: i32,
    pub application_capacity_constraint_priority: i32,
    pub throttling_constraint_priority: i32,

    /// Probability that a random balancing step tries a primary swap
    /// instead of a movement.
    pub swap_primary_probability: f64,
    /// Count only load already moving into a node when judging whether a
    /// foreign replica fits, so corrections do not chain overcommits.
    pub prevent_transient_overcommit: bool,
    pub move_existing_replica_for_placement: bool,
    pub move_parent_to_fix_affinity_violation: bool,
    /// Fraction of a correction round during which the parent side of an
    /// affinity violation may be moved instead of the children.
    pub move_parent_to_fix_affinity_violation_transition_percentage: f64,
    pub check_aligned_affinity_for_upgrade: bool,
    pub relax_scaleout_constraint_during_upgrade: bool,
    pub relax_affinity_constraint_during_upgrade: bool,
    pub quorum_based_replica_distribution_per_fault_domains: bool,
    pub quorum_based_replica_distribution_per_upgrade_domains: bool,
    /// Deterministic mode: every random node pick becomes
    /// highest-node-id, making runs byte-for-byte reproducible.
    pub dummy_plb_enabled: bool,
    /// Defragmentation-style heuristic node choice during placement.
    pub use_node_load_as_heuristic: bool,
    pub throttle_placement_phase: bool,
    pub throttle_balancing_phase: bool,
    pub throttle_constraint_check_phase: bool,
}

impl Default for PlbSettings {
    fn default() -> Self {
        Self {
            placement_constraint_priority: 0,
            preferred_location_constraint_priority: 2,
            capacity_constraint_priority: 0,
            affinity_constraint_priority: 0,
            fault_domain_constraint_priority: 0,
            upgrade_domain_constraint_priority: 1,
            scaleout_count_constraint_priority: 0,
            application_capacity_constraint_priority: 0,
            throttling_constraint_priority: 0,
            swap_primary_probability: 0.3,
            prevent_transient_overcommit: false,
            move_existing_replica_for_placement: true,
            move_parent_to_fix_affinity_violation: false,
            move_parent_to_fix_affinity_violation_transition_percentage: 0.2,
            check_aligned_affinity_for_upgrade: true,
            relax_scaleout_constraint_during_upgrade: true,
            relax_affinity_constraint_during_upgrade: true,
            quorum_based_replica_distribution_per_fault_domains: false,
            quorum_based_replica_distribution_per_upgrade_domains: false,
            dummy_plb_enabled: false,
            use_node_load_as_heuristic: false,
            throttle_placement_phase: false,
            throttle_balancing_phase: true,
            throttle_constraint_check_phase: false,
        }
    }
}

impl PlbSettings {
    /// Whether quorum-based spread is forced for the given hierarchy.
    #[inline]
    pub fn quorum_based_distribution(&self, kind: crate::common::DomainKind) -> bool {
        match kind {
            crate::common::DomainKind::Fault => {
                self.quorum_based_replica_distribution_per_fault_domains
            }
            crate::common::DomainKind::Upgrade => {
                self.quorum_based_replica_distribution_per_upgrade_domains
            }
        }
    }

    /// Configured priority of the domain constraint for a hierarchy.
    #[inline]
    pub fn domain_constraint_priority(&self, kind: crate::common::DomainKind) -> i32 {
        match kind {
            crate::common::DomainKind::Fault => self.fault_domain_constraint_priority,
            crate::common::DomainKind::Upgrade => self.upgrade_domain_constraint_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DomainKind;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = PlbSettings::default();
        assert_eq!(s.preferred_location_constraint_priority, 2);
        assert_eq!(s.upgrade_domain_constraint_priority, 1);
        assert_eq!(s.capacity_constraint_priority, 0);
        assert!((s.swap_primary_probability - 0.3).abs() < 1e-12);
        assert!(!s.prevent_transient_overcommit);
        assert!(s.move_existing_replica_for_placement);
    }

    #[test]
    fn test_domain_accessors_discriminate_kind() {
        let mut s = PlbSettings::default();
        s.quorum_based_replica_distribution_per_fault_domains = true;
        assert!(s.quorum_based_distribution(DomainKind::Fault));
        assert!(!s.quorum_based_distribution(DomainKind::Upgrade));
        assert_eq!(s.domain_constraint_priority(DomainKind::Upgrade), 1);
    }

    #[test]
    fn test_deserializes_from_partial_config() {
        let s: PlbSettings =
            serde_json::from_str(r#"{"swap-primary-probability": 0.5, "dummy-plb-enabled": true}"#)
                .unwrap();
        assert!((s.swap_primary_probability - 0.5).abs() < 1e-12);
        assert!(s.dummy_plb_enabled);
        assert_eq!(s.upgrade_domain_constraint_priority, 1);
    }
}
