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

//! Shared fixtures for solver tests. Every cluster uses ascending
//! external node ids 0..n and metric names m0, m1, ...

use replica_alloc_model::prelude::{
    ApplicationSpec, NodeIndex, NodeSpec, PartitionSpec, Placement, PlacementBuilder, PlbSettings,
    ReplicaRole, ReplicaSpec, ServiceSpec,
};

/// Routes `tracing` output through the test harness; `RUST_LOG` selects
/// the level. Safe to call from every test.
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn metric_names(count: usize) -> Vec<String> {
    (0..count).map(|m| format!("m{}", m)).collect()
}

pub(crate) fn builder(metrics: usize) -> PlacementBuilder {
    PlacementBuilder::new(metric_names(metrics), PlbSettings::default())
}

pub(crate) fn builder_with(metrics: usize, settings: PlbSettings) -> PlacementBuilder {
    PlacementBuilder::new(metric_names(metrics), settings)
}

/// `n` identical up nodes with the given capacities, no services.
pub(crate) fn uniform_cluster(n: usize, capacities: &[i64]) -> Placement {
    let mut b = builder(capacities.len());
    for id in 0..n {
        b.add_node(NodeSpec::new(id as u64, capacities.to_vec()))
            .unwrap();
    }
    b.build().unwrap()
}

/// Like `uniform_cluster`, but the node at `down` is down.
pub(crate) fn cluster_with_down_node(n: usize, down: usize) -> Placement {
    let mut b = builder(1);
    for id in 0..n {
        let mut spec = NodeSpec::new(id as u64, vec![10]);
        if id == down {
            spec = spec.down();
        }
        b.add_node(spec).unwrap();
    }
    b.build().unwrap()
}

/// One service, one partition with `replica_count` existing replicas on
/// nodes `0..replica_count` (first one primary), each carrying `load` on
/// the single metric.
pub(crate) fn cluster_with_partition(
    n: usize,
    capacities: &[i64],
    replica_count: usize,
    load: i64,
) -> Placement {
    let mut b = builder(capacities.len());
    for id in 0..n {
        b.add_node(NodeSpec::new(id as u64, capacities.to_vec()))
            .unwrap();
    }
    let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
    let mut partition = PartitionSpec::new(0, svc, replica_count);
    for i in 0..replica_count {
        let role = if i == 0 {
            ReplicaRole::Primary
        } else {
            ReplicaRole::Secondary
        };
        partition = partition.with_replica(
            ReplicaSpec::existing(role, NodeIndex::new(i)).with_load(vec![load; capacities.len()]),
        );
    }
    b.add_partition(partition).unwrap();
    b.build().unwrap()
}

/// `n` nodes where all but the last share fault domain "fd0" and the last
/// sits alone in "fd1". One partition with two replicas on nodes 0 and 1.
pub(crate) fn two_domain_cluster(n: usize, capacities: &[i64]) -> Placement {
    let mut b = builder(capacities.len());
    for id in 0..n {
        let fd = if id == n - 1 { "fd1" } else { "fd0" };
        b.add_node(NodeSpec::new(id as u64, capacities.to_vec()).with_fault_domain([fd]))
            .unwrap();
    }
    let svc = b.add_service(ServiceSpec::new("svc")).unwrap();
    b.add_partition(
        PartitionSpec::new(0, svc, 2)
            .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
            .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(1))),
    )
    .unwrap();
    b.build().unwrap()
}

/// One service package with per-node footprint `footprint`; two zero-load
/// replicas of its service share node 0.
pub(crate) fn cluster_with_service_package(
    n: usize,
    capacities: &[i64],
    footprint: i64,
) -> Placement {
    let mut b = builder(capacities.len());
    for id in 0..n {
        b.add_node(NodeSpec::new(id as u64, capacities.to_vec()))
            .unwrap();
    }
    let sp = b
        .add_service_package("pkg", vec![footprint; capacities.len()])
        .unwrap();
    let svc = b
        .add_service(ServiceSpec::new("svc").with_service_package(sp))
        .unwrap();
    b.add_partition(
        PartitionSpec::new(0, svc, 2)
            .with_replica(ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0)))
            .with_replica(ReplicaSpec::existing(ReplicaRole::Secondary, NodeIndex::new(0))),
    )
    .unwrap();
    b.build().unwrap()
}

/// One application reserving `reservation` per node; a single replica
/// with load `load` sits on node 0.
pub(crate) fn cluster_with_reserving_app(
    n: usize,
    capacities: &[i64],
    reservation: i64,
    load: i64,
) -> Placement {
    let mut b = builder(capacities.len());
    for id in 0..n {
        b.add_node(NodeSpec::new(id as u64, capacities.to_vec()))
            .unwrap();
    }
    let app = b
        .add_application(
            ApplicationSpec::new("app").with_reservation(vec![reservation; capacities.len()]),
        )
        .unwrap();
    let svc = b
        .add_service(ServiceSpec::new("svc").with_application(app))
        .unwrap();
    b.add_partition(PartitionSpec::new(0, svc, 1).with_replica(
        ReplicaSpec::existing(ReplicaRole::Primary, NodeIndex::new(0))
            .with_load(vec![load; capacities.len()]),
    ))
    .unwrap();
    b.build().unwrap()
}
