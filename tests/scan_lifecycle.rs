// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{sync::Arc, time::Duration};

use nodescan::{
    cluster::{
        ScannerPodFactory, StatusStore,
        inmemory::{ClusterDescription, InMemoryCluster},
    },
    controller::{
        Outcome, Reconciler,
        driver::{Driver, Settings},
    },
    models::{Phase, PodState, ScanId, ScanResult},
    naming,
};

const CLUSTER: &str = r#"
[[nodes]]
name = "node-1"
labels = { "node-role.kubernetes.io/worker" = "" }

[[nodes]]
name = "node-2"
labels = { "node-role.kubernetes.io/worker" = "" }

[[nodes]]
name = "master-0"
labels = { "node-role.kubernetes.io/master" = "" }

[[scans]]
name = "workers"
namespace = "compliance"

[scans.spec]
profile = "moderate"
content = "ssg-ocp4-ds.xml"
nodeSelector = { "node-role.kubernetes.io/worker" = "" }
"#;

fn cluster() -> Arc<InMemoryCluster> {
    let description: ClusterDescription = toml::from_str(CLUSTER).unwrap();
    Arc::new(InMemoryCluster::from(description))
}

fn driver(
    cluster: Arc<InMemoryCluster>,
) -> Driver<InMemoryCluster, InMemoryCluster, ScannerPodFactory, InMemoryCluster> {
    let reconciler = Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        Arc::new(ScannerPodFactory::new("scanner")),
    )
    .with_running_requeue(Duration::from_millis(10));
    let settings = Settings {
        error_backoff: Duration::from_millis(10),
        permanent_error_backoff: Duration::from_millis(10),
        resync_interval: Duration::from_millis(50),
        max_concurrent_reconciles: 2,
    };
    Driver::new(reconciler, cluster, settings)
}

async fn phase(cluster: &InMemoryCluster, id: &ScanId) -> Phase {
    cluster
        .fetch(id)
        .await
        .unwrap()
        .map(|s| s.scan.status.phase)
        .unwrap()
}

#[tokio::test]
async fn two_worker_scan_step_by_step() {
    let cluster = cluster();
    let id = ScanId::new("compliance", "workers");
    let under_test = driver(cluster.clone());

    assert_eq!(under_test.pass(&id).await, Outcome::Requeue);
    assert_eq!(phase(&cluster, &id).await, Phase::Launching);

    assert_eq!(under_test.pass(&id).await, Outcome::Requeue);
    assert_eq!(phase(&cluster, &id).await, Phase::Running);
    let mut pods: Vec<_> = cluster.pods().into_iter().map(|p| p.name).collect();
    pods.sort();
    assert_eq!(
        pods,
        vec![
            naming::pod_name_for("workers", "node-1"),
            naming::pod_name_for("workers", "node-2"),
        ]
    );

    assert_eq!(
        under_test.pass(&id).await,
        Outcome::RequeueAfter(Duration::from_millis(10))
    );
    assert_eq!(phase(&cluster, &id).await, Phase::Running);

    cluster.set_pod_state("compliance", "workers-node-1-pod", PodState::Succeeded);
    under_test.pass(&id).await;
    assert_eq!(phase(&cluster, &id).await, Phase::Running);

    cluster.set_pod_state("compliance", "workers-node-2-pod", PodState::Failed);
    assert_eq!(under_test.pass(&id).await, Outcome::AwaitChange);
    let status = cluster.scan(&id).unwrap().status;
    assert_eq!(status.phase, Phase::Done);
    assert_eq!(status.result, Some(ScanResult::Failed));
    assert!(status.start_time.is_some());
    assert!(status.end_time.is_some());
    assert_eq!(status.nodes.map(|n| (n.succeeded, n.failed)), Some((1, 1)));

    cluster.remove_pod("compliance", "workers-node-1-pod");
    assert_eq!(under_test.pass(&id).await, Outcome::AwaitChange);
    assert_eq!(cluster.pods().len(), 1);
    assert_eq!(phase(&cluster, &id).await, Phase::Done);
}

#[tokio::test]
async fn deleted_pods_count_as_finished() {
    let cluster = cluster();
    let id = ScanId::new("compliance", "workers");
    let under_test = driver(cluster.clone());
    under_test.pass(&id).await;
    under_test.pass(&id).await;
    for pod in cluster.pods() {
        cluster.remove_pod(&pod.namespace, &pod.name);
    }
    under_test.pass(&id).await;
    let status = cluster.scan(&id).unwrap().status;
    assert_eq!(status.phase, Phase::Done);
    assert_eq!(status.result, Some(ScanResult::NotAvailable));
}

#[tokio::test]
async fn driver_finishes_scan_in_background() {
    let cluster = cluster();
    let id = ScanId::new("compliance", "workers");
    let handle = driver(cluster.clone()).start();
    handle.trigger(id.clone()).await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            cluster.advance_pods();
            if phase(&cluster, &id).await == Phase::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.shutdown().await;

    assert!(finished.is_ok());
    assert_eq!(cluster.pods().len(), 2);
    assert_eq!(
        cluster.scan(&id).unwrap().status.result,
        Some(ScanResult::Succeeded)
    );
}
