// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{sync::Arc, time::Duration};

use nodescan::{
    cluster::{
        NodeResolver, PodClient, StatusStore,
        inmemory::{ClusterDescription, InMemoryCluster},
    },
    config::{Backend, Config, ConfigError},
    controller::{Reconciler, driver::Driver},
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn run<C>(config: &Config, cluster: Arc<C>) -> Result<()>
where
    C: NodeResolver + PodClient + StatusStore + Send + Sync + 'static,
{
    let reconciler = Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        Arc::new(config.pod_factory()),
    )
    .with_running_requeue(config.reconcile.running_requeue);
    let handle = Driver::new(reconciler, cluster.clone(), config.settings()).start();
    for id in cluster.list().await? {
        handle.trigger(id).await?;
    }
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn in_memory(config: &Config, cluster: InMemoryCluster) -> Result<()> {
    let cluster = Arc::new(cluster);
    // there is no kubelet, pods progress one step per running requeue
    let pods = cluster.clone();
    let interval = config
        .reconcile
        .running_requeue
        .max(Duration::from_millis(1));
    let progress = tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        loop {
            ticks.tick().await;
            pods.advance_pods();
        }
    });
    let result = run(config, cluster).await;
    progress.abort();
    result
}

#[cfg(feature = "kube")]
async fn kube(config: &Config) -> Result<()> {
    let cluster = nodescan::cluster::kube::KubeCluster::try_default().await?;
    run(config, Arc::new(cluster)).await
}

#[cfg(not(feature = "kube"))]
async fn kube(_: &Config) -> Result<()> {
    Err("nodescand was built without the kube feature".into())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Arguments(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };
    config.log.init();
    tracing::debug!(%config, "Loaded configuration");
    match &config.backend {
        Backend::InMemory { cluster_file } => {
            let cluster = match cluster_file {
                Some(path) => InMemoryCluster::from(ClusterDescription::from_file(path)?),
                None => {
                    tracing::warn!("No cluster file configured, starting with an empty cluster");
                    InMemoryCluster::default()
                }
            };
            in_memory(&config, cluster).await
        }
        Backend::Kube => kube(&config).await,
    }
}
