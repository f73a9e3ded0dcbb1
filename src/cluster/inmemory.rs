// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! A cluster held in memory.
//!
//! Used for testing, for simulating scans with nodescanctl and as a backend of nodescand when no
//! real cluster is available. Pods never progress on their own, their state is changed by the
//! caller via [InMemoryCluster::set_pod_state] or [InMemoryCluster::advance_pods].

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;

use super::{ClusterError, NodeResolver, PodClient, PodCreation, StatusStore, VersionedScan};
use crate::models::{Node, PodState, Scan, ScanId, ScanPod, ScanRequest, ScanStatus};

#[derive(Debug, Clone)]
struct StoredPod {
    pod: ScanPod,
    state: PodState,
}

#[derive(Debug, Clone)]
struct StoredScan {
    scan: Scan,
    version: u64,
}

/// Description of a cluster as it is stored in a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClusterDescription {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub scans: Vec<ScanRequest>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to read cluster description: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse cluster description: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ClusterDescription {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCluster {
    nodes: RwLock<Vec<Node>>,
    pods: RwLock<BTreeMap<(String, String), StoredPod>>,
    scans: RwLock<BTreeMap<ScanId, StoredScan>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl From<ClusterDescription> for InMemoryCluster {
    fn from(value: ClusterDescription) -> Self {
        let cluster = Self::new(value.nodes);
        for scan in value.scans {
            cluster.insert_scan(scan);
        }
        cluster
    }
}

impl InMemoryCluster {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            ..Default::default()
        }
    }

    pub fn add_node(&self, node: Node) {
        write(&self.nodes).push(node);
    }

    pub fn remove_node(&self, name: &str) {
        write(&self.nodes).retain(|n| n.name != name);
    }

    /// Adds a new scan in phase PENDING, replacing a scan with the same id.
    pub fn insert_scan(&self, request: ScanRequest) -> ScanId {
        let id = request.id();
        let mut scans = write(&self.scans);
        let version = scans.get(&id).map(|s| s.version + 1).unwrap_or(1);
        scans.insert(
            id.clone(),
            StoredScan {
                scan: Scan::new(request),
                version,
            },
        );
        id
    }

    /// Removes the scan together with the pods it owns, as the garbage collection of a cluster
    /// would.
    pub fn remove_scan(&self, id: &ScanId) -> Option<Scan> {
        let removed = write(&self.scans).remove(id).map(|s| s.scan);
        write(&self.pods).retain(|_, p| {
            p.pod.namespace != id.namespace || p.pod.owner.name != id.name
        });
        removed
    }

    pub fn scan(&self, id: &ScanId) -> Option<Scan> {
        read(&self.scans).get(id).map(|s| s.scan.clone())
    }

    pub fn scans(&self) -> Vec<Scan> {
        read(&self.scans).values().map(|s| s.scan.clone()).collect()
    }

    /// Overwrites the status without a version check, as an external actor would.
    pub fn set_status(&self, id: &ScanId, status: ScanStatus) -> bool {
        match write(&self.scans).get_mut(id) {
            Some(stored) => {
                stored.scan.status = status;
                stored.version += 1;
                true
            }
            None => false,
        }
    }

    /// Adds a pod as if it was created by someone else.
    pub fn insert_pod(&self, pod: ScanPod, state: PodState) {
        write(&self.pods).insert(
            (pod.namespace.clone(), pod.name.clone()),
            StoredPod { pod, state },
        );
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<ScanPod> {
        write(&self.pods)
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|p| p.pod)
    }

    pub fn pods(&self) -> Vec<ScanPod> {
        read(&self.pods).values().map(|p| p.pod.clone()).collect()
    }

    pub fn pod_state(&self, namespace: &str, name: &str) -> Option<PodState> {
        read(&self.pods)
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|p| p.state)
    }

    pub fn set_pod_state(&self, namespace: &str, name: &str, state: PodState) -> bool {
        match write(&self.pods).get_mut(&(namespace.to_owned(), name.to_owned())) {
            Some(p) => {
                p.state = state;
                true
            }
            None => false,
        }
    }

    /// Moves every non terminal pod one step further: pending -> running -> succeeded.
    ///
    /// Returns the number of pods that changed.
    pub fn advance_pods(&self) -> usize {
        let mut changed = 0;
        for p in write(&self.pods).values_mut() {
            let next = match p.state {
                PodState::Pending | PodState::Unknown => PodState::Running,
                PodState::Running => PodState::Succeeded,
                PodState::Succeeded | PodState::Failed => continue,
            };
            tracing::trace!(pod = %p.pod.name, from = %p.state, to = %next, "advance pod");
            p.state = next;
            changed += 1;
        }
        changed
    }
}

#[async_trait]
impl NodeResolver for InMemoryCluster {
    async fn resolve(&self, scan: &ScanRequest) -> Result<Vec<Node>, ClusterError> {
        let mut nodes: Vec<Node> = read(&self.nodes)
            .iter()
            .filter(|n| n.matches(&scan.spec.node_selector))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes.dedup_by(|a, b| a.name == b.name);
        Ok(nodes)
    }
}

#[async_trait]
impl PodClient for InMemoryCluster {
    async fn ensure_pod(&self, pod: &ScanPod) -> Result<PodCreation, ClusterError> {
        let key = (pod.namespace.clone(), pod.name.clone());
        let mut pods = write(&self.pods);
        if pods.contains_key(&key) {
            return Ok(PodCreation::AlreadyExists);
        }
        pods.insert(
            key,
            StoredPod {
                pod: pod.clone(),
                state: PodState::Pending,
            },
        );
        Ok(PodCreation::Created)
    }

    async fn lookup_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>, ClusterError> {
        Ok(self.pod_state(namespace, name))
    }
}

#[async_trait]
impl StatusStore for InMemoryCluster {
    async fn list(&self) -> Result<Vec<ScanId>, ClusterError> {
        Ok(read(&self.scans).keys().cloned().collect())
    }

    async fn fetch(&self, id: &ScanId) -> Result<Option<VersionedScan>, ClusterError> {
        Ok(read(&self.scans).get(id).map(|s| VersionedScan {
            scan: s.scan.clone(),
            version: s.version.to_string(),
        }))
    }

    async fn persist(
        &self,
        id: &ScanId,
        version: &str,
        status: &ScanStatus,
    ) -> Result<String, ClusterError> {
        let mut scans = write(&self.scans);
        let stored = scans
            .get_mut(id)
            .ok_or_else(|| ClusterError::NotFound(id.to_string()))?;
        if stored.version.to_string() != version {
            return Err(ClusterError::Conflict(format!(
                "{id} is at version {} but {version} was expected",
                stored.version
            )));
        }
        stored.scan.status = status.clone();
        stored.version += 1;
        Ok(stored.version.to_string())
    }
}
