// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Kubernetes backend.
//!
//! Scans are stored as `NodeScan` custom resources. Their status is written via merge patches
//! that carry the resource version of the fetched object, so the API server rejects updates
//! based on an outdated copy.

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{
        Container, HostPathVolumeSource, Node as KubeNode, Pod, PodSpec, Volume, VolumeMount,
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference as KubeOwnerReference,
};
use kube::{
    Api, Client, CustomResource, Resource, ResourceExt,
    api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClusterError, NodeResolver, PodClient, PodCreation, StatusStore, VersionedScan};
use crate::models::{
    Node, PodState, Scan, ScanId, ScanPod, ScanRequest, ScanSpec, ScanStatus,
};

const CONTAINER_NAME: &str = "scanner";
const HOST_VOLUME: &str = "host";
const HOST_MOUNT_PATH: &str = "/host";

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "nodescan.io",
    version = "v1alpha1",
    kind = "NodeScan",
    namespaced,
    status = "ScanStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.result"}"#
)]
pub struct NodeScanSpec {
    #[serde(flatten)]
    pub scan: ScanSpec,
}

impl From<&NodeScan> for Scan {
    fn from(value: &NodeScan) -> Self {
        Scan {
            request: ScanRequest {
                name: value.name_any(),
                namespace: value.namespace().unwrap_or_default(),
                uid: value.uid(),
                spec: value.spec.scan.clone(),
            },
            status: value.status.clone().unwrap_or_default(),
        }
    }
}

fn map_error(error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(ae) => match ae.code {
            404 => ClusterError::NotFound(ae.message),
            409 => ClusterError::Conflict(ae.message),
            429 => ClusterError::Unavailable(ae.message),
            code if code >= 500 => ClusterError::Unavailable(ae.message),
            _ => ClusterError::Permanent(format!("{} ({})", ae.message, ae.reason)),
        },
        kube::Error::SerdeError(e) => ClusterError::Invalid(e.to_string()),
        e => ClusterError::Unavailable(e.to_string()),
    }
}

fn label_selector(scan: &ScanRequest) -> Option<String> {
    if scan.spec.node_selector.is_empty() {
        return None;
    }
    let selector = scan
        .spec
        .node_selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    Some(selector)
}

fn pod_state(pod: &Pod) -> PodState {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    match phase {
        Some("Pending") => PodState::Pending,
        Some("Running") => PodState::Running,
        Some("Succeeded") => PodState::Succeeded,
        Some("Failed") => PodState::Failed,
        _ => PodState::Unknown,
    }
}

fn owner_references(pod: &ScanPod) -> Option<Vec<KubeOwnerReference>> {
    let uid = pod.owner.uid.as_ref()?;
    Some(vec![KubeOwnerReference {
        api_version: NodeScan::api_version(&()).to_string(),
        kind: NodeScan::kind(&()).to_string(),
        name: pod.owner.name.clone(),
        uid: uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }])
}

/// Builds the pod object. The host file system is mounted read only at `/host`.
fn to_kube_pod(pod: &ScanPod) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(pod.name.clone()),
            namespace: Some(pod.namespace.clone()),
            labels: Some(pod.labels.clone()),
            owner_references: owner_references(pod),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(pod.node_name.clone()),
            restart_policy: Some("Never".to_owned()),
            service_account_name: pod.service_account.clone(),
            containers: vec![Container {
                name: CONTAINER_NAME.to_owned(),
                image: Some(pod.container.image.clone()),
                args: Some(pod.container.args.clone()),
                volume_mounts: Some(vec![VolumeMount {
                    name: HOST_VOLUME.to_owned(),
                    mount_path: HOST_MOUNT_PATH.to_owned(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: HOST_VOLUME.to_owned(),
                host_path: Some(HostPathVolumeSource {
                    path: "/".to_owned(),
                    type_: Some("Directory".to_owned()),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Merge patch replacing the status, guarded by `version`.
///
/// Unset optional fields are sent as null, otherwise the merge would keep their old values.
fn status_patch(version: &str, status: &ScanStatus) -> Result<Value, ClusterError> {
    let mut status =
        serde_json::to_value(status).map_err(|e| ClusterError::Invalid(e.to_string()))?;
    if let Some(fields) = status.as_object_mut() {
        for key in ["result", "error", "targets", "nodes", "startTime", "endTime"] {
            fields.entry(key).or_insert(Value::Null);
        }
    }
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": version },
        "status": status,
    }))
}

/// Talks to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Uses the in cluster configuration or the local kubeconfig.
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn scans(&self, namespace: &str) -> Api<NodeScan> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl NodeResolver for KubeCluster {
    async fn resolve(&self, scan: &ScanRequest) -> Result<Vec<Node>, ClusterError> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let params = match label_selector(scan) {
            Some(selector) => ListParams::default().labels(&selector),
            None => ListParams::default(),
        };
        let list = api.list(&params).await.map_err(map_error)?;
        let mut nodes: Vec<Node> = list
            .items
            .iter()
            .map(|n| Node {
                name: n.name_any(),
                labels: n.labels().clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes.dedup_by(|a, b| a.name == b.name);
        Ok(nodes)
    }
}

#[async_trait]
impl PodClient for KubeCluster {
    async fn ensure_pod(&self, pod: &ScanPod) -> Result<PodCreation, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        match api.create(&PostParams::default(), &to_kube_pod(pod)).await {
            Ok(_) => Ok(PodCreation::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(PodCreation::AlreadyExists),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn lookup_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get_opt(name).await.map_err(map_error)?;
        Ok(pod.as_ref().map(pod_state))
    }
}

#[async_trait]
impl StatusStore for KubeCluster {
    async fn list(&self) -> Result<Vec<ScanId>, ClusterError> {
        let api: Api<NodeScan> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(map_error)?;
        Ok(list
            .items
            .iter()
            .map(|s| ScanId::new(s.namespace().unwrap_or_default(), s.name_any()))
            .collect())
    }

    async fn fetch(&self, id: &ScanId) -> Result<Option<VersionedScan>, ClusterError> {
        let scan = self
            .scans(&id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(map_error)?;
        Ok(scan.map(|s| VersionedScan {
            scan: Scan::from(&s),
            version: s.resource_version().unwrap_or_default(),
        }))
    }

    async fn persist(
        &self,
        id: &ScanId,
        version: &str,
        status: &ScanStatus,
    ) -> Result<String, ClusterError> {
        let patch = status_patch(version, status)?;
        let updated = self
            .scans(&id.namespace)
            .patch_status(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_error)?;
        updated
            .resource_version()
            .ok_or_else(|| ClusterError::Invalid(format!("{id} has no resource version")))
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::core::ErrorResponse;

    use super::*;
    use crate::{
        cluster::{PodFactory, ScannerPodFactory},
        models::Phase,
    };

    fn request() -> ScanRequest {
        ScanRequest {
            name: "scan".to_owned(),
            namespace: "default".to_owned(),
            uid: Some("1234".to_owned()),
            spec: ScanSpec {
                profile: "p".to_owned(),
                content: "c".to_owned(),
                ..Default::default()
            },
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: "nope".to_owned(),
            reason: "Test".to_owned(),
            code,
        })
    }

    #[test]
    fn maps_api_errors() {
        assert!(matches!(map_error(api_error(409)), ClusterError::Conflict(_)));
        assert!(matches!(map_error(api_error(404)), ClusterError::NotFound(_)));
        assert!(map_error(api_error(503)).is_retryable());
        assert!(map_error(api_error(429)).is_retryable());
        assert!(!map_error(api_error(403)).is_retryable());
    }

    #[test]
    fn selector_from_node_selector() {
        let mut scan = request();
        assert_eq!(label_selector(&scan), None);
        scan.spec
            .node_selector
            .insert("kubernetes.io/os".to_owned(), "linux".to_owned());
        scan.spec
            .node_selector
            .insert("node-role.kubernetes.io/worker".to_owned(), "".to_owned());
        assert_eq!(
            label_selector(&scan).as_deref(),
            Some("kubernetes.io/os=linux,node-role.kubernetes.io/worker=")
        );
    }

    #[test]
    fn pod_phases() {
        let mut pod = Pod::default();
        assert_eq!(pod_state(&pod), PodState::Unknown);
        for (phase, expected) in [
            ("Pending", PodState::Pending),
            ("Running", PodState::Running),
            ("Succeeded", PodState::Succeeded),
            ("Failed", PodState::Failed),
            ("Unknown", PodState::Unknown),
        ] {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_owned()),
                ..Default::default()
            });
            assert_eq!(pod_state(&pod), expected);
        }
    }

    #[test]
    fn pod_is_pinned_and_owned() {
        let scan_pod = ScannerPodFactory::new("scanner").pod_for(&request(), &Node::new("node-1"));
        let pod = to_kube_pod(&scan_pod);
        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-1"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.metadata.name.as_deref(), Some("scan-node-1-pod"));
        let owners = pod.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "NodeScan");
        assert_eq!(owners[0].api_version, "nodescan.io/v1alpha1");
        assert_eq!(owners[0].uid, "1234");
        let mounts = spec.containers[0].volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].mount_path, "/host");
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn patch_clears_unset_fields() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        let patch = status_patch("42", &status).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["phase"], "RUNNING");
        assert_eq!(patch["status"]["error"], Value::Null);
        assert!(patch["status"].as_object().unwrap().contains_key("error"));
    }

    #[test]
    fn scan_from_resource() {
        let mut resource = NodeScan::new("scan", NodeScanSpec { scan: request().spec });
        resource.metadata.namespace = Some("default".to_owned());
        resource.metadata.uid = Some("1234".to_owned());
        let scan = Scan::from(&resource);
        assert_eq!(scan.request, request());
        assert_eq!(scan.status.phase, Phase::Pending);
    }
}
