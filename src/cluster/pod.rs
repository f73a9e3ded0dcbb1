// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::collections::BTreeMap;

use crate::{
    models::{Node, OwnerReference, ScanPod, ScanRequest, ScannerContainer},
    naming::{self, NODE_LABEL, SCAN_LABEL},
};

/// Builds the pod that scans a single node.
///
/// Injected into the reconciler so that the shape of a pod is decided by the caller instead of
/// a process wide registry.
pub trait PodFactory {
    fn pod_for(&self, scan: &ScanRequest, node: &Node) -> ScanPod;
}

/// Builds pods running the scanner image with the profile and content as arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerPodFactory {
    pub image: String,
    pub service_account: Option<String>,
}

impl ScannerPodFactory {
    pub fn new<S: Into<String>>(image: S) -> Self {
        Self {
            image: image.into(),
            service_account: None,
        }
    }

    pub fn with_service_account<S: Into<String>>(mut self, service_account: S) -> Self {
        self.service_account = Some(service_account.into());
        self
    }

    fn args(scan: &ScanRequest) -> Vec<String> {
        let mut args = vec![
            "--profile".to_owned(),
            scan.spec.profile.clone(),
            "--content".to_owned(),
            scan.spec.content.clone(),
        ];
        if let Some(rule) = &scan.spec.rule {
            args.push("--rule".to_owned());
            args.push(rule.clone());
        }
        args
    }
}

impl PodFactory for ScannerPodFactory {
    fn pod_for(&self, scan: &ScanRequest, node: &Node) -> ScanPod {
        let mut labels = BTreeMap::new();
        labels.insert(SCAN_LABEL.to_owned(), scan.name.clone());
        labels.insert(NODE_LABEL.to_owned(), node.name.clone());
        ScanPod {
            name: naming::pod_name_for(&scan.name, &node.name),
            namespace: scan.namespace.clone(),
            node_name: node.name.clone(),
            owner: OwnerReference {
                name: scan.name.clone(),
                uid: scan.uid.clone(),
            },
            labels,
            service_account: self.service_account.clone(),
            container: ScannerContainer {
                image: scan
                    .spec
                    .content_image
                    .clone()
                    .unwrap_or_else(|| self.image.clone()),
                args: Self::args(scan),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanSpec;

    fn request() -> ScanRequest {
        ScanRequest {
            name: "workers-scan".to_owned(),
            namespace: "compliance".to_owned(),
            uid: Some("1234".to_owned()),
            spec: ScanSpec {
                profile: "moderate".to_owned(),
                content: "ssg.xml".to_owned(),
                rule: Some("no_empty_passwords".to_owned()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn pins_pod_to_node() {
        let factory = ScannerPodFactory::new("scanner:latest").with_service_account("nodescan");
        let pod = factory.pod_for(&request(), &Node::new("node-1"));
        assert_eq!(pod.name, "workers-scan-node-1-pod");
        assert_eq!(pod.namespace, "compliance");
        assert_eq!(pod.node_name, "node-1");
        assert_eq!(pod.owner.uid.as_deref(), Some("1234"));
        assert_eq!(pod.labels.get(NODE_LABEL).map(|x| x as &str), Some("node-1"));
        assert_eq!(pod.service_account.as_deref(), Some("nodescan"));
        assert_eq!(pod.container.image, "scanner:latest");
        assert_eq!(
            pod.container.args,
            vec![
                "--profile",
                "moderate",
                "--content",
                "ssg.xml",
                "--rule",
                "no_empty_passwords"
            ]
        );
    }

    #[test]
    fn content_image_overrides_image() {
        let mut scan = request();
        scan.spec.content_image = Some("content:v2".to_owned());
        let pod = ScannerPodFactory::new("scanner:latest").pod_for(&scan, &Node::new("n"));
        assert_eq!(pod.container.image, "content:v2");
    }
}
