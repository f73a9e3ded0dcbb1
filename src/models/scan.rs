// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{collections::BTreeMap, fmt::Display};

use super::{ScanStatus, ValidationError};

/// Identifies a scan within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ScanId {
    pub namespace: String,
    pub name: String,
}

impl ScanId {
    pub fn new<N, S>(namespace: N, name: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Describes what to scan and on which nodes.
///
/// The content related fields are forwarded to the scanner pods as they are, they are never
/// interpreted.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "kube", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ScanSpec {
    /// Profile to evaluate
    pub profile: String,
    /// Location of the content within the scanner image
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Restricts the scan to a single rule
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Image containing the content, overrides the configured scanner image
    pub content_image: Option<String>,
    #[serde(default)]
    /// Labels a node must carry to be a target. Empty selects every node.
    pub node_selector: BTreeMap<String, String>,
}

/// A scan request as it is submitted to the cluster.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanRequest {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Unique id assigned by the cluster, used for owner references
    pub uid: Option<String>,
    pub spec: ScanSpec,
}

impl ScanRequest {
    pub fn id(&self) -> ScanId {
        ScanId::new(&self.namespace, &self.name)
    }

    /// Verifies that the request can be launched.
    ///
    /// Collects every problem instead of stopping at the first one so that an operator can fix
    /// the request in one go.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        if let Err(reason) = dns_label(&self.name) {
            problems.push(format!("name '{}' {reason}", self.name));
        }
        if let Err(reason) = dns_label(&self.namespace) {
            problems.push(format!("namespace '{}' {reason}", self.namespace));
        }
        if self.spec.profile.trim().is_empty() {
            problems.push("profile must not be empty".to_owned());
        }
        if self.spec.content.trim().is_empty() {
            problems.push("content must not be empty".to_owned());
        }
        if matches!(&self.spec.rule, Some(r) if r.trim().is_empty()) {
            problems.push("rule must not be empty when set".to_owned());
        }
        if matches!(&self.spec.content_image, Some(i) if i.trim().is_empty()) {
            problems.push("content image must not be empty when set".to_owned());
        }
        if self.spec.node_selector.keys().any(|k| k.is_empty()) {
            problems.push("node selector keys must not be empty".to_owned());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { problems })
        }
    }
}

fn dns_label(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.len() > 63 {
        return Err("must be at most 63 characters");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("must consist of lower case alphanumeric characters or '-'");
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err("must start and end with an alphanumeric character");
    }
    Ok(())
}

/// A scan request together with its current status.
#[derive(Default, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Scan {
    #[serde(flatten)]
    pub request: ScanRequest,
    #[serde(default)]
    pub status: ScanStatus,
}

impl Scan {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            request,
            status: ScanStatus::default(),
        }
    }

    pub fn id(&self) -> ScanId {
        self.request.id()
    }
}

impl From<ScanRequest> for Scan {
    fn from(value: ScanRequest) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> ScanRequest {
        ScanRequest {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            uid: None,
            spec: ScanSpec {
                profile: "xccdf_profile_moderate".to_owned(),
                content: "ssg-rhcos4-ds.xml".to_owned(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(request("workers-scan").validate().is_ok());
    }

    #[test]
    fn collects_all_problems() {
        let mut r = request("Bad_Name");
        r.spec.profile = String::new();
        r.spec.content = " ".to_owned();
        let err = r.validate().unwrap_err();
        assert_eq!(err.problems.len(), 3);
        assert!(err.problems[0].starts_with("name 'Bad_Name'"));
    }

    #[test]
    fn rejects_dashes_at_the_edges() {
        assert!(request("-scan").validate().is_err());
        assert!(request("scan-").validate().is_err());
        assert!(request(&"a".repeat(64)).validate().is_err());
    }

    #[test]
    fn id_display() {
        assert_eq!(request("s").id().to_string(), "default/s");
    }

    #[test]
    fn parse_minimal_scan() {
        let json_str = r#"{
    "name": "workers-scan",
    "namespace": "openshift-compliance",
    "spec": {
        "profile": "xccdf_profile_moderate",
        "content": "ssg-rhcos4-ds.xml",
        "nodeSelector": { "node-role.kubernetes.io/worker": "" }
    }
}"#;
        let scan: Scan = serde_json::from_str(json_str).unwrap();
        assert_eq!(scan.request.spec.node_selector.len(), 1);
        assert_eq!(scan.status, ScanStatus::default());
    }
}
