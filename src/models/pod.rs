// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{collections::BTreeMap, fmt::Display};

/// Lifecycle state of an existing scanner pod.
///
/// An absent pod is represented by `None` wherever a lookup result is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The state could not be obtained, e.g. the kubelet stopped reporting
    Unknown,
}

impl PodState {
    /// A terminal pod will not change its state anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodState::Succeeded | PodState::Failed)
    }
}

impl AsRef<str> for PodState {
    fn as_ref(&self) -> &str {
        match self {
            PodState::Pending => "pending",
            PodState::Running => "running",
            PodState::Succeeded => "succeeded",
            PodState::Failed => "failed",
            PodState::Unknown => "unknown",
        }
    }
}

impl Display for PodState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Points from a pod to the scan it belongs to.
///
/// Used by the cluster to remove the pods once the scan is deleted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OwnerReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// The container that runs the scan on the target node.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScannerContainer {
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A scanner pod bound to exactly one target node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanPod {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub owner: OwnerReference,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    pub container: ScannerContainer,
}

#[cfg(test)]
mod tests {
    use super::PodState;

    #[test]
    fn terminal_states() {
        assert!(PodState::Succeeded.is_terminal());
        assert!(PodState::Failed.is_terminal());
        assert!(!PodState::Pending.is_terminal());
        assert!(!PodState::Running.is_terminal());
        assert!(!PodState::Unknown.is_terminal());
    }
}
