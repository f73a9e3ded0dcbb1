// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Contracts to the cluster the scans are running in.
//!
//! The reconciler only talks to the cluster through the traits within this module. They are
//! implemented by the in memory cluster, by the closure based [lambda::Lambda] used for testing
//! and, with the `kube` feature, by a Kubernetes client.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Node, PodState, Scan, ScanId, ScanPod, ScanRequest, ScanStatus};

pub mod inmemory;
#[cfg(feature = "kube")]
pub mod kube;
pub mod lambda;
mod pod;

pub use pod::*;

/// Errors returned by the cluster collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// The cluster could not be reached or answered with a temporary failure
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    /// The cluster refused the request and will keep refusing it, e.g. an exceeded quota
    #[error("request permanently rejected: {0}")]
    Permanent(String),
    /// A compare and set operation lost against a concurrent update
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The cluster returned data that cannot be interpreted
    #[error("invalid response: {0}")]
    Invalid(String),
}

impl ClusterError {
    /// Returns true when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClusterError::Permanent(_) | ClusterError::Invalid(_))
    }
}

/// Result of ensuring that a pod exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCreation {
    Created,
    AlreadyExists,
}

/// Resolves the nodes a scan applies to.
///
/// Must return the same nodes for the same scan as long as the cluster membership does not
/// change. An empty result is valid.
#[async_trait]
pub trait NodeResolver {
    async fn resolve(&self, scan: &ScanRequest) -> Result<Vec<Node>, ClusterError>;
}

/// Creates and looks up scanner pods.
#[async_trait]
pub trait PodClient {
    /// Creates the pod unless a pod with the same name already exists.
    async fn ensure_pod(&self, pod: &ScanPod) -> Result<PodCreation, ClusterError>;

    /// Returns the state of the pod or `None` when it does not exist.
    async fn lookup_pod(&self, namespace: &str, name: &str)
    -> Result<Option<PodState>, ClusterError>;
}

/// A scan as it is stored, together with the version used for compare and set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedScan {
    pub scan: Scan,
    pub version: String,
}

/// Stores scans and their status.
#[async_trait]
pub trait StatusStore {
    /// Returns the ids of all known scans.
    async fn list(&self) -> Result<Vec<ScanId>, ClusterError>;

    /// Fetches the scan, `None` when it was deleted.
    async fn fetch(&self, id: &ScanId) -> Result<Option<VersionedScan>, ClusterError>;

    /// Replaces the status when the stored version still is `version`.
    ///
    /// Returns the new version on success and [ClusterError::Conflict] when the scan was
    /// modified in between.
    async fn persist(
        &self,
        id: &ScanId,
        version: &str,
        status: &ScanStatus,
    ) -> Result<String, ClusterError>;
}
