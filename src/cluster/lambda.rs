// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use async_trait::async_trait;

use super::{ClusterError, NodeResolver, PodClient, PodCreation};
use crate::models::{Node, PodState, ScanPod, ScanRequest};

/// Is a cluster implementation primarily for testing purposes.
///
/// It is holding call back functions so that it is easier to simulate failing or misbehaving
/// clusters without having to implement the async traits each time.
#[allow(clippy::complexity)]
pub struct Lambda {
    resolve: Box<dyn Fn(&ScanRequest) -> Result<Vec<Node>, ClusterError> + Sync + Send + 'static>,
    ensure: Box<dyn Fn(&ScanPod) -> Result<PodCreation, ClusterError> + Sync + Send + 'static>,
    lookup:
        Box<dyn Fn(&str, &str) -> Result<Option<PodState>, ClusterError> + Sync + Send + 'static>,
}

impl Default for Lambda {
    fn default() -> Self {
        Self {
            resolve: Box::new(|_| Ok(vec![])),
            ensure: Box::new(|_| Ok(PodCreation::Created)),
            lookup: Box::new(|_, _| Ok(None)),
        }
    }
}

/// Builds a Lambda cluster implementation.
pub struct LambdaBuilder {
    lambda: Lambda,
}

impl Default for LambdaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LambdaBuilder {
    pub fn new() -> Self {
        Self {
            lambda: Lambda::default(),
        }
    }

    pub fn with_resolve<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScanRequest) -> Result<Vec<Node>, ClusterError> + Sync + Send + 'static,
    {
        self.lambda.resolve = Box::new(f);
        self
    }

    pub fn with_ensure<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScanPod) -> Result<PodCreation, ClusterError> + Sync + Send + 'static,
    {
        self.lambda.ensure = Box::new(f);
        self
    }

    pub fn with_lookup<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Option<PodState>, ClusterError> + Sync + Send + 'static,
    {
        self.lambda.lookup = Box::new(f);
        self
    }

    pub fn build(self) -> Lambda {
        self.lambda
    }
}

#[async_trait]
impl NodeResolver for Lambda {
    async fn resolve(&self, scan: &ScanRequest) -> Result<Vec<Node>, ClusterError> {
        (self.resolve)(scan)
    }
}

#[async_trait]
impl PodClient for Lambda {
    async fn ensure_pod(&self, pod: &ScanPod) -> Result<PodCreation, ClusterError> {
        (self.ensure)(pod)
    }

    async fn lookup_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>, ClusterError> {
        (self.lookup)(namespace, name)
    }
}
