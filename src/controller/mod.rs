// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Drives scans from PENDING to DONE.
//!
//! A [Reconciler] handles a single reconciliation pass of a scan: it calls the handler matching
//! the current phase, which observes the cluster, decides the next status via [phase] and applies
//! the side effects. Passes never wait for pods; instead the returned [Outcome] tells the
//! [driver::Driver] when to call again.

use std::{sync::Arc, time::Duration};

use futures::future::try_join_all;
use thiserror::Error;

use crate::{
    cluster::{ClusterError, NodeResolver, PodClient, PodCreation, PodFactory},
    models::{Phase, Scan, ScanId, ValidationError},
    naming,
};

pub mod driver;
pub mod phase;

pub use phase::{Effect, ObservedPod, Outcome, Transition};

/// Default interval to check again on running scans.
pub const DEFAULT_RUNNING_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid scan request: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    External(#[from] ClusterError),
    #[error("{0} was modified concurrently")]
    Conflict(ScanId),
}

/// Classification of an [Error] deciding how it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is broken, retrying does not help until it is changed
    Validation,
    /// Expected to go away on retry
    Transient,
    /// The cluster keeps refusing the request
    Permanent,
    /// Lost against a concurrent update, retry with a fresh copy
    Conflict,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) | Error::External(ClusterError::Conflict(_)) => ErrorKind::Conflict,
            Error::External(e) if e.is_retryable() => ErrorKind::Transient,
            Error::External(_) => ErrorKind::Permanent,
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Executes reconciliation passes of scans.
///
/// The reconciler holds no state of its own, each pass only depends on the given scan and what
/// is observed in the cluster. This makes it safe to call any number of times.
pub struct Reconciler<Resolver, Pods, Factory: ?Sized> {
    resolver: Arc<Resolver>,
    pods: Arc<Pods>,
    factory: Arc<Factory>,
    running_requeue: Duration,
}

impl<R, P, F: ?Sized> Reconciler<R, P, F> {
    pub fn new(resolver: Arc<R>, pods: Arc<P>, factory: Arc<F>) -> Self {
        Self {
            resolver,
            pods,
            factory,
            running_requeue: DEFAULT_RUNNING_REQUEUE,
        }
    }

    /// Sets the interval in which running scans are checked.
    pub fn with_running_requeue(mut self, interval: Duration) -> Self {
        self.running_requeue = interval;
        self
    }
}

impl<R, P, F> Reconciler<R, P, F>
where
    R: NodeResolver + Send + Sync,
    P: PodClient + Send + Sync,
    F: PodFactory + Send + Sync + ?Sized,
{
    /// Runs the handler of the current phase.
    ///
    /// On success the status of `scan` is updated in place, on error it is left untouched.
    pub async fn reconcile(&self, scan: &mut Scan) -> Result<Outcome, Error> {
        match scan.status.phase {
            Phase::Pending => self.pending(scan).await,
            Phase::Launching => self.launching(scan).await,
            Phase::Running => self.running(scan).await,
            Phase::Done => self.done(scan).await,
        }
    }

    pub async fn pending(&self, scan: &mut Scan) -> Result<Outcome, Error> {
        let transition = phase::pending(&scan.status, &scan.request, now())?;
        tracing::info!(scan = %scan.id(), "Launching scan");
        self.commit(scan, transition).await
    }

    pub async fn launching(&self, scan: &mut Scan) -> Result<Outcome, Error> {
        let nodes = self.resolver.resolve(&scan.request).await?;
        tracing::debug!(scan = %scan.id(), nodes = nodes.len(), "Resolved target nodes");
        let transition =
            phase::launching(&scan.status, &scan.request, &nodes, self.factory.as_ref())?;
        self.commit(scan, transition).await
    }

    /// Looks up the pods of the targets recorded on launch.
    ///
    /// Only scans launched without recorded targets resolve the nodes again.
    pub async fn running(&self, scan: &mut Scan) -> Result<Outcome, Error> {
        let targets = match &scan.status.targets {
            Some(targets) => targets.clone(),
            None => self
                .resolver
                .resolve(&scan.request)
                .await?
                .into_iter()
                .map(|n| n.name)
                .collect(),
        };
        let namespace = &scan.request.namespace;
        let lookups = targets.iter().map(|node| {
            let pod = naming::pod_name_for(&scan.request.name, node);
            async move {
                let state = self.pods.lookup_pod(namespace, &pod).await?;
                Ok::<_, ClusterError>(ObservedPod {
                    node: node.clone(),
                    pod,
                    state,
                })
            }
        });
        let observed = try_join_all(lookups).await?;
        for o in observed.iter() {
            tracing::trace!(scan = %scan.id(), node = %o.node, pod = %o.pod, state = ?o.state, "Observed pod");
        }
        let transition = phase::running(&scan.status, &observed, self.running_requeue, now());
        if transition.status.is_done() {
            tracing::info!(scan = %scan.id(), result = ?transition.status.result, "Scan finished");
        }
        self.commit(scan, transition).await
    }

    /// A finished scan is never touched again.
    pub async fn done(&self, scan: &mut Scan) -> Result<Outcome, Error> {
        let transition = phase::done(&scan.status);
        Ok(transition.outcome)
    }

    /// Applies the effects and on success takes over the new status.
    async fn commit(&self, scan: &mut Scan, transition: Transition) -> Result<Outcome, Error> {
        for effect in transition.effects {
            self.apply(&scan.id(), effect).await?;
        }
        if scan.status.phase != transition.status.phase {
            tracing::debug!(scan = %scan.id(), from = %scan.status.phase, to = %transition.status.phase, "Phase change");
        }
        scan.status = transition.status;
        Ok(transition.outcome)
    }

    async fn apply(&self, scan: &ScanId, effect: Effect) -> Result<(), Error> {
        match effect {
            Effect::EnsurePod(pod) => match self.pods.ensure_pod(&pod).await? {
                PodCreation::Created => {
                    tracing::debug!(%scan, pod = %pod.name, node = %pod.node_name, "Created pod")
                }
                PodCreation::AlreadyExists => {
                    tracing::trace!(%scan, pod = %pod.name, "Pod already exists")
                }
            },
        }
        Ok(())
    }
}
