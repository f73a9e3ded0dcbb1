// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Decides the next status of a scan.
//!
//! The functions within this module do not talk to the cluster. They get the current status and
//! what was observed and return the next status, the side effects to apply and how the scan
//! should be rescheduled. Applying the side effects is up to the caller.

use std::time::Duration;

use crate::{
    cluster::PodFactory,
    models::{Node, NodeInfo, Phase, PodState, ScanPod, ScanRequest, ScanStatus, ValidationError},
    naming,
};

/// Tells the driver when to reconcile a scan again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reconcile again as soon as possible
    Requeue,
    /// Reconcile again after the given duration
    RequeueAfter(Duration),
    /// Nothing to do until the scan is changed
    AwaitChange,
}

/// A side effect on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the pod unless it already exists
    EnsurePod(ScanPod),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: ScanStatus,
    pub effects: Vec<Effect>,
    pub outcome: Outcome,
}

impl Transition {
    fn step(status: ScanStatus, outcome: Outcome) -> Self {
        Self {
            status,
            effects: vec![],
            outcome,
        }
    }
}

/// The observed state of the pod of one target node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPod {
    pub node: String,
    pub pod: String,
    pub state: Option<PodState>,
}

/// Validates the request and moves on to launching.
pub fn pending(
    status: &ScanStatus,
    request: &ScanRequest,
    now: i64,
) -> Result<Transition, ValidationError> {
    request.validate()?;
    let next = ScanStatus {
        phase: Phase::Launching,
        error: None,
        start_time: status.start_time.or(Some(now)),
        ..status.clone()
    };
    Ok(Transition::step(next, Outcome::Requeue))
}

/// Requests a pod for each target node and moves on to running.
///
/// Every node gets an [Effect::EnsurePod] regardless of whether the pod already exists, creating
/// a pod is idempotent. The target nodes are recorded so that running checks the same nodes
/// even when the selector or the cluster changes afterwards.
pub fn launching<F>(
    status: &ScanStatus,
    request: &ScanRequest,
    nodes: &[Node],
    factory: &F,
) -> Result<Transition, ValidationError>
where
    F: PodFactory + ?Sized,
{
    let pods: Vec<_> = nodes.iter().map(|node| factory.pod_for(request, node)).collect();
    let problems: Vec<_> = pods
        .iter()
        .filter(|p| p.name.len() > naming::MAX_POD_NAME_LEN)
        .map(|p| {
            format!(
                "pod name for node '{}' exceeds {} characters",
                p.node_name,
                naming::MAX_POD_NAME_LEN
            )
        })
        .collect();
    if !problems.is_empty() {
        return Err(ValidationError { problems });
    }
    let next = ScanStatus {
        phase: Phase::Running,
        error: None,
        targets: Some(nodes.iter().map(|n| n.name.clone()).collect()),
        // states are unknown until the first lookup
        nodes: Some(NodeInfo {
            all: nodes.len() as u64,
            ..Default::default()
        }),
        ..status.clone()
    };
    Ok(Transition {
        status: next,
        effects: pods.into_iter().map(Effect::EnsurePod).collect(),
        outcome: Outcome::Requeue,
    })
}

/// Checks if every target node is finished.
///
/// A node is finished when its pod either is in a terminal state or does not exist (anymore).
/// When not all nodes are finished the scan stays in running and is checked again after
/// `backoff`.
pub fn running(
    status: &ScanStatus,
    observed: &[ObservedPod],
    backoff: Duration,
    now: i64,
) -> Transition {
    let mut info = NodeInfo::default();
    for o in observed {
        info.register(o.state);
    }
    if info.is_finished() {
        let next = ScanStatus {
            phase: Phase::Done,
            result: Some(info.result()),
            error: None,
            end_time: Some(now),
            nodes: Some(info),
            ..status.clone()
        };
        Transition::step(next, Outcome::AwaitChange)
    } else {
        let next = ScanStatus {
            error: None,
            nodes: Some(info),
            ..status.clone()
        };
        Transition::step(next, Outcome::RequeueAfter(backoff))
    }
}

/// A finished scan stays finished.
pub fn done(status: &ScanStatus) -> Transition {
    Transition::step(status.clone(), Outcome::AwaitChange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cluster::ScannerPodFactory, models::ScanResult, models::ScanSpec};

    const BACKOFF: Duration = Duration::from_secs(10);

    fn request() -> ScanRequest {
        ScanRequest {
            name: "scan".to_owned(),
            namespace: "default".to_owned(),
            uid: None,
            spec: ScanSpec {
                profile: "p".to_owned(),
                content: "c".to_owned(),
                ..Default::default()
            },
        }
    }

    fn observed(states: &[Option<PodState>]) -> Vec<ObservedPod> {
        states
            .iter()
            .enumerate()
            .map(|(i, state)| ObservedPod {
                node: format!("node-{i}"),
                pod: format!("scan-node-{i}-pod"),
                state: *state,
            })
            .collect()
    }

    #[test]
    fn pending_to_launching() {
        let t = pending(&ScanStatus::default(), &request(), 42).unwrap();
        assert_eq!(t.status.phase, Phase::Launching);
        assert_eq!(t.status.start_time, Some(42));
        assert_eq!(t.outcome, Outcome::Requeue);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn pending_keeps_phase_on_invalid_request() {
        let mut r = request();
        r.spec.profile.clear();
        assert!(pending(&ScanStatus::default(), &r, 0).is_err());
    }

    #[test]
    fn launching_requests_one_pod_per_node() {
        let nodes = vec![Node::new("node-1"), Node::new("node-2")];
        let status = ScanStatus {
            phase: Phase::Launching,
            ..Default::default()
        };
        let t = launching(&status, &request(), &nodes, &ScannerPodFactory::new("img")).unwrap();
        assert_eq!(t.status.phase, Phase::Running);
        assert_eq!(
            t.status.targets,
            Some(vec!["node-1".to_owned(), "node-2".to_owned()])
        );
        let info = t.status.nodes.clone().unwrap();
        assert_eq!((info.all, info.pending), (2, 0));
        let names: Vec<_> = t
            .effects
            .iter()
            .map(|Effect::EnsurePod(p)| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["scan-node-1-pod", "scan-node-2-pod"]);
    }

    #[test]
    fn launching_rejects_too_long_pod_names() {
        let nodes = vec![Node::new("node-1"), Node::new("n".repeat(250))];
        let status = ScanStatus {
            phase: Phase::Launching,
            ..Default::default()
        };
        let err = launching(&status, &request(), &nodes, &ScannerPodFactory::new("img"))
            .unwrap_err();
        assert_eq!(err.problems.len(), 1);
        assert!(err.problems[0].contains("exceeds 253 characters"));
    }

    #[test]
    fn running_without_pods_is_done() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        let t = running(&status, &observed(&[None, None]), BACKOFF, 7);
        assert_eq!(t.status.phase, Phase::Done);
        assert_eq!(t.status.result, Some(ScanResult::NotAvailable));
        assert_eq!(t.status.end_time, Some(7));
    }

    #[test]
    fn running_without_target_nodes_is_done() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        assert_eq!(running(&status, &[], BACKOFF, 0).status.phase, Phase::Done);
    }

    #[test]
    fn running_waits_for_non_terminal_pods() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        let t = running(
            &status,
            &observed(&[Some(PodState::Succeeded), Some(PodState::Running)]),
            BACKOFF,
            0,
        );
        assert_eq!(t.status.phase, Phase::Running);
        assert_eq!(t.outcome, Outcome::RequeueAfter(BACKOFF));
        assert_eq!(t.status.nodes.as_ref().map(|n| n.running), Some(1));
    }

    #[test]
    fn running_with_failed_pod_reports_failure() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        let t = running(
            &status,
            &observed(&[Some(PodState::Succeeded), Some(PodState::Failed), None]),
            BACKOFF,
            0,
        );
        assert_eq!(t.status.phase, Phase::Done);
        assert_eq!(t.status.result, Some(ScanResult::Failed));
    }

    #[test]
    fn done_is_unchanged() {
        let status = ScanStatus {
            phase: Phase::Done,
            result: Some(ScanResult::Succeeded),
            ..Default::default()
        };
        let t = done(&status);
        assert_eq!(t.status, status);
        assert!(t.effects.is_empty());
        assert_eq!(t.outcome, Outcome::AwaitChange);
    }
}
