// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{fmt::Display, str::FromStr};

use super::PodState;

/// Phase of a scan run.
///
/// A scan moves strictly forward: `PENDING` -> `LAUNCHING` -> `RUNNING` -> `DONE`.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[cfg_attr(feature = "kube", derive(schemars::JsonSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[default]
    Pending,
    Launching,
    Running,
    Done,
}

impl Phase {
    /// Returns the phase that follows this one, `None` for `Done`.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Launching),
            Phase::Launching => Some(Phase::Running),
            Phase::Running => Some(Phase::Done),
            Phase::Done => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl AsRef<str> for Phase {
    fn as_ref(&self) -> &str {
        match self {
            Phase::Pending => "PENDING",
            Phase::Launching => "LAUNCHING",
            Phase::Running => "RUNNING",
            Phase::Done => "DONE",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase {0}")]
pub struct UnknownPhase(String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Phase::Pending),
            "LAUNCHING" => Ok(Phase::Launching),
            "RUNNING" => Ok(Phase::Running),
            "DONE" => Ok(Phase::Done),
            _ => Err(UnknownPhase(s.to_owned())),
        }
    }
}

/// Coarse outcome of a finished scan run.
///
/// Only reflects how the scanner pods terminated, the findings themselves are not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "kube", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
pub enum ScanResult {
    /// Every observed pod succeeded
    Succeeded,
    /// At least one pod failed
    Failed,
    /// No pod was observed, e.g. there were no target nodes
    NotAvailable,
}

/// Per node progress of a running scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "kube", derive(schemars::JsonSchema))]
pub struct NodeInfo {
    pub all: u64,
    pub absent: u64,
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl NodeInfo {
    /// Counts the lookup result of a single target node.
    pub fn register(&mut self, state: Option<PodState>) {
        self.all += 1;
        match state {
            None => self.absent += 1,
            Some(PodState::Pending) | Some(PodState::Unknown) => self.pending += 1,
            Some(PodState::Running) => self.running += 1,
            Some(PodState::Succeeded) => self.succeeded += 1,
            Some(PodState::Failed) => self.failed += 1,
        }
    }

    /// Number of nodes that need no further attention.
    pub fn finished(&self) -> u64 {
        self.absent + self.succeeded + self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.finished() == self.all
    }

    pub fn result(&self) -> ScanResult {
        if self.failed > 0 {
            ScanResult::Failed
        } else if self.succeeded > 0 {
            ScanResult::Succeeded
        } else {
            ScanResult::NotAvailable
        }
    }
}

/// Status of a scan, owned by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "kube", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Names of the target nodes, fixed on launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl ScanStatus {
    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order() {
        let mut phase = Phase::default();
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![Phase::Pending, Phase::Launching, Phase::Running, Phase::Done]
        );
    }

    #[test]
    fn phase_string_representation() {
        assert_eq!("running".parse::<Phase>(), Ok(Phase::Running));
        assert_eq!(Phase::Launching.to_string(), "LAUNCHING");
        assert!("stopped".parse::<Phase>().is_err());
        assert_eq!(serde_json::to_string(&Phase::Done).unwrap(), "\"DONE\"");
    }

    #[test]
    fn node_info_result() {
        let mut info = NodeInfo::default();
        info.register(None);
        assert_eq!(info.result(), ScanResult::NotAvailable);
        info.register(Some(PodState::Succeeded));
        assert_eq!(info.result(), ScanResult::Succeeded);
        info.register(Some(PodState::Running));
        assert!(!info.is_finished());
        info.register(Some(PodState::Failed));
        assert_eq!(info.result(), ScanResult::Failed);
        assert_eq!(info.all, 4);
        assert_eq!(info.finished(), 3);
    }

    #[test]
    fn status_omits_unset_fields() {
        let status = ScanStatus {
            phase: Phase::Running,
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"phase":"RUNNING"}"#
        );
    }
}
