// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Deterministic naming of scanner pods.
//!
//! The name of a pod is derived from the scan and the node it runs on. It is the only link
//! between a target node and its pod, there is no additional index. Launching and polling both
//! rely on deriving the same name for the same pair.

/// Label carrying the name of the owning scan.
pub const SCAN_LABEL: &str = "nodescan.io/scan";
/// Label carrying the name of the target node.
pub const NODE_LABEL: &str = "nodescan.io/node";

/// Upper bound of a pod name. Scan names are DNS labels with at most 63 characters but node
/// names may be up to 253 characters long, so not every pair results in a valid pod name.
pub const MAX_POD_NAME_LEN: usize = 253;

/// Returns the name of the scanner pod of `scan` on `node`.
pub fn pod_name_for(scan: &str, node: &str) -> String {
    format!("{scan}-{node}-pod")
}

#[cfg(test)]
mod tests {
    use super::pod_name_for;

    #[test]
    fn format() {
        assert_eq!(pod_name_for("scan", "node-1"), "scan-node-1-pod");
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            pod_name_for("workers-scan", "ip-10-0-1-2"),
            pod_name_for("workers-scan", "ip-10-0-1-2")
        );
        assert_ne!(
            pod_name_for("workers-scan", "node-1"),
            pod_name_for("workers-scan", "node-2")
        );
    }
}
