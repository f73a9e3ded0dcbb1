// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

mod node;
mod pod;
mod scan;
mod status;

pub use node::*;
pub use pod::*;
pub use scan::*;
pub use status::*;

/// Returned when a scan request cannot be launched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .problems.join(", "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}
