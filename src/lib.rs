// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Runs a scan on every matching node of a cluster.
//!
//! A scan moves through the phases PENDING, LAUNCHING, RUNNING and DONE. The [controller]
//! decides each step from the stored status and what it observes in the [cluster], so that a
//! pass can be repeated or interrupted at any time.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod models;
pub mod naming;
