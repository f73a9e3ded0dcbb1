// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Command line tool around nodescan.
//!
//! `pod-name` prints the name of the pod a scan uses on a node. `simulate` runs the scans of a
//! cluster description against an in-memory cluster and prints every status change as a JSON
//! line.

use std::{
    collections::BTreeSet,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use nodescan::{
    cluster::{
        ScannerPodFactory,
        inmemory::{ClusterDescription, InMemoryCluster, LoadError},
    },
    controller::{Outcome, Reconciler, driver::Driver},
    models::{ScanId, ScanStatus},
    naming,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("unable to write output: {0}")]
    Io(#[from] io::Error),
    #[error("unable to serialize status: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} scans did not finish within {1} rounds")]
    Unfinished(usize, usize),
}

#[derive(clap::Parser)]
#[command(version, about = "Is a CLI tool around nodescan.")]
enum Args {
    /// Prints the pod name of a scan on a node.
    PodName(PodNameArgs),
    /// Runs all scans of a cluster description until they are finished.
    Simulate(SimulateArgs),
}

#[derive(clap::Parser)]
struct PodNameArgs {
    scan: String,
    node: String,
}

#[derive(clap::Parser)]
struct SimulateArgs {
    /// toml file containing nodes and scans
    cluster: PathBuf,
    /// Image of the scanner pods
    #[arg(long, default_value = "scanner")]
    image: String,
    /// Stops after that many rounds even when scans are not finished
    #[arg(long, default_value_t = 100)]
    max_rounds: usize,
    /// Print more details while running
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct Line<'a> {
    round: usize,
    scan: String,
    #[serde(flatten)]
    status: &'a ScanStatus,
}

fn set_logging(level: u8) {
    let level = match level {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();
}

async fn simulate(args: SimulateArgs) -> Result<(), CliError> {
    set_logging(args.verbose);
    let cluster = Arc::new(InMemoryCluster::from(ClusterDescription::from_file(
        &args.cluster,
    )?));
    let reconciler = Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        Arc::new(ScannerPodFactory::new(args.image)),
    )
    .with_running_requeue(Duration::ZERO);
    let driver = Driver::new(reconciler, cluster.clone(), Default::default());

    let mut open: BTreeSet<ScanId> = cluster.scans().iter().map(|s| s.id()).collect();
    let mut out = io::stdout().lock();
    for round in 1..=args.max_rounds {
        if open.is_empty() {
            return Ok(());
        }
        let mut settled = vec![];
        for id in open.iter() {
            let before = cluster.scan(id).map(|s| s.status);
            let outcome = driver.pass(id).await;
            let Some(scan) = cluster.scan(id) else {
                settled.push(id.clone());
                continue;
            };
            if before.as_ref() != Some(&scan.status) {
                let line = Line {
                    round,
                    scan: id.to_string(),
                    status: &scan.status,
                };
                writeln!(out, "{}", serde_json::to_string(&line)?)?;
            }
            if scan.status.is_done() || outcome == Outcome::AwaitChange {
                settled.push(id.clone());
            }
        }
        for id in settled {
            open.remove(&id);
        }
        cluster.advance_pods();
    }
    match open.len() {
        0 => Ok(()),
        n => Err(CliError::Unfinished(n, args.max_rounds)),
    }
}

#[tokio::main]
async fn main() {
    let result = match Args::parse() {
        Args::PodName(args) => {
            println!("{}", naming::pod_name_for(&args.scan, &args.node));
            Ok(())
        }
        Args::Simulate(args) => simulate(args).await,
    };
    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
