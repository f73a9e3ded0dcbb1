// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Configuration of nodescand.
//!
//! The configuration is read from a toml file given via `--config` or `NODESCAN_CONFIG`.
//! Afterwards command line arguments and environment variables overwrite single values.

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ArgAction;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{
    cluster::ScannerPodFactory,
    controller::{DEFAULT_RUNNING_REQUEUE, driver::Settings},
};

pub mod duration;
pub mod logging;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("unable to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error(transparent)]
    Arguments(#[from] clap::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Reconcile {
    #[serde(with = "duration")]
    pub running_requeue: Duration,
    #[serde(with = "duration")]
    pub error_backoff: Duration,
    #[serde(with = "duration")]
    pub permanent_error_backoff: Duration,
    #[serde(with = "duration")]
    pub resync_interval: Duration,
    pub max_concurrent_reconciles: usize,
}

impl Default for Reconcile {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            running_requeue: DEFAULT_RUNNING_REQUEUE,
            error_backoff: settings.error_backoff,
            permanent_error_backoff: settings.permanent_error_backoff,
            resync_interval: settings.resync_interval,
            max_concurrent_reconciles: settings.max_concurrent_reconciles,
        }
    }
}

impl From<&Reconcile> for Settings {
    fn from(value: &Reconcile) -> Self {
        Settings {
            error_backoff: value.error_backoff,
            permanent_error_backoff: value.permanent_error_backoff,
            resync_interval: value.resync_interval,
            max_concurrent_reconciles: value.max_concurrent_reconciles,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Pod {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

impl Default for Pod {
    fn default() -> Self {
        Self {
            image: "ghcr.io/nodescan/scanner:latest".to_owned(),
            service_account: None,
        }
    }
}

impl From<&Pod> for ScannerPodFactory {
    fn from(value: &Pod) -> Self {
        let factory = ScannerPodFactory::new(&value.image);
        match &value.service_account {
            Some(account) => factory.with_service_account(account),
            None => factory,
        }
    }
}

/// Where scans, nodes and pods are stored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Backend {
    /// Keeps everything in memory, optionally seeded from a cluster description
    InMemory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cluster_file: Option<PathBuf>,
    },
    /// Uses the Kubernetes API of the current context
    Kube,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::InMemory { cluster_file: None }
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: logging::Logging,
    pub reconcile: Reconcile,
    pub pod: Pod,
    pub backend: Backend,
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", toml::to_string_pretty(self).unwrap_or_default())
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    pub fn settings(&self) -> Settings {
        Settings::from(&self.reconcile)
    }

    pub fn pod_factory(&self) -> ScannerPodFactory {
        ScannerPodFactory::from(&self.pod)
    }

    fn command() -> clap::Command {
        clap::Command::new("nodescand")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Runs node scans by launching a scanner pod on each target node")
            .arg(
                clap::Arg::new("config")
                    .short('c')
                    .long("config")
                    .env("NODESCAN_CONFIG")
                    .value_parser(clap::builder::PathBufValueParser::new())
                    .action(ArgAction::Set)
                    .help("path to toml config file"),
            )
            .arg(
                clap::Arg::new("log-level")
                    .long("log-level")
                    .env("NODESCAN_LOG_LEVEL")
                    .value_parser(clap::value_parser!(Level))
                    .help("default log level (TRACE, DEBUG, INFO, WARN, ERROR)"),
            )
            .arg(
                clap::Arg::new("backend")
                    .long("backend")
                    .env("NODESCAN_BACKEND")
                    .value_parser(["in-memory", "kube"])
                    .help("where scans are read from"),
            )
            .arg(
                clap::Arg::new("cluster-file")
                    .long("cluster-file")
                    .env("NODESCAN_CLUSTER_FILE")
                    .value_parser(clap::builder::PathBufValueParser::new())
                    .help("cluster description used by the in-memory backend"),
            )
            .arg(
                clap::Arg::new("max-concurrent-reconciles")
                    .long("max-concurrent-reconciles")
                    .env("NODESCAN_MAX_CONCURRENT_RECONCILES")
                    .value_parser(clap::value_parser!(usize))
                    .help("maximum number of scans reconciled at the same time"),
            )
    }

    /// Loads the configuration from the arguments of the process.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::args_os())
    }

    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cmds = Self::command().try_get_matches_from(args)?;
        let mut config = match cmds.get_one::<PathBuf>("config") {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        if let Some(level) = cmds.get_one::<Level>("log-level") {
            config.log.level = (*level).into();
        }
        if let Some(backend) = cmds.get_one::<String>("backend") {
            config.backend = match (backend.as_str(), &config.backend) {
                ("kube", _) => Backend::Kube,
                (_, Backend::InMemory { cluster_file }) => Backend::InMemory {
                    cluster_file: cluster_file.clone(),
                },
                _ => Backend::default(),
            };
        }
        if let Some(path) = cmds.get_one::<PathBuf>("cluster-file") {
            if let Backend::InMemory { cluster_file } = &mut config.backend {
                *cluster_file = Some(path.clone());
            }
        }
        if let Some(max) = cmds.get_one::<usize>("max-concurrent-reconciles") {
            config.reconcile.max_concurrent_reconciles = *max;
        }
        Ok(config)
    }
}
