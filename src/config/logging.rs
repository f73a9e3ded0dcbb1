// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{Level, metadata::ParseLevelError};
use tracing_subscriber::{EnvFilter, filter, layer::SubscriberExt, util::SubscriberInitExt};

/// A tracing level that can be read from and written to a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SerLevel(Level);

impl Default for SerLevel {
    fn default() -> Self {
        Self(Level::INFO)
    }
}

impl FromStr for SerLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::from_str(s).map(SerLevel)
    }
}

impl From<Level> for SerLevel {
    fn from(level: Level) -> Self {
        SerLevel(level)
    }
}

impl From<SerLevel> for Level {
    fn from(level: SerLevel) -> Self {
        level.0
    }
}

impl Serialize for SerLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for SerLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub level: SerLevel,
    /// Levels per target, e.g. `nodescan::controller::driver = "TRACE"`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional: BTreeMap<String, SerLevel>,
}

impl Logging {
    fn targets(&self) -> filter::Targets {
        self.additional.iter().fold(
            filter::Targets::new().with_default(Level::from(self.level)),
            |filter, (name, level)| filter.with_target(name, Level::from(*level)),
        )
    }

    /// Installs the global subscriber.
    ///
    /// When `RUST_LOG` is set it takes precedence over the configured levels.
    pub fn init(&self) {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        match EnvFilter::try_from_default_env() {
            Ok(env) => tracing_subscriber::registry().with(layer).with(env).init(),
            Err(_) => tracing_subscriber::registry()
                .with(layer)
                .with(self.targets())
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn parse_levels() {
        let logging: Logging = toml::from_str(
            r#"
level = "debug"
[additional]
"nodescan::cluster" = "WARN"
"#,
        )
        .unwrap();
        assert_eq!(logging.level, SerLevel::from(Level::DEBUG));
        assert_eq!(
            logging.additional.get("nodescan::cluster"),
            Some(&SerLevel::from(Level::WARN))
        );
    }

    #[test]
    fn unknown_level() {
        assert!(toml::from_str::<Logging>("level = \"loud\"").is_err());
    }

    #[test]
    fn targets_use_default_level() {
        let logging = Logging::default();
        assert_eq!(
            logging.targets().default_level(),
            Some(LevelFilter::from_level(Level::INFO))
        );
    }
}
