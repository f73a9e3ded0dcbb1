// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Serde helpers for durations written as "10s", "500ms" or "2m".

use serde::{Deserializer, Serializer, de::Visitor};
use std::time::Duration;

const UNITS: &[(&str, fn(u64) -> Duration)] = &[
    ("ns", Duration::from_nanos),
    ("us", Duration::from_micros),
    ("µs", Duration::from_micros),
    ("ms", Duration::from_millis),
    ("s", Duration::from_secs),
    ("m", from_minutes),
];

fn from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;
impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a duration like \"10s\" or a number of seconds")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        parse(v).map_err(serde::de::Error::custom)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| serde::de::Error::custom(format!("negative duration: {v}")))
    }
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}

/// Parses a duration from a number followed by one of `ns`, `us`, `ms`, `s` or `m`.
pub fn parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("Invalid number in duration: {s}"))?;
    match UNITS.iter().find(|(u, _)| *u == unit.trim()) {
        Some((_, f)) => Ok(f(value)),
        None => {
            let supported = UNITS.iter().map(|(u, _)| *u).collect::<Vec<_>>().join(", ");
            Err(format!(
                "Unknown duration unit '{unit}' only '{supported}' are supported"
            ))
        }
    }
}

fn format_duration(duration: &Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos % 1_000_000 != 0 {
        return format!("{nanos}ns");
    }
    let ms = duration.as_millis();
    match ms {
        ms if ms % 60_000 == 0 && ms > 0 => format!("{}m", ms / 60_000),
        ms if ms % 1000 == 0 => format!("{}s", ms / 1000),
        ms => format!("{ms}ms"),
    }
}
