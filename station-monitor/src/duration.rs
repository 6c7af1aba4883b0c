/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Durations as they appear in YAML: a number of seconds (`90`, `2.5`) or a
//! humantime string (`"10m"`, `"1h 30m"`).

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

/// Interprets a YAML scalar as a duration.  Negative or non-finite numbers
/// and unparsable strings yield `None`.
pub fn from_value(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_secs),
        Value::String(s) => parse(s),
        _ => None,
    }
}

/// Parses `"90"`, `"2.5"` or a humantime expression.
pub fn parse(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return from_secs(secs);
    }
    humantime::parse_duration(text).ok()
}

fn from_secs(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// `#[serde(deserialize_with = "duration::required")]`
pub fn required<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {:?}", value)))
}

/// `#[serde(default, deserialize_with = "duration::optional")]`
pub fn optional<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    from_value(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {:?}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn numbers_are_seconds() {
        assert_eq!(from_value(&yaml("90")), Some(Duration::from_secs(90)));
        assert_eq!(from_value(&yaml("2.5")), Some(Duration::from_millis(2500)));
        assert_eq!(from_value(&yaml("-1")), None);
        assert_eq!(from_value(&yaml("'10m'")), Some(Duration::from_secs(600)));
    }

    #[test]
    fn strings_accept_humantime() {
        assert_eq!(parse("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse("1h 30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse(" 45 "), Some(Duration::from_secs(45)));
        assert_eq!(parse("soon"), None);
    }
}
