/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ordered option lookup across named scopes.
//!
//! A chain is typically `schedule options → instrument settings → built-in
//! defaults`.  The first scope holding a key wins.  Inside a scope a key is
//! looked up literally first (`day.sample.rate: 30`) and then as a nested
//! path (`day: {sample: {rate: 30}}`), so both YAML spellings work.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::duration;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("option '{key}' in scope '{scope}' has the wrong type: {source}")]
    Type {
        key: String,
        scope: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("option '{key}' in scope '{scope}' is not a duration")]
    Duration { key: String, scope: String },
}

#[derive(Debug, Clone)]
struct Scope {
    name: String,
    values: Mapping,
}

#[derive(Debug, Clone, Default)]
pub struct LookupChain {
    scopes: Vec<Scope>,
}

/// Options every chain falls back to.
pub fn builtin_defaults() -> Mapping {
    let mut defaults = Mapping::new();
    defaults.insert("power.good.watts".into(), Value::from(20.0));
    defaults.insert("power.key".into(), "power".into());
    defaults.insert("power.field".into(), "watts".into());
    defaults
}

fn lookup_in<'a>(values: &'a Mapping, key: &str) -> Option<&'a Value> {
    if let Some(value) = values.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = values.get(parts.next()?)?;
    for part in parts {
        current = current.as_mapping()?.get(part)?;
    }
    Some(current)
}

impl LookupChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scope with lower precedence than every existing one.
    pub fn with_scope(mut self, name: impl Into<String>, values: Mapping) -> Self {
        self.scopes.push(Scope {
            name: name.into(),
            values,
        });
        self
    }

    /// Raw value and the scope it came from.
    pub fn raw(&self, key: &str) -> Option<(&str, &Value)> {
        self.scopes
            .iter()
            .find_map(|scope| lookup_in(&scope.values, key).map(|v| (scope.name.as_str(), v)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Typed value of `key`.  An explicit `null` reads as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LookupError> {
        match self.raw(key) {
            None | Some((_, Value::Null)) => Ok(None),
            Some((scope, value)) => serde_yaml::from_value(value.clone())
                .map(Some)
                .map_err(|source| LookupError::Type {
                    key: key.to_string(),
                    scope: scope.to_string(),
                    source,
                }),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, LookupError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn duration(&self, key: &str) -> Result<Option<Duration>, LookupError> {
        match self.raw(key) {
            None | Some((_, Value::Null)) => Ok(None),
            Some((scope, value)) => {
                duration::from_value(value)
                    .map(Some)
                    .ok_or_else(|| LookupError::Duration {
                        key: key.to_string(),
                        scope: scope.to_string(),
                    })
            }
        }
    }

    pub fn duration_or(&self, key: &str, default: Duration) -> Result<Duration, LookupError> {
        Ok(self.duration(key)?.unwrap_or(default))
    }
}
