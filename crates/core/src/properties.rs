//! Stage configuration and cache signatures.
//!
//! Configuration is a flat string map. Keys are scoped to a stage by the
//! `"{stage}."` prefix convention, e.g. `tokenize.whitespace`. A stage
//! declares which keys change its behavior; the [`Properties::signature`]
//! over exactly those keys decides whether two configurations may share one
//! cached stage instance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Immutable key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

/// A behavior-relevant configuration key declared by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureKey {
    /// Exactly this key.
    Exact(String),
    /// Every key starting with this prefix.
    Prefix(String),
}

impl SignatureKey {
    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// All keys under `{stage}.`.
    pub fn scope(stage: &str) -> Self {
        Self::Prefix(format!("{stage}."))
    }
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a boolean; anything other than `true` (case-insensitive) is false.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// A copy of `self` with every entry of `overrides` applied on top.
    pub fn merged(&self, overrides: &Properties) -> Properties {
        let mut entries = self.entries.clone();
        entries.extend(overrides.entries.clone());
        Properties { entries }
    }

    /// Entries whose key starts with `"{prefix}."`.
    pub fn scoped(&self, prefix: &str) -> Properties {
        let scope = format!("{prefix}.");
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(&scope))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical serialization of only the `relevant` keys.
    ///
    /// Output is a JSON object in key order. Exact keys that are absent map
    /// to `""`; prefix keys contribute only the entries actually present.
    /// Values are escaped, so distinct selections never collide.
    pub fn signature(&self, relevant: &[SignatureKey]) -> String {
        let mut selected: BTreeMap<&str, &str> = BTreeMap::new();
        for key in relevant {
            match key {
                SignatureKey::Exact(k) => {
                    selected.insert(k.as_str(), self.get(k).unwrap_or_default());
                }
                SignatureKey::Prefix(p) => {
                    for (k, v) in self.entries.range(p.clone()..) {
                        if !k.starts_with(p.as_str()) {
                            break;
                        }
                        selected.insert(k.as_str(), v.as_str());
                    }
                }
            }
        }
        // Serializing string pairs cannot fail.
        serde_json::to_string(&selected).unwrap_or_default()
    }

    /// JSON object form, used as the remote `properties` query parameter.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for Properties {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}
