//! Desired-vs-current comparison for one resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// How a path differs between desired and current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Present in desired, missing in current.
    Added,
    /// Present in current, missing in desired.
    Removed,
    /// Present in both with different values.
    Changed,
}

/// One differing path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// JSON-pointer style path, `/` for the root.
    pub path: String,
    /// Kind of difference.
    pub kind: ChangeKind,
    /// Desired value at the path.
    pub desired: Option<Value>,
    /// Current value at the path.
    pub current: Option<Value>,
}

/// Ephemeral comparison of desired vs. current state, computed on every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    desired: Value,
    current: Option<Value>,
    entries: Vec<DeltaEntry>,
}

impl ResourceDiff {
    /// Computes the diff. A missing current state differs at the root.
    #[must_use]
    pub fn new(desired: Value, current: Option<Value>) -> Self {
        let mut entries = Vec::new();
        match &current {
            Some(current) => walk("", &desired, current, &mut entries),
            None => entries.push(DeltaEntry {
                path: "/".to_string(),
                kind: ChangeKind::Added,
                desired: Some(desired.clone()),
                current: None,
            }),
        }
        Self {
            desired,
            current,
            entries,
        }
    }

    /// Returns true if desired and current differ anywhere.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.entries.is_empty()
    }

    /// The differing paths.
    #[must_use]
    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    /// The desired state.
    #[must_use]
    pub fn desired(&self) -> &Value {
        &self.desired
    }

    /// The current state, if the resource exists.
    #[must_use]
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// The delta keyed by path, as published in events.
    #[must_use]
    pub fn to_delta_json(&self) -> Value {
        let delta: Map<String, Value> = self
            .entries
            .iter()
            .map(|entry| {
                let mut detail = Map::new();
                detail.insert(
                    "state".to_string(),
                    serde_json::to_value(entry.kind).unwrap_or(Value::Null),
                );
                if let Some(desired) = &entry.desired {
                    detail.insert("desired".to_string(), desired.clone());
                }
                if let Some(current) = &entry.current {
                    detail.insert("current".to_string(), current.clone());
                }
                (entry.path.clone(), Value::Object(detail))
            })
            .collect();
        Value::Object(delta)
    }

    /// Hex SHA-256 of the delta; equal diffs have equal fingerprints.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(&self.to_delta_json()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn walk(path: &str, desired: &Value, current: &Value, out: &mut Vec<DeltaEntry>) {
    match (desired, current) {
        (Value::Object(d), Value::Object(c)) => {
            for (key, d_value) in d {
                let child = format!("{path}/{key}");
                match c.get(key) {
                    Some(c_value) => walk(&child, d_value, c_value, out),
                    None => out.push(DeltaEntry {
                        path: child,
                        kind: ChangeKind::Added,
                        desired: Some(d_value.clone()),
                        current: None,
                    }),
                }
            }
            for (key, c_value) in c {
                if !d.contains_key(key) {
                    out.push(DeltaEntry {
                        path: format!("{path}/{key}"),
                        kind: ChangeKind::Removed,
                        desired: None,
                        current: Some(c_value.clone()),
                    });
                }
            }
        }
        _ if desired != current => out.push(DeltaEntry {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            kind: ChangeKind::Changed,
            desired: Some(desired.clone()),
            current: Some(current.clone()),
        }),
        _ => {}
    }
}
