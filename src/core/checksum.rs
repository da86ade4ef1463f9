//! Stable checksums and structural diffs of configuration payloads.
//!
//! Payloads are canonicalized (object keys sorted at every depth) before
//! hashing, so two payloads with the same content always share a checksum.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::{AssetSnapshot, SnapshotDiff};

/// Key reported when a non-object payload changes as a whole
pub const ROOT_KEY: &str = "$";

/// Serialize `value` with object keys sorted recursively
pub fn canonical_json(value: &Value) -> String {
    // Value's Display never fails for in-memory values
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Checksum of a payload (first 16 hex chars of SHA-256 over canonical JSON)
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Top-level key differences between two payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl KeyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare the top-level keys of `previous` and `current`, each list sorted.
///
/// Non-object payloads have no keys; when either side is not an object and
/// the two differ, the change is reported under [`ROOT_KEY`].
pub fn diff_keys(previous: &Value, current: &Value) -> KeyDiff {
    let (Value::Object(before), Value::Object(after)) = (previous, current) else {
        let changed = if canonical_json(previous) == canonical_json(current) {
            Vec::new()
        } else {
            vec![ROOT_KEY.to_string()]
        };
        return KeyDiff {
            changed,
            ..Default::default()
        };
    };

    let before_keys: BTreeSet<&String> = before.keys().collect();
    let after_keys: BTreeSet<&String> = after.keys().collect();

    let added = after_keys
        .difference(&before_keys)
        .map(|k| (*k).clone())
        .collect();
    let removed = before_keys
        .difference(&after_keys)
        .map(|k| (*k).clone())
        .collect();
    let changed = before_keys
        .intersection(&after_keys)
        .filter(|k| canonical_json(&before[k.as_str()]) != canonical_json(&after[k.as_str()]))
        .map(|k| (*k).clone())
        .collect();

    KeyDiff {
        added,
        removed,
        changed,
    }
}

/// Diff a snapshot against whatever is currently deployed
pub fn snapshot_diff(deployed: Option<&AssetSnapshot>, current: &AssetSnapshot) -> SnapshotDiff {
    match deployed {
        None => SnapshotDiff::New {
            checksum: current.checksum.clone(),
        },
        Some(previous) => {
            let keys = diff_keys(&previous.config, &current.config);
            SnapshotDiff::Update {
                added_keys: keys.added,
                removed_keys: keys.removed,
                changed_keys: keys.changed,
                previous_checksum: previous.checksum.clone(),
                current_checksum: current.checksum.clone(),
            }
        }
    }
}
