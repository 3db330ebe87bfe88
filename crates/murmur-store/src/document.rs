//! Document paths, field writes and snapshot types.
//!
//! Field paths are dot separated (`settings.bob.nickname`, `reactions.❤️`).
//! Merging is always field-level: writing one nested field never clobbers its
//! siblings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Location of a single document: `collection/id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ---------------------------------------------------------------------------
// Field writes
// ---------------------------------------------------------------------------

/// Value of a single field write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A concrete JSON value. Objects are deep-merged into existing objects.
    Value(Value),
    /// Resolved by the store to its own clock at write time.
    ServerTimestamp,
    /// Remove the field.
    Delete,
}

/// An ordered list of field writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, FieldValue)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` to `value`.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .push((path.into(), FieldValue::Value(value.into())));
        self
    }

    /// Set `path` only when `value` is present.
    pub fn set_opt<V: Into<Value>>(self, path: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(path, v),
            None => self,
        }
    }

    pub fn server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.entries.push((path.into(), FieldValue::ServerTimestamp));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.entries.push((path.into(), FieldValue::Delete));
        self
    }

    /// One entry per top-level field of a serializable record.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Self {
                entries: map
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::Value(v)))
                    .collect(),
            }),
            other => Err(StoreError::InvalidDocument(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Format used for resolved server timestamps.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Apply `fields` onto `target`, resolving server timestamps to `now`.
pub fn apply_fields(target: &mut Map<String, Value>, fields: &Fields, now: DateTime<Utc>) -> Result<()> {
    for (path, value) in fields.iter() {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidDocument(format!("bad field path '{path}'")));
        }
        match value {
            FieldValue::Delete => remove_at(target, &segments),
            FieldValue::ServerTimestamp => set_at(target, &segments, timestamp_value(now), false),
            FieldValue::Value(v) => set_at(target, &segments, v.clone(), true),
        }
    }
    Ok(())
}

fn set_at(target: &mut Map<String, Value>, segments: &[&str], value: Value, merge: bool) {
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut cursor = target;
    for segment in parents {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cursor = match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        };
    }
    match cursor.get_mut(*last) {
        Some(existing) if merge => deep_merge(existing, value),
        _ => {
            cursor.insert(last.to_string(), value);
        }
    }
}

fn remove_at(target: &mut Map<String, Value>, segments: &[&str]) {
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut cursor = target;
    for segment in parents {
        cursor = match cursor.get_mut(*segment) {
            Some(Value::Object(map)) => map,
            _ => return,
        };
    }
    cursor.remove(*last);
}

/// Merge `incoming` into `existing`: objects recurse, anything else replaces.
pub fn deep_merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(update)) => {
            for (key, value) in update {
                match current.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Resolve a dotted field path inside a document body.
pub fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |node, segment| node.get(segment))
}

/// Whether the array at `path` contains `member`.
pub fn lookup_set_contains(body: &Value, path: &str, member: &Value) -> bool {
    matches!(lookup(body, path), Some(Value::Array(items)) if items.contains(member))
}

/// Mutable variant of [`lookup`] that creates an empty array at the leaf when
/// the field is missing or not an array.
pub(crate) fn array_at<'a>(body: &'a mut Map<String, Value>, path: &str) -> Result<&'a mut Vec<Value>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidDocument(format!("bad field path '{path}'")));
    }
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::InvalidDocument("empty field path".into()))?;
    let mut cursor = body;
    for segment in parents {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cursor = match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        };
    }
    let leaf = cursor
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !leaf.is_array() {
        *leaf = Value::Array(Vec::new());
    }
    match leaf {
        Value::Array(items) => Ok(items),
        _ => unreachable!("leaf was just made an array"),
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A document as delivered to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Full result set of a query plus what changed since the previous delivery.
/// The first snapshot of a subscription reports every document as added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<Document>,
    pub changes: Vec<DocChange>,
}

impl Snapshot {
    pub fn added(&self) -> impl Iterator<Item = &Document> {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Added)
            .map(|c| &c.doc)
    }
}
