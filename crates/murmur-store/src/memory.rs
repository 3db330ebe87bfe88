//! In-process implementation of [`DocumentStore`].
//!
//! Used by tests and local development. Documents live in a map per
//! collection; every write re-evaluates the listeners on the touched
//! collection and pushes a snapshot to those whose result set changed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use murmur_shared::{Clock, SystemClock};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::{apply_fields, array_at, ChangeKind, DocChange, DocPath, Document, Fields, Snapshot};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::store::{DocumentStore, SetOp, Subscription, SubscriptionId, WriteMode};

struct StoredDoc {
    /// Insertion order, the tie-breaker for equal sort keys.
    seq: u64,
    body: Map<String, Value>,
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<Result<Snapshot>>,
    last: Vec<Document>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, StoredDoc>>,
    listeners: HashMap<SubscriptionId, Listener>,
    next_seq: u64,
    next_subscription: SubscriptionId,
    denied_paths: HashSet<DocPath>,
    denied_collections: HashSet<String>,
    writes: usize,
}

impl Inner {
    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };
        let mut matched: Vec<(u64, Document)> = docs
            .iter()
            .map(|(id, stored)| {
                (
                    stored.seq,
                    Document {
                        id: id.clone(),
                        data: Value::Object(stored.body.clone()),
                    },
                )
            })
            .filter(|(_, doc)| query.matches(&doc.id, &doc.data))
            .collect();
        matched.sort_by(|(seq_a, a), (seq_b, b)| {
            query.compare(&a.data, &b.data).then(seq_a.cmp(seq_b))
        });
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched.into_iter().map(|(_, doc)| doc).collect()
    }

    fn check_writable(&self, path: &DocPath) -> Result<()> {
        if self.denied_collections.contains(&path.collection) || self.denied_paths.contains(path) {
            return Err(StoreError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    /// Push a snapshot to every listener on `collection` whose result changed.
    fn notify(&mut self, collection: &str) {
        let ids: Vec<SubscriptionId> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();

        let mut closed = Vec::new();
        for id in ids {
            let docs = match self.listeners.get(&id) {
                Some(listener) => self.evaluate(&listener.query),
                None => continue,
            };
            let Some(listener) = self.listeners.get_mut(&id) else {
                continue;
            };
            if docs == listener.last {
                continue;
            }
            let changes = diff(&listener.last, &docs);
            listener.last = docs.clone();
            if listener.tx.send(Ok(Snapshot { docs, changes })).is_err() {
                closed.push(id);
            }
        }
        for id in closed {
            debug!(subscription = id, "Dropping listener with closed receiver");
            self.listeners.remove(&id);
        }
    }
}

fn diff(previous: &[Document], current: &[Document]) -> Vec<DocChange> {
    let before: HashMap<&str, &Document> = previous.iter().map(|d| (d.id.as_str(), d)).collect();
    let after: HashSet<&str> = current.iter().map(|d| d.id.as_str()).collect();

    let mut changes: Vec<DocChange> = previous
        .iter()
        .filter(|d| !after.contains(d.id.as_str()))
        .map(|d| DocChange {
            kind: ChangeKind::Removed,
            doc: d.clone(),
        })
        .collect();

    for doc in current {
        let kind = match before.get(doc.id.as_str()) {
            None => ChangeKind::Added,
            Some(old) if old.data != doc.data => ChangeKind::Modified,
            Some(_) => continue,
        };
        changes.push(DocChange {
            kind,
            doc: doc.clone(),
        });
    }
    changes
}

/// Shared in-memory document store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    /// A store whose server timestamps come from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse writes to a single document.
    pub fn deny_path(&self, path: DocPath) {
        self.lock().denied_paths.insert(path);
    }

    /// Refuse writes to, and subscriptions on, a whole collection.
    pub fn deny_collection(&self, collection: &str) {
        self.lock().denied_collections.insert(collection.to_string());
    }

    pub fn allow_all(&self) {
        let mut inner = self.lock();
        inner.denied_paths.clear();
        inner.denied_collections.clear();
    }

    /// Terminate every live subscription on `collection` with an error.
    pub fn fail_subscriptions(&self, collection: &str) {
        let mut inner = self.lock();
        let failing: Vec<SubscriptionId> = inner
            .listeners
            .iter()
            .filter(|(_, l)| l.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        for id in failing {
            if let Some(listener) = inner.listeners.remove(&id) {
                let _ = listener.tx.send(Err(StoreError::Unavailable(format!(
                    "subscription on '{collection}' terminated"
                ))));
            }
        }
    }

    /// Number of write operations accepted so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Seed a document without counting it as a client write.
    pub fn insert_raw(&self, collection: &str, id: &str, body: Value) {
        let mut inner = self.lock();
        let body = match body {
            Value::Object(map) => map,
            other => {
                warn!(collection, id, "Seeding non-object body: {other}");
                Map::new()
            }
        };
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), StoredDoc { seq, body });
        inner.notify(collection);
    }

    /// Current body of a document.
    pub fn document(&self, path: &DocPath) -> Option<Value> {
        self.lock()
            .collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|stored| Value::Object(stored.body.clone()))
    }

    /// All documents in a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().evaluate(&Query::collection(collection))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        let mut inner = self.lock();
        if inner.denied_collections.contains(&query.collection) {
            return Err(StoreError::PermissionDenied(query.collection.clone()));
        }
        inner.next_subscription += 1;
        let id = inner.next_subscription;
        let (tx, rx) = mpsc::unbounded_channel();

        let docs = inner.evaluate(&query);
        let changes = diff(&[], &docs);
        // The receiver is still in hand, so the initial send cannot fail.
        let _ = tx.send(Ok(Snapshot {
            docs: docs.clone(),
            changes,
        }));
        debug!(subscription = id, collection = %query.collection, "Subscription started");
        inner.listeners.insert(
            id,
            Listener {
                query,
                tx,
                last: docs,
            },
        );
        Ok(Subscription { id, snapshots: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().listeners.remove(&id).is_some() {
            debug!(subscription = id, "Subscription cancelled");
        }
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        Ok(self.document(path).map(|data| Document {
            id: path.id.clone(),
            data,
        }))
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let path = DocPath::new(collection, id.clone());
        let now = self.clock.now();

        let mut inner = self.lock();
        inner.check_writable(&path)?;
        let mut body = Map::new();
        apply_fields(&mut body, &fields, now)?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), StoredDoc { seq, body });
        inner.writes += 1;
        inner.notify(collection);
        Ok(id)
    }

    async fn write(&self, path: &DocPath, fields: Fields, mode: WriteMode) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.check_writable(path)?;

        let existing = inner
            .collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|stored| (stored.seq, stored.body.clone()));
        let (seq, mut body) = match (existing, mode) {
            (Some((seq, body)), WriteMode::Merge) => (seq, body),
            (Some((seq, _)), WriteMode::Replace) => (seq, Map::new()),
            (None, _) => {
                inner.next_seq += 1;
                (inner.next_seq, Map::new())
            }
        };
        apply_fields(&mut body, &fields, now)?;
        inner
            .collections
            .entry(path.collection.clone())
            .or_default()
            .insert(path.id.clone(), StoredDoc { seq, body });
        inner.writes += 1;
        inner.notify(&path.collection);
        Ok(())
    }

    async fn mutate_set(&self, path: &DocPath, field: &str, op: SetOp, value: Value) -> Result<()> {
        let mut inner = self.lock();
        inner.check_writable(path)?;
        let stored = inner
            .collections
            .get_mut(&path.collection)
            .and_then(|docs| docs.get_mut(&path.id))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        let items = array_at(&mut stored.body, field)?;
        match op {
            SetOp::Union => {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            SetOp::Remove => items.retain(|v| v != &value),
        }
        inner.writes += 1;
        inner.notify(&path.collection);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        let mut inner = self.lock();
        inner.check_writable(path)?;
        let removed = inner
            .collections
            .get_mut(&path.collection)
            .and_then(|docs| docs.remove(&path.id))
            .is_some();
        inner.writes += 1;
        if removed {
            inner.notify(&path.collection);
        }
        Ok(())
    }
}
