use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::{DocPath, Document, Fields, Snapshot};
use crate::error::Result;
use crate::query::Query;

pub type SubscriptionId = u64;

/// A live query. The receiver yields the initial snapshot first, then one
/// snapshot per change, until [`DocumentStore::unsubscribe`] is called or the
/// store reports an error.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub snapshots: mpsc::UnboundedReceiver<Result<Snapshot>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Field-level merge into the existing document, creating it if missing.
    Merge,
    /// Replace the whole body.
    Replace,
}

/// Commutative update to an array-valued field treated as a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Remove,
}

/// Contract of the remote document store the client syncs against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn subscribe(&self, query: Query) -> Result<Subscription>;

    /// Stop delivery for `id`. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);

    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Create a document with a store-assigned id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;

    async fn write(&self, path: &DocPath, fields: Fields, mode: WriteMode) -> Result<()>;

    /// Add or remove `value` from the set at `field`. Fails with
    /// `NotFound` when the document does not exist.
    async fn mutate_set(&self, path: &DocPath, field: &str, op: SetOp, value: Value) -> Result<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &DocPath) -> Result<()>;
}
