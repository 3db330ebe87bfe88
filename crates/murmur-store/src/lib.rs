//! # murmur-store
//!
//! The document-store contract the Murmur client synchronizes against, plus
//! [`MemoryStore`], an in-process implementation of it.
//!
//! A store holds JSON documents grouped in collections. Clients subscribe to
//! queries and receive a full snapshot on every change; writes are field-level
//! merges, whole-body replacements, or commutative set mutations on array
//! fields.

pub mod document;
pub mod memory;
pub mod query;
pub mod store;

mod error;

pub use document::{
    lookup, lookup_set_contains, ChangeKind, DocChange, DocPath, Document, FieldValue, Fields,
    Snapshot,
};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, OrderBy, Query};
pub use store::{DocumentStore, SetOp, Subscription, SubscriptionId, WriteMode};
