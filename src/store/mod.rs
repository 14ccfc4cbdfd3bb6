//! Interfaces to the backing document store and its change feed.
//!
//! The engine does not store anything itself. It needs conditional
//! (compare-and-swap) writes and a change feed that can be filtered on the
//! store side; [`MemoryStore`] provides both in-process.

mod memory;

pub use memory::MemoryStore;

use crate::concurrency::{UpdateDocument, VersionedQuery};
use crate::error::{FeedError, Result};
use crate::query::ConditionMap;
use crate::types::BeakerId;
use crate::value::{
    compare, get_path, remove_path, Document, ObjectId, Value, ID_FIELD, OLD_FIELD, VERSION_FIELD,
};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Direction of one sort key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Field selection applied to each returned record. Paths may be dotted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Keep only these paths, plus `_id`.
    Include(Vec<String>),
    /// Drop these paths.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn paths(&self) -> &[String] {
        match self {
            Projection::Include(paths) | Projection::Exclude(paths) => paths,
        }
    }

    pub fn apply(&self, record: Document) -> Document {
        match self {
            Projection::Include(paths) => {
                let mut out = Document::new();
                if let Some(id) = record.get(ID_FIELD) {
                    out.insert(ID_FIELD.to_string(), id.clone());
                }
                for path in paths {
                    copy_path(&record, &mut out, path);
                }
                out
            }
            Projection::Exclude(paths) => {
                let mut out = record;
                for path in paths {
                    remove_path(&mut out, path);
                }
                out
            }
        }
    }
}

fn copy_path(from: &Document, to: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = from.get(path) {
                to.insert(path.to_string(), value.clone());
            }
        }
        Some((head, rest)) => {
            if let Some(Value::Document(inner)) = from.get(head) {
                let slot = to
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Document(Document::new()));
                if let Value::Document(slot) = slot {
                    copy_path(inner, slot, rest);
                }
            }
        }
    }
}

/// Ordering, paging and projection for [`DocumentStore::find`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Sort keys, most significant first. Ties keep store order.
    pub sort: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub projection: Option<Projection>,
}

impl FindOptions {
    /// Order two records by the sort keys.
    pub fn compare_records(&self, a: &Document, b: &Document) -> Ordering {
        for (path, order) in &self.sort {
            let ordering = sort_compare(&get_path(a, path), &get_path(b, path));
            let ordering = match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

// Kinds sort in bands; only values within a band are compared.
fn sort_band(value: &Value) -> u8 {
    match value {
        Value::Undefined | Value::Null => 0,
        Value::Double(d) if d.is_nan() => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 2,
        Value::Decimal(_) => 3,
        Value::String(_) => 4,
        Value::Document(_) => 5,
        Value::Array(_) => 6,
        Value::ObjectId(_) => 7,
        Value::Bool(_) => 8,
        Value::Date(_) => 9,
    }
}

fn sort_compare(a: &Value, b: &Value) -> Ordering {
    sort_band(a)
        .cmp(&sort_band(b))
        .then_with(|| compare(a, b).unwrap_or(Ordering::Equal))
}

/// CRUD with version-predicated writes.
pub trait DocumentStore: Send + Sync {
    fn find_one(&self, beaker: &BeakerId, id: ObjectId) -> Result<Option<Document>>;

    fn find(
        &self,
        beaker: &BeakerId,
        conditions: &ConditionMap,
        options: &FindOptions,
    ) -> Result<Vec<Document>>;

    /// Insert a record, assigning `_id` when absent. Returns the stored record.
    fn insert_one(&self, beaker: &BeakerId, document: Document) -> Result<Document>;

    /// Apply `update` to the record matching `query`. Returns the number of
    /// records written (0 or 1).
    fn update_one(
        &self,
        beaker: &BeakerId,
        query: &VersionedQuery,
        update: &UpdateDocument,
    ) -> Result<u64>;

    /// Delete the record matching `query`. Returns the number removed.
    fn delete_one(&self, beaker: &BeakerId, query: &VersionedQuery) -> Result<u64>;
}

/// A store-side filtered change feed.
pub trait ChangeFeed: Send + Sync {
    /// Open a watch delivering into `sink`. Watches that share a sink receive
    /// their events in write order. The sink disconnects once every watch
    /// holding it has closed.
    fn watch(
        &self,
        beaker: &BeakerId,
        filter: FeedFilter,
        sink: Sender<FeedMessage>,
    ) -> Result<FeedListener>;
}

/// The store's native operation tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOperation {
    Insert,
    Update,
    Replace,
    Delete,
}

/// Which fields an update touched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescription {
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    /// True when the only change is the version counter.
    pub fn is_version_only(&self) -> bool {
        self.removed_fields.is_empty()
            && self.updated_fields.len() == 1
            && self.updated_fields.contains_key(VERSION_FIELD)
    }
}

/// One raw change-feed event.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEvent {
    pub operation: FeedOperation,
    pub document_key: ObjectId,
    /// Post-write record; absent for deletes.
    pub full_document: Option<Document>,
    pub update_description: Option<UpdateDescription>,
}

/// What a [`FeedListener`] delivers.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    Event(FeedEvent),
    Error(FeedError),
    /// The feed ended; nothing follows.
    Closed,
}

/// Store-side predicate attached to a watch.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedFilter {
    /// Events whose resulting record satisfies the conditions. An empty map
    /// passes every event; deletes carry no record and pass nothing else.
    Matching(ConditionMap),
    /// Updates whose resulting record no longer satisfies the conditions
    /// while its shadow copy did. They are re-tagged as deletes carrying
    /// only the record id.
    Departing(ConditionMap),
}

impl FeedFilter {
    /// Run the filter over one event.
    pub fn apply(&self, event: &FeedEvent) -> Option<FeedEvent> {
        match self {
            FeedFilter::Matching(conditions) => {
                if conditions.is_empty() {
                    return Some(event.clone());
                }
                let doc = event.full_document.as_ref()?;
                conditions.matches(doc).then(|| event.clone())
            }
            FeedFilter::Departing(conditions) => {
                if !matches!(event.operation, FeedOperation::Update | FeedOperation::Replace) {
                    return None;
                }
                let doc = event.full_document.as_ref()?;
                let old = match get_path(doc, OLD_FIELD) {
                    Value::Document(old) => old,
                    _ => return None,
                };
                if conditions.matches(doc) || !conditions.matches(&old) {
                    return None;
                }
                let mut key_only = Document::new();
                key_only.insert(ID_FIELD.to_string(), Value::ObjectId(event.document_key));
                Some(FeedEvent {
                    operation: FeedOperation::Delete,
                    document_key: event.document_key,
                    full_document: Some(key_only),
                    update_description: None,
                })
            }
        }
    }
}

/// An open watch on a change feed. Dropping it closes the store-side watcher.
pub struct FeedListener {
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedListener {
    pub fn new(on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.on_close.is_some()
    }

    /// Stop the store-side watcher. Idempotent.
    pub fn close(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for FeedListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedListener")
            .field("open", &self.is_open())
            .finish()
    }
}
