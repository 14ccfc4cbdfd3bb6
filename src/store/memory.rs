//! In-process document store with a filtered change feed.

use super::{
    ChangeFeed, DocumentStore, FeedEvent, FeedFilter, FeedListener, FeedMessage, FeedOperation,
    FindOptions,
};
use crate::concurrency::{UpdateDocument, VersionedQuery};
use crate::error::{FeedError, LabError, Result};
use crate::query::ConditionMap;
use crate::types::BeakerId;
use crate::value::{Document, ObjectId, Value, ID_FIELD};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Watcher {
    beaker: BeakerId,
    filter: FeedFilter,
    sender: Sender<FeedMessage>,
}

type Watchers = Arc<Mutex<HashMap<u64, Watcher>>>;

/// A [`DocumentStore`] and [`ChangeFeed`] held entirely in memory.
///
/// Writes publish their change event while still holding the data lock, so
/// every watcher sees events in write order.
pub struct MemoryStore {
    beakers: RwLock<HashMap<BeakerId, BTreeMap<ObjectId, Document>>>,
    watchers: Watchers,
    next_watcher: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            beakers: RwLock::new(HashMap::new()),
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watcher: AtomicU64::new(1),
        }
    }

    fn publish(&self, beaker: &BeakerId, event: &FeedEvent) {
        let watchers = self.watchers.lock();
        for watcher in watchers.values().filter(|w| &w.beaker == beaker) {
            if let Some(filtered) = watcher.filter.apply(event) {
                // a dropped listener unregisters itself; a send racing that is harmless
                let _ = watcher.sender.send(FeedMessage::Event(filtered));
            }
        }
    }

    /// Push a raw event through the watchers of `beaker`, as if the store
    /// had produced it.
    pub fn inject(&self, beaker: &BeakerId, event: FeedEvent) {
        self.publish(beaker, &event);
    }

    /// Report a feed-level failure to every watcher of `beaker`.
    pub fn fail_feed(&self, beaker: &BeakerId, message: &str) {
        let error = FeedError::new(message);
        let watchers = self.watchers.lock();
        for watcher in watchers.values().filter(|w| &w.beaker == beaker) {
            let _ = watcher.sender.send(FeedMessage::Error(error.clone()));
        }
    }

    /// End every watch on `beaker`.
    pub fn close_feed(&self, beaker: &BeakerId) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|_, w| {
            if &w.beaker != beaker {
                return true;
            }
            let _ = w.sender.send(FeedMessage::Closed);
            false
        });
    }

    /// Number of open watches on `beaker`.
    pub fn watcher_count(&self, beaker: &BeakerId) -> usize {
        self.watchers
            .lock()
            .values()
            .filter(|w| &w.beaker == beaker)
            .count()
    }

    /// Number of records in `beaker`.
    pub fn len(&self, beaker: &BeakerId) -> usize {
        self.beakers.read().get(beaker).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, beaker: &BeakerId) -> bool {
        self.len(beaker) == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn find_one(&self, beaker: &BeakerId, id: ObjectId) -> Result<Option<Document>> {
        Ok(self
            .beakers
            .read()
            .get(beaker)
            .and_then(|records| records.get(&id))
            .cloned())
    }

    fn find(
        &self,
        beaker: &BeakerId,
        conditions: &ConditionMap,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let beakers = self.beakers.read();
        let records = match beakers.get(beaker) {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };
        let mut matched: Vec<&Document> =
            records.values().filter(|doc| conditions.matches(doc)).collect();
        if !options.sort.is_empty() {
            matched.sort_by(|a, b| options.compare_records(a, b));
        }
        Ok(matched
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|doc| match &options.projection {
                Some(projection) => projection.apply(doc.clone()),
                None => doc.clone(),
            })
            .collect())
    }

    fn insert_one(&self, beaker: &BeakerId, mut document: Document) -> Result<Document> {
        let id = match document.get(ID_FIELD) {
            Some(Value::ObjectId(id)) => *id,
            Some(other) => {
                return Err(LabError::InvalidField(format!(
                    "{ID_FIELD} must be an object id, got {}",
                    other.kind()
                )))
            }
            None => {
                let id = ObjectId::generate();
                document.insert(ID_FIELD.to_string(), Value::ObjectId(id));
                id
            }
        };

        let mut beakers = self.beakers.write();
        let records = beakers.entry(beaker.clone()).or_default();
        if records.contains_key(&id) {
            return Err(LabError::Store(format!("duplicate key {id} in {beaker}")));
        }
        records.insert(id, document.clone());
        self.publish(
            beaker,
            &FeedEvent {
                operation: FeedOperation::Insert,
                document_key: id,
                full_document: Some(document.clone()),
                update_description: None,
            },
        );
        Ok(document)
    }

    fn update_one(
        &self,
        beaker: &BeakerId,
        query: &VersionedQuery,
        update: &UpdateDocument,
    ) -> Result<u64> {
        let mut beakers = self.beakers.write();
        let record = match beakers
            .get_mut(beaker)
            .and_then(|records| records.get_mut(&query.id))
        {
            Some(record) if query.matches(record) => record,
            _ => return Ok(0),
        };
        let description = update.apply(record)?;
        let event = FeedEvent {
            operation: FeedOperation::Update,
            document_key: query.id,
            full_document: Some(record.clone()),
            update_description: Some(description),
        };
        self.publish(beaker, &event);
        Ok(1)
    }

    fn delete_one(&self, beaker: &BeakerId, query: &VersionedQuery) -> Result<u64> {
        let mut beakers = self.beakers.write();
        let records = match beakers.get_mut(beaker) {
            Some(records) => records,
            None => return Ok(0),
        };
        if !records.get(&query.id).is_some_and(|r| query.matches(r)) {
            return Ok(0);
        }
        records.remove(&query.id);
        self.publish(
            beaker,
            &FeedEvent {
                operation: FeedOperation::Delete,
                document_key: query.id,
                full_document: None,
                update_description: None,
            },
        );
        Ok(1)
    }
}

impl ChangeFeed for MemoryStore {
    fn watch(
        &self,
        beaker: &BeakerId,
        filter: FeedFilter,
        sender: Sender<FeedMessage>,
    ) -> Result<FeedListener> {
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().insert(
            id,
            Watcher {
                beaker: beaker.clone(),
                filter,
                sender,
            },
        );
        debug!(watcher = id, beaker = %beaker, "feed watch opened");

        let watchers = Arc::clone(&self.watchers);
        Ok(FeedListener::new(move || {
            if watchers.lock().remove(&id).is_some() {
                debug!(watcher = id, "feed watch closed");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::prepare_update;
    use crate::store::{Projection, SortOrder};
    use crate::value::{document_from_json, get_path, OLD_FIELD, VERSION_FIELD};
    use crossbeam_channel::Receiver;
    use serde_json::json;

    fn beaker() -> BeakerId {
        BeakerId::from("posts")
    }

    fn watch(store: &MemoryStore, filter: FeedFilter) -> (FeedListener, Receiver<FeedMessage>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (store.watch(&beaker(), filter, sender).unwrap(), receiver)
    }

    fn next_event(receiver: &Receiver<FeedMessage>) -> FeedEvent {
        match receiver.try_recv() {
            Ok(FeedMessage::Event(event)) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn record_id(doc: &Document) -> ObjectId {
        match doc.get(ID_FIELD) {
            Some(Value::ObjectId(id)) => *id,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_insert_find_and_paging() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store
                .insert_one(&beaker(), document_from_json(json!({ "n": n, "even": n % 2 == 0 })))
                .unwrap();
        }
        let even = ConditionMap::from_json(json!({ "even": true })).unwrap();
        assert_eq!(store.find(&beaker(), &even, &FindOptions::default()).unwrap().len(), 3);

        let page = FindOptions {
            skip: 1,
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(store.find(&beaker(), &even, &page).unwrap().len(), 1);
        assert_eq!(store.len(&beaker()), 5);
        assert!(store.find(&BeakerId::from("other"), &even, &page).unwrap().is_empty());
    }

    #[test]
    fn test_find_sorts_before_paging_and_projects() {
        let store = MemoryStore::new();
        for (n, title) in [(3, "c"), (1, "a"), (2, "b"), (4, "d")] {
            store
                .insert_one(&beaker(), document_from_json(json!({ "n": n, "title": title })))
                .unwrap();
        }
        let options = FindOptions {
            sort: vec![("n".to_string(), SortOrder::Descending)],
            skip: 1,
            limit: Some(2),
            projection: Some(Projection::Include(vec!["title".to_string()])),
        };
        let found = store.find(&beaker(), &ConditionMap::empty(), &options).unwrap();
        let titles: Vec<Value> = found.iter().map(|r| get_path(r, "title")).collect();
        assert_eq!(titles, vec![Value::from("c"), Value::from("b")]);
        assert!(found.iter().all(|r| !r.contains_key("n") && r.contains_key(ID_FIELD)));
    }

    #[test]
    fn test_duplicate_and_bad_ids() {
        let store = MemoryStore::new();
        let doc = store.insert_one(&beaker(), Document::new()).unwrap();
        assert!(matches!(
            store.insert_one(&beaker(), doc),
            Err(LabError::Store(_))
        ));
        let bad = document_from_json(json!({ "_id": "abc" }));
        assert!(matches!(
            store.insert_one(&beaker(), bad),
            Err(LabError::InvalidField(_))
        ));
    }

    #[test]
    fn test_update_is_compare_and_swap() {
        let store = MemoryStore::new();
        let doc = store
            .insert_one(&beaker(), document_from_json(json!({ "title": "a", "__version": 3 })))
            .unwrap();
        let id = record_id(&doc);

        let first = prepare_update(&doc, document_from_json(json!({ "title": "b" }))).unwrap();
        let second = prepare_update(&doc, document_from_json(json!({ "title": "c" }))).unwrap();
        assert_eq!(store.update_one(&beaker(), &first.query, &first.update).unwrap(), 1);
        assert_eq!(store.update_one(&beaker(), &second.query, &second.update).unwrap(), 0);

        let stored = store.find_one(&beaker(), id).unwrap().unwrap();
        assert_eq!(stored.get("title"), Some(&Value::String("b".into())));
        assert_eq!(stored.get(VERSION_FIELD), Some(&Value::Int64(4)));
        let old = stored.get(OLD_FIELD).and_then(Value::as_document).unwrap();
        assert_eq!(old.get("title"), Some(&Value::String("a".into())));
    }

    #[test]
    fn test_unversioned_record_admits_one_writer() {
        let store = MemoryStore::new();
        let read = store
            .insert_one(&beaker(), document_from_json(json!({ "title": "a" })))
            .unwrap();
        let first = prepare_update(&read, document_from_json(json!({ "title": "b" }))).unwrap();
        let second = prepare_update(&read, document_from_json(json!({ "title": "c" }))).unwrap();
        assert_eq!(store.update_one(&beaker(), &first.query, &first.update).unwrap(), 1);
        assert_eq!(store.update_one(&beaker(), &second.query, &second.update).unwrap(), 0);

        let stored = store.find_one(&beaker(), record_id(&read)).unwrap().unwrap();
        assert_eq!(stored.get("title"), Some(&Value::String("b".into())));
        assert_eq!(stored.get(VERSION_FIELD), Some(&Value::Int64(0)));
    }

    #[test]
    fn test_feed_reports_writes_through_filters() {
        let store = MemoryStore::new();
        let active = ConditionMap::from_json(json!({ "status": "active" })).unwrap();
        let (_listener, receiver) = watch(&store, FeedFilter::Matching(active));
        let (_everything, all) = watch(&store, FeedFilter::Matching(ConditionMap::empty()));

        let doc = store
            .insert_one(&beaker(), document_from_json(json!({ "status": "active" })))
            .unwrap();
        store
            .insert_one(&beaker(), document_from_json(json!({ "status": "draft" })))
            .unwrap();

        let event = next_event(&receiver);
        assert_eq!(event.operation, FeedOperation::Insert);
        assert_eq!(event.full_document.as_ref(), Some(&doc));
        assert!(receiver.try_recv().is_err());
        assert_eq!(all.len(), 2);

        let update = prepare_update(&doc, document_from_json(json!({ "title": "t" }))).unwrap();
        store.update_one(&beaker(), &update.query, &update.update).unwrap();
        let event = next_event(&receiver);
        let desc = event.update_description.unwrap();
        assert!(desc.updated_fields.contains_key("title"));
        assert!(desc.removed_fields.is_empty());
    }

    #[test]
    fn test_shared_sink_keeps_write_order() {
        let store = MemoryStore::new();
        let active = ConditionMap::from_json(json!({ "status": "active" })).unwrap();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let _positive = store
            .watch(&beaker(), FeedFilter::Matching(active.clone()), sender.clone())
            .unwrap();
        let _negative = store
            .watch(&beaker(), FeedFilter::Departing(active), sender)
            .unwrap();

        let mut current = store
            .insert_one(&beaker(), document_from_json(json!({ "status": "active" })))
            .unwrap();
        let id = record_id(&current);
        for _ in 0..50 {
            for status in ["archived", "active"] {
                let update =
                    prepare_update(&current, document_from_json(json!({ "status": status })))
                        .unwrap();
                store.update_one(&beaker(), &update.query, &update.update).unwrap();
                current = store.find_one(&beaker(), id).unwrap().unwrap();
            }
        }

        assert_eq!(next_event(&receiver).operation, FeedOperation::Insert);
        for _ in 0..50 {
            assert_eq!(next_event(&receiver).operation, FeedOperation::Delete);
            assert_eq!(next_event(&receiver).operation, FeedOperation::Update);
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_dropping_listener_unregisters_watch() {
        let store = MemoryStore::new();
        let (listener, receiver) = watch(&store, FeedFilter::Matching(ConditionMap::empty()));
        assert_eq!(store.watcher_count(&beaker()), 1);
        drop(listener);
        assert_eq!(store.watcher_count(&beaker()), 0);
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_feed_error_and_close() {
        let store = MemoryStore::new();
        let (_listener, receiver) = watch(&store, FeedFilter::Matching(ConditionMap::empty()));
        store.fail_feed(&beaker(), "cursor lost");
        store.close_feed(&beaker());
        assert_eq!(
            receiver.try_recv(),
            Ok(FeedMessage::Error(FeedError::new("cursor lost")))
        );
        assert_eq!(receiver.try_recv(), Ok(FeedMessage::Closed));
        assert_eq!(store.watcher_count(&beaker()), 0);
    }
}
