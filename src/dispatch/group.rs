//! One shared change-feed subscription and its fan-out.

use super::manager::Registry;
use super::pipeline::{ChangePipeline, GroupKey};
use super::types::{ChangeEvent, DropReason, SubscriberMessage};
use crate::codec;
use crate::error::{FeedError, LabError, Result};
use crate::store::{ChangeFeed, FeedEvent, FeedListener, FeedMessage};
use crate::types::{ConnectionId, SubscriptionId};
use crate::value::{is_shadow_path, strip_internal_fields, Document, Value, ID_FIELD};
use crossbeam_channel::{Receiver, Select, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Subscription ids are only unique within a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SubscriberKey {
    pub connection: ConnectionId,
    pub id: SubscriptionId,
}

/// Feed listeners for one [`GroupKey`] plus the subscribers sharing them.
///
/// A pump thread reads the listeners and fans every event out to the
/// subscriber mailboxes. Lock order is registry, then `subscribers`.
pub(crate) struct ListenerGroup {
    key: GroupKey,
    subscribers: Mutex<HashMap<SubscriberKey, Sender<SubscriberMessage>>>,
    listeners: Mutex<Vec<FeedListener>>,
    shutdown: Mutex<Option<Sender<()>>>,
    stopped: AtomicBool,
}

impl ListenerGroup {
    /// Open the feed listeners of `pipeline` and start pumping. Both
    /// listeners feed one channel so the pump sees events in write order.
    pub(crate) fn open(
        pipeline: ChangePipeline,
        feed: &dyn ChangeFeed,
        registry: Weak<Registry>,
    ) -> Result<Arc<Self>> {
        let (key, positive, negative) = pipeline.into_parts();
        let (sink, events) = crossbeam_channel::unbounded();
        let listeners = match negative {
            Some(negative) => vec![
                feed.watch(key.beaker(), positive, sink.clone())?,
                feed.watch(key.beaker(), negative, sink)?,
            ],
            None => vec![feed.watch(key.beaker(), positive, sink)?],
        };
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);

        let group = Arc::new(Self {
            key,
            subscribers: Mutex::new(HashMap::new()),
            listeners: Mutex::new(listeners),
            shutdown: Mutex::new(Some(shutdown_tx)),
            stopped: AtomicBool::new(false),
        });

        let pump = Arc::clone(&group);
        std::thread::Builder::new()
            .name(format!("chembase-feed-{}", group.key.beaker()))
            .spawn(move || pump.run(events, shutdown_rx, registry))
            .map_err(|e| LabError::Store(format!("failed to spawn feed pump: {e}")))?;

        info!(group = %group.key, listeners = group.listener_count(), "listener group opened");
        Ok(group)
    }

    pub(crate) fn key(&self) -> &GroupKey {
        &self.key
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Caller holds the registry lock.
    pub(crate) fn add(&self, key: SubscriberKey, sender: Sender<SubscriberMessage>) {
        self.subscribers.lock().insert(key, sender);
    }

    /// Caller holds the registry lock. Returns the removed mailbox and
    /// whether the group is now empty.
    pub(crate) fn remove(
        &self,
        key: &SubscriberKey,
    ) -> (Option<Sender<SubscriberMessage>>, bool) {
        let mut subscribers = self.subscribers.lock();
        let sender = subscribers.remove(key);
        (sender, subscribers.is_empty())
    }

    /// Close the feed listeners and end the pump. Idempotent.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // dropping the sender wakes the pump
        self.shutdown.lock().take();
        for mut listener in self.listeners.lock().drain(..) {
            listener.close();
        }
        info!(group = %self.key, "listener group closed");
    }

    /// Take every subscriber out and send each a final `Closed(reason)`.
    /// Returns how many there were.
    pub(crate) fn close_all(&self, reason: DropReason) -> usize {
        let drained: Vec<_> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        for sender in &drained {
            let _ = sender.try_send(SubscriberMessage::Closed(reason.clone()));
        }
        drained.len()
    }

    fn run(
        self: Arc<Self>,
        events: Receiver<FeedMessage>,
        shutdown: Receiver<()>,
        registry: Weak<Registry>,
    ) {
        loop {
            if self.is_stopped() {
                break;
            }
            let mut select = Select::new();
            select.recv(&events);
            let shutdown_index = select.recv(&shutdown);
            let op = select.select();
            let index = op.index();
            if index == shutdown_index {
                let _ = op.recv(&shutdown);
                break;
            }

            match op.recv(&events) {
                Ok(FeedMessage::Event(event)) => self.dispatch(event, &registry),
                Ok(FeedMessage::Error(error)) => self.broadcast_error(error, &registry),
                Ok(FeedMessage::Closed) | Err(_) => {
                    self.feed_closed(&registry);
                    break;
                }
            }
        }
        debug!(group = %self.key, "feed pump exited");
    }

    fn dispatch(&self, event: FeedEvent, registry: &Weak<Registry>) {
        let change = match normalize(event) {
            Some(change) => change,
            None => return,
        };
        let payload = match codec::encode_event(&change) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(group = %self.key, error = %e, "failed to encode change event");
                return;
            }
        };
        self.deliver(|| SubscriberMessage::Change(Arc::clone(&payload)), registry);
    }

    fn broadcast_error(&self, error: FeedError, registry: &Weak<Registry>) {
        warn!(group = %self.key, error = %error, "change feed error");
        self.deliver(|| SubscriberMessage::Error(error.clone()), registry);
    }

    /// Offer one message to every subscriber, dropping those whose mailbox
    /// is full.
    fn deliver(&self, message: impl Fn() -> SubscriberMessage, registry: &Weak<Registry>) {
        // deliver outside the lock; a subscriber removed meanwhile may get one more
        let targets: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .map(|(key, sender)| (*key, sender.clone()))
            .collect();

        let mut overflowed = Vec::new();
        for (key, sender) in targets {
            if !has_room(&sender) {
                overflowed.push(key);
                continue;
            }
            match sender.try_send(message()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => overflowed.push(key),
                // receiver gone; unsubscribe/disconnect will clean up
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        if !overflowed.is_empty() {
            self.drop_slow(&overflowed, registry);
        }
    }

    fn drop_slow(&self, keys: &[SubscriberKey], registry: &Weak<Registry>) {
        let registry = match registry.upgrade() {
            Some(registry) => registry,
            None => return,
        };
        let (dropped, emptied) = {
            let mut groups = registry.groups.lock();
            let mut subscribers = self.subscribers.lock();
            let mut dropped = Vec::new();
            for key in keys {
                if let Some(sender) = subscribers.remove(key) {
                    debug!(
                        group = %self.key,
                        connection = %key.connection,
                        subscription = %key.id,
                        reason = ?DropReason::BufferOverflow,
                        "dropping slow subscriber"
                    );
                    dropped.push(sender);
                }
            }
            let emptied = subscribers.is_empty();
            drop(subscribers);
            if emptied {
                Registry::detach(&mut groups, self);
            }
            (dropped, emptied)
        };
        // the reserved slot holds the final message
        for sender in dropped {
            let _ = sender.try_send(SubscriberMessage::Closed(DropReason::BufferOverflow));
        }
        if emptied {
            self.stop();
        }
    }

    fn feed_closed(&self, registry: &Weak<Registry>) {
        if self.is_stopped() {
            return;
        }
        if let Some(registry) = registry.upgrade() {
            Registry::detach(&mut registry.groups.lock(), self);
        }
        let closed = self.close_all(DropReason::FeedClosed);
        info!(group = %self.key, subscribers = closed, "change feed closed");
        self.stop();
    }
}

/// Mailboxes are one slot larger than the configured buffer; data never
/// takes the last slot, so a final `Closed` always fits.
fn has_room(sender: &Sender<SubscriberMessage>) -> bool {
    sender
        .capacity()
        .map_or(true, |capacity| sender.len() + 1 < capacity)
}

impl std::fmt::Debug for ListenerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGroup")
            .field("key", &self.key)
            .field("subscribers", &self.subscriber_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Turn a raw feed event into what subscribers see, or `None` for noise.
pub(crate) fn normalize(event: FeedEvent) -> Option<ChangeEvent> {
    let mut description = event.update_description;
    if let Some(description) = description.as_mut() {
        description.updated_fields.retain(|path, _| !is_shadow_path(path));
        description.removed_fields.retain(|path| !is_shadow_path(path));
        if description.is_version_only() {
            debug!(id = %event.document_key, "skipping version-only update");
            return None;
        }
    }

    let compound = match event.full_document {
        Some(document) => strip_internal_fields(document),
        None => {
            let mut key_only = Document::new();
            key_only.insert(ID_FIELD.to_string(), Value::ObjectId(event.document_key));
            key_only
        }
    };
    Some(ChangeEvent {
        change_type: event.operation.into(),
        compound,
        update_description: description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ChangeType;
    use crate::store::{FeedOperation, UpdateDescription};
    use crate::value::{document_from_json, ObjectId, OLD_FIELD, VERSION_FIELD};
    use serde_json::json;

    fn update(fields: serde_json::Value) -> FeedEvent {
        let id = ObjectId::generate();
        FeedEvent {
            operation: FeedOperation::Update,
            document_key: id,
            full_document: Some(document_from_json(json!({ "n": 1, "__old": { "n": 0 } }))),
            update_description: Some(UpdateDescription {
                updated_fields: document_from_json(fields),
                removed_fields: Vec::new(),
            }),
        }
    }

    #[test]
    fn test_version_only_update_is_noise() {
        assert!(normalize(update(json!({ "__version": 2 }))).is_none());
        assert!(normalize(update(json!({ "__version": 2, "__old": { "n": 0 } }))).is_none());

        let mut removed = update(json!({ "__version": 2 }));
        if let Some(desc) = removed.update_description.as_mut() {
            desc.removed_fields.push("tag".into());
        }
        assert!(normalize(removed).is_some());
    }

    #[test]
    fn test_shadow_copy_is_stripped() {
        let fields = json!({ "n": 1, "__old": { "n": 0 }, "__old.n": 0, "__version": 1 });
        let change = normalize(update(fields)).unwrap();
        assert_eq!(change.change_type, ChangeType::Update);
        assert!(!change.compound.contains_key(OLD_FIELD));
        let desc = change.update_description.unwrap();
        assert_eq!(
            desc.updated_fields.keys().collect::<Vec<_>>(),
            vec![VERSION_FIELD, "n"]
        );
    }

    #[test]
    fn test_delete_carries_only_id() {
        let id = ObjectId::generate();
        let change = normalize(FeedEvent {
            operation: FeedOperation::Delete,
            document_key: id,
            full_document: None,
            update_description: None,
        })
        .unwrap();
        assert_eq!(change.change_type, ChangeType::Delete);
        assert_eq!(change.compound.len(), 1);
        assert_eq!(change.compound.get(ID_FIELD), Some(&Value::ObjectId(id)));
    }

    #[test]
    fn test_insert_maps_to_create() {
        let change = normalize(FeedEvent {
            operation: FeedOperation::Insert,
            document_key: ObjectId::generate(),
            full_document: Some(document_from_json(json!({ "title": "t" }))),
            update_description: None,
        })
        .unwrap();
        assert_eq!(change.change_type, ChangeType::Create);
    }
}
