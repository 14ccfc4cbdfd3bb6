//! Subscription registry and dispatcher.

use super::group::{ListenerGroup, SubscriberKey};
use super::pipeline::{ChangePipeline, GroupKey};
use super::session::Session;
use super::types::{DropReason, SubscriberMessage, SubscriptionHandle};
use crate::config::DispatcherConfig;
use crate::error::{LabError, Result};
use crate::query::ConditionMap;
use crate::store::ChangeFeed;
use crate::types::{BeakerId, SubscriptionId};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Open listener groups by key.
pub(crate) struct Registry {
    pub(crate) groups: Mutex<HashMap<GroupKey, Arc<ListenerGroup>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Remove `group` from the map unless a newer group took its key.
    pub(crate) fn detach(groups: &mut HashMap<GroupKey, Arc<ListenerGroup>>, group: &ListenerGroup) {
        let same = groups
            .get(group.key())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), group));
        if same {
            groups.remove(group.key());
        }
    }
}

/// Shares change-feed listeners among identical subscriptions and fans
/// events out to them.
pub struct ChangeDispatcher {
    registry: Arc<Registry>,
    feed: Arc<dyn ChangeFeed>,
    config: DispatcherConfig,
}

impl ChangeDispatcher {
    pub fn new(feed: Arc<dyn ChangeFeed>, config: DispatcherConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            feed,
            config,
        }
    }

    /// Attach the session to the listener group of `(beaker, conditions)`,
    /// opening it on first use.
    pub fn subscribe(
        &self,
        session: &mut Session,
        beaker: &BeakerId,
        conditions: &ConditionMap,
    ) -> Result<SubscriptionHandle> {
        let pipeline = ChangePipeline::build(beaker, conditions);
        // one extra slot for the final `Closed`
        let (sender, receiver) = bounded(self.config.subscriber_buffer.max(1).saturating_add(1));

        let (id, group) = {
            let mut groups = self.registry.groups.lock();
            let group = match groups.get(pipeline.key()) {
                Some(group) => Arc::clone(group),
                None => {
                    let group = ListenerGroup::open(
                        pipeline,
                        self.feed.as_ref(),
                        Arc::downgrade(&self.registry),
                    )?;
                    groups.insert(group.key().clone(), Arc::clone(&group));
                    group
                }
            };
            let id = session.next_subscription_id();
            group.add(
                SubscriberKey {
                    connection: session.connection(),
                    id,
                },
                sender,
            );
            (id, group)
        };

        debug!(
            connection = %session.connection(),
            subscription = %id,
            group = %group.key(),
            "subscribed"
        );
        session.insert(id, group);
        Ok(SubscriptionHandle { id, receiver })
    }

    /// Detach one subscription. Its mailbox gets a final
    /// `Closed(Unsubscribed)` when there is room for it.
    pub fn unsubscribe(&self, session: &mut Session, id: SubscriptionId) -> Result<()> {
        let group = session
            .remove(id)
            .ok_or(LabError::SubscriptionNotFound(id))?;
        let key = SubscriberKey {
            connection: session.connection(),
            id,
        };
        self.detach(&group, &key, DropReason::Unsubscribed);
        debug!(connection = %key.connection, subscription = %id, "unsubscribed");
        Ok(())
    }

    /// Detach every subscription of a closing connection. Returns how many
    /// there were.
    pub fn on_disconnect(&self, session: &mut Session) -> usize {
        let connection = session.connection();
        let subscriptions = session.drain();
        let count = subscriptions.len();
        for (id, group) in subscriptions {
            self.detach(&group, &SubscriberKey { connection, id }, DropReason::Disconnected);
        }
        if count > 0 {
            debug!(connection = %connection, subscriptions = count, "connection detached");
        }
        count
    }

    fn detach(&self, group: &Arc<ListenerGroup>, key: &SubscriberKey, reason: DropReason) {
        let (sender, emptied) = {
            let mut groups = self.registry.groups.lock();
            let (sender, emptied) = group.remove(key);
            if emptied {
                Registry::detach(&mut groups, group);
            }
            (sender, emptied)
        };
        if emptied {
            group.stop();
        }
        if let Some(sender) = sender {
            let _ = sender.try_send(SubscriberMessage::Closed(reason));
        }
    }

    /// Number of open listener groups.
    pub fn group_count(&self) -> usize {
        self.registry.groups.lock().len()
    }

    /// Subscribers attached to the group of `(beaker, conditions)`.
    pub fn subscriber_count(&self, beaker: &BeakerId, conditions: &ConditionMap) -> usize {
        self.registry
            .groups
            .lock()
            .get(&GroupKey::new(beaker, conditions))
            .map_or(0, |group| group.subscriber_count())
    }

    /// Stop every listener group. Each subscriber gets
    /// `Closed(Shutdown)` and then sees its mailbox disconnect.
    pub fn shutdown(&self) {
        let groups: Vec<_> = self.registry.groups.lock().drain().map(|(_, g)| g).collect();
        for group in groups {
            group.stop();
            let closed = group.close_all(DropReason::Shutdown);
            debug!(group = %group.key(), subscribers = closed, "listener group shut down");
        }
    }
}

impl Drop for ChangeDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("groups", &self.group_count())
            .field("config", &self.config)
            .finish()
    }
}
