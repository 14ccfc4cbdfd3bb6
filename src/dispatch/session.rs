//! Per-connection state.

use super::group::ListenerGroup;
use crate::types::{ConnectionId, SubscriptionId};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// State owned by one client connection: who is calling and which
/// subscriptions it holds.
///
/// Only the task serving the connection touches it, so dispatcher
/// operations take it by `&mut` and it needs no locking.
pub struct Session {
    connection: ConnectionId,
    user: Value,
    next_id: u64,
    subscriptions: HashMap<SubscriptionId, Arc<ListenerGroup>>,
}

impl Session {
    pub fn new(connection: ConnectionId, user: Value) -> Self {
        Self {
            connection,
            user,
            next_id: 1,
            subscriptions: HashMap::new(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// The authenticated user, `Null` when anonymous.
    pub fn user(&self) -> &Value {
        &self.user
    }

    pub fn set_user(&mut self, user: Value) {
        self.user = user;
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn has_subscription(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub(crate) fn next_subscription_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: SubscriptionId, group: Arc<ListenerGroup>) {
        self.subscriptions.insert(id, group);
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<Arc<ListenerGroup>> {
        self.subscriptions.remove(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<(SubscriptionId, Arc<ListenerGroup>)> {
        self.subscriptions.drain().collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.subscriptions.keys().copied().collect();
        ids.sort();
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("user", &self.user)
            .field("subscriptions", &ids)
            .finish()
    }
}
