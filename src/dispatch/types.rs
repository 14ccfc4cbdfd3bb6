//! Types delivered to subscribers.

use crate::codec;
use crate::error::{FeedError, Result};
use crate::store::{FeedOperation, UpdateDescription};
use crate::types::SubscriptionId;
use crate::value::Document;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Public change vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl From<FeedOperation> for ChangeType {
    fn from(op: FeedOperation) -> Self {
        match op {
            FeedOperation::Insert => ChangeType::Create,
            FeedOperation::Update | FeedOperation::Replace => ChangeType::Update,
            FeedOperation::Delete => ChangeType::Delete,
        }
    }
}

/// A normalized change event, as subscribers decode it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// The record after the change; only `_id` for deletes.
    pub compound: Document,
    #[serde(
        rename = "updateDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_description: Option<UpdateDescription>,
}

impl ChangeEvent {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode_event(bytes)
    }
}

/// Why a subscriber stopped receiving.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Mailbox overflowed (slow consumer).
    BufferOverflow,
    /// The underlying change feed ended.
    FeedClosed,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The owning connection went away.
    Disconnected,
    /// The dispatcher shut down.
    Shutdown,
}

/// What lands in a subscriber's mailbox.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriberMessage {
    /// An encoded [`ChangeEvent`], shared by every subscriber of the group.
    Change(Arc<[u8]>),
    /// A feed failure. The subscription stays open.
    Error(FeedError),
    /// Last message of a subscription.
    Closed(DropReason),
}

/// The receiving end of a subscription.
///
/// Every way a subscription ends delivers a final
/// [`SubscriberMessage::Closed`] before the channel disconnects, including a
/// drop for overflowing the mailbox.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive messages.
    pub receiver: crossbeam_channel::Receiver<SubscriberMessage>,
}

impl SubscriptionHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<SubscriberMessage, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(
        &self,
    ) -> std::result::Result<SubscriberMessage, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<SubscriberMessage, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}
