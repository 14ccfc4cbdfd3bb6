//! Realtime change dispatch.
//!
//! Subscriptions with the same beaker and condition map share one listener
//! group: a positive feed listener, a negative one when the conditions can be
//! left, and a pump thread that normalizes each event, encodes it once and
//! hands the same bytes to every subscriber mailbox.

mod group;
mod manager;
mod pipeline;
mod session;
mod types;

pub use manager::ChangeDispatcher;
pub use pipeline::{ChangePipeline, GroupKey};
pub use session::Session;
pub use types::{ChangeEvent, ChangeType, DropReason, SubscriberMessage, SubscriptionHandle};
