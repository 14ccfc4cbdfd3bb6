//! # Chembase
//!
//! The core of a realtime, access-controlled document-sync backend: a rule
//! engine that gates every operation on a beaker (record collection), and a
//! change dispatcher that shares store change-feed listeners among identical
//! live subscriptions.
//!
//! ## Core Concepts
//!
//! - **Rules**: one expression per beaker and operation, evaluated either
//!   against a concrete record or symbolically against a query's conditions
//! - **Listener groups**: one positive (and optionally one negative) feed
//!   listener per `(beaker, conditions)`, fanned out to every subscriber
//! - **Versions**: every update is a compare-and-swap on `__version` and
//!   leaves the previous state in `__old`
//!
//! ## Example
//!
//! ```ignore
//! use chembase::{BeakerConfig, ConditionMap, ConnectionId, Lab, LabConfig, MemoryStore, RuleSources};
//!
//! let config = LabConfig {
//!     beakers: vec![BeakerConfig::new("posts", RuleSources {
//!         list: "compound.published == true".into(),
//!         ..RuleSources::all("request.user != null")
//!     })],
//!     ..Default::default()
//! };
//! let lab = Lab::new(config, Arc::new(MemoryStore::new()))?;
//! let mut session = lab.open_session(ConnectionId(1), user);
//!
//! // Admitted: every record the query can return is published.
//! let published = ConditionMap::from_json(json!({ "published": true }))?;
//! let handle = lab.subscribe(&mut session, &"posts".into(), &published)?;
//!
//! while let Ok(SubscriberMessage::Change(bytes)) = handle.recv() {
//!     let event = ChangeEvent::decode(&bytes)?;
//! }
//! ```

pub mod codec;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lab;
pub mod query;
pub mod rules;
pub mod store;
pub mod types;
pub mod value;

// Re-exports
pub use concurrency::{prepare_delete, prepare_update, PreparedUpdate, VersionedQuery};
pub use config::{BeakerConfig, DispatcherConfig, LabConfig, RuleSources};
pub use dispatch::{
    ChangeDispatcher, ChangeEvent, ChangePipeline, ChangeType, DropReason, GroupKey, Session,
    SubscriberMessage, SubscriptionHandle,
};
pub use error::{EvaluationError, FeedError, LabError, Result, RuleError};
pub use lab::{compound_id, Lab};
pub use query::ConditionMap;
pub use rules::{evaluate_rule, EvalContext, EvaluationMode, Rule, RuleCache, RuleSet, TriState};
pub use store::{ChangeFeed, DocumentStore, FindOptions, MemoryStore, Projection, SortOrder};
pub use types::*;
pub use value::{Document, ObjectId, Value};
