//! Query condition maps.
//!
//! A condition map is the flat `dotted.path -> literal | {$op: value}`
//! document a client sends with `find` and `subscribe`. It is matched against
//! records by the store, inspected by the rule engine during query-symbolic
//! evaluation, and turned into change-feed filters by the pipeline builder.

mod conditions;

pub use conditions::{Bound, Bounds, Condition, ConditionMap, QueryOperator};
