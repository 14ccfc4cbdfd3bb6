//! Derives the change-feed filters and dedup key of a subscription.

use crate::query::ConditionMap;
use crate::store::FeedFilter;
use crate::types::BeakerId;
use std::fmt;

/// Identity of a listener group: the beaker plus the canonical JSON of the
/// condition map. Subscriptions with equal keys share one group.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    beaker: BeakerId,
    conditions: String,
}

impl GroupKey {
    pub fn new(beaker: &BeakerId, conditions: &ConditionMap) -> Self {
        Self {
            beaker: beaker.clone(),
            conditions: conditions.canonical_json(),
        }
    }

    pub fn beaker(&self) -> &BeakerId {
        &self.beaker
    }

    pub fn conditions(&self) -> &str {
        &self.conditions
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey({}{})", self.beaker, self.conditions)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.beaker, self.conditions)
    }
}

/// The key and feed filters for one condition map.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangePipeline {
    key: GroupKey,
    positive: FeedFilter,
    negative: Option<FeedFilter>,
}

impl ChangePipeline {
    /// The positive filter always exists. The negative one only when some
    /// path other than `_id` is constrained: an id cannot drift out of an
    /// id-only filter.
    pub fn build(beaker: &BeakerId, conditions: &ConditionMap) -> Self {
        let negative = (!conditions.is_empty() && !conditions.is_id_only())
            .then(|| FeedFilter::Departing(conditions.clone()));
        Self {
            key: GroupKey::new(beaker, conditions),
            positive: FeedFilter::Matching(conditions.clone()),
            negative,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn positive(&self) -> &FeedFilter {
        &self.positive
    }

    pub fn negative(&self) -> Option<&FeedFilter> {
        self.negative.as_ref()
    }

    /// Number of feed listeners this pipeline needs.
    pub fn listener_count(&self) -> usize {
        1 + usize::from(self.negative.is_some())
    }

    pub(crate) fn into_parts(self) -> (GroupKey, FeedFilter, Option<FeedFilter>) {
        (self.key, self.positive, self.negative)
    }
}
