//! Lab configuration.

use crate::error::{LabError, Result};
use crate::types::{BeakerId, LabId, Operation};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rule source text for each operation on a beaker.
///
/// A missing rule denies everything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSources {
    pub create: String,
    pub get: String,
    /// Governs both `find` and `subscribe`.
    pub list: String,
    pub update: String,
    pub delete: String,
}

impl Default for RuleSources {
    fn default() -> Self {
        Self {
            create: "false".to_string(),
            get: "false".to_string(),
            list: "false".to_string(),
            update: "false".to_string(),
            delete: "false".to_string(),
        }
    }
}

impl RuleSources {
    /// The same rule for every operation.
    pub fn all(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            create: source.clone(),
            get: source.clone(),
            list: source.clone(),
            update: source.clone(),
            delete: source,
        }
    }

    pub fn get(&self, operation: Operation) -> &str {
        match operation {
            Operation::Create => &self.create,
            Operation::Get => &self.get,
            Operation::List => &self.list,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }
}

/// Configuration of one beaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeakerConfig {
    pub id: BeakerId,
    #[serde(default)]
    pub rules: RuleSources,
}

impl BeakerConfig {
    pub fn new(id: impl Into<BeakerId>, rules: RuleSources) -> Self {
        Self {
            id: id.into(),
            rules,
        }
    }
}

/// Change dispatcher tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Max buffered messages before a subscriber is dropped.
    /// Default: 1000
    pub subscriber_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1000,
        }
    }
}

/// Configuration of a lab and its beakers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub id: LabId,

    pub beakers: Vec<BeakerConfig>,

    pub dispatcher: DispatcherConfig,

    /// Number of parsed rules kept, keyed by source text.
    /// Default: 256
    pub rule_cache_size: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            id: LabId::from("default"),
            beakers: Vec::new(),
            dispatcher: DispatcherConfig::default(),
            rule_cache_size: 256,
        }
    }
}

impl LabConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LabError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
