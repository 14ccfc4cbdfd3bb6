//! Parsed rules, the per-beaker rule set and the parsed-rule cache.
//!
//! A rule that fails to evaluate denies; [`Rule::allows`] logs the failure
//! and collapses it to `false`.

use super::ast::Expr;
use super::context::EvalContext;
use super::evaluator::Evaluator;
use super::parser::parse;
use super::symbolic::TriState;
use crate::config::RuleSources;
use crate::error::{LabError, Result, RuleError, RuleResult};
use crate::query::ConditionMap;
use crate::types::{BeakerId, Operation};
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

/// An immutable parsed rule. Cloning shares the tree.
#[derive(Clone)]
pub struct Rule {
    source: Arc<str>,
    ast: Arc<Expr>,
}

/// How a rule is checked.
#[derive(Debug, Clone, Copy)]
pub enum EvaluationMode<'a> {
    /// Against the record(s) bound in the context.
    Concrete,
    /// Against the declared shape of a query; no record exists yet.
    Query(&'a ConditionMap),
}

impl Rule {
    pub fn parse(source: &str) -> RuleResult<Self> {
        let ast = parse(source)?;
        Ok(Self {
            source: Arc::from(source),
            ast: Arc::new(ast),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Concrete evaluation.
    pub fn evaluate(&self, context: &EvalContext) -> RuleResult<bool> {
        let outcome = Evaluator::concrete(context).run(&self.ast)?;
        Ok(outcome.passes())
    }

    /// Query-symbolic evaluation, before the possible-means-pass collapse.
    pub fn evaluate_query(
        &self,
        context: &EvalContext,
        conditions: &ConditionMap,
    ) -> RuleResult<TriState> {
        Ok(Evaluator::symbolic(context, conditions).run(&self.ast)?)
    }

    /// Evaluate and collapse errors to a deny.
    pub fn allows(&self, mode: EvaluationMode<'_>, context: &EvalContext) -> bool {
        match evaluate_rule(self, mode, context) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(rule = %self.source, error = %e, "rule evaluation failed, denying");
                false
            }
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rule").field(&self.source).finish()
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Evaluate `rule` in `mode`. A `Possible` outcome counts as a pass.
pub fn evaluate_rule(
    rule: &Rule,
    mode: EvaluationMode<'_>,
    context: &EvalContext,
) -> RuleResult<bool> {
    match mode {
        EvaluationMode::Concrete => rule.evaluate(context),
        EvaluationMode::Query(conditions) => {
            let outcome = rule.evaluate_query(context, conditions)?;
            if outcome == TriState::Possible {
                debug!(rule = %rule.source, "query admitted on a possible outcome");
            }
            Ok(outcome.passes())
        }
    }
}

/// Parsed rules keyed by source text.
pub struct RuleCache {
    rules: Mutex<LruCache<String, Rule>>,
}

impl RuleCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            rules: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached rule for `source`, parsing it on a miss.
    pub fn get_or_parse(&self, source: &str) -> RuleResult<Rule> {
        if let Some(rule) = self.rules.lock().get(source) {
            return Ok(rule.clone());
        }
        let rule = Rule::parse(source)?;
        self.rules.lock().put(source.to_string(), rule.clone());
        Ok(rule)
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCache").field("len", &self.len()).finish()
    }
}

/// The five rules of one beaker.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub create: Rule,
    pub get: Rule,
    pub list: Rule,
    pub update: Rule,
    pub delete: Rule,
}

impl RuleSet {
    /// Parse every rule of a beaker. The first malformed rule rejects the set.
    pub fn compile(beaker: &BeakerId, sources: &RuleSources, cache: &RuleCache) -> Result<Self> {
        let parse = |operation: Operation| {
            cache
                .get_or_parse(sources.get(operation))
                .map_err(|source: RuleError| LabError::InvalidRule {
                    beaker: beaker.clone(),
                    operation,
                    source,
                })
        };
        Ok(Self {
            create: parse(Operation::Create)?,
            get: parse(Operation::Get)?,
            list: parse(Operation::List)?,
            update: parse(Operation::Update)?,
            delete: parse(Operation::Delete)?,
        })
    }

    pub fn get(&self, operation: Operation) -> &Rule {
        match operation {
            Operation::Create => &self.create,
            Operation::Get => &self.get,
            Operation::List => &self.list,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }
}
