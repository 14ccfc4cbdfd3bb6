//! The lab: beakers, their rules, and the rule-gated operations on them.
//!
//! This is what a connection handler calls once it has decoded a request.
//! Every operation checks the beaker exists, evaluates the beaker's rule for
//! the operation, and only then touches the store. Records leave the lab
//! without their `__old` shadow copy.

use crate::concurrency::{check_written, prepare_delete, prepare_update};
use crate::config::{BeakerConfig, LabConfig};
use crate::dispatch::{ChangeDispatcher, Session, SubscriptionHandle};
use crate::error::{EvaluationError, LabError, Result};
use crate::query::ConditionMap;
use crate::rules::{EvalContext, EvaluationMode, RuleCache, RuleSet};
use crate::store::{ChangeFeed, DocumentStore, FindOptions};
use crate::types::{now_millis, BeakerId, ConnectionId, LabId, Operation, SubscriptionId};
use crate::value::{
    expand_dotted, is_shadow_path, reject_reserved, strip_internal_fields, validate_document,
    DateTime, Document, ObjectId, Value, ID_FIELD,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A tenant namespace of beakers sharing one store.
pub struct Lab {
    id: LabId,
    beakers: RwLock<HashMap<BeakerId, Arc<RuleSet>>>,
    rule_cache: RuleCache,
    store: Arc<dyn DocumentStore>,
    dispatcher: ChangeDispatcher,
    /// Functions every rule can call; variables are added per request.
    functions: EvalContext,
}

impl Lab {
    /// Create a lab over a store that is also its change feed.
    pub fn new<S>(config: LabConfig, store: Arc<S>) -> Result<Self>
    where
        S: DocumentStore + ChangeFeed + 'static,
    {
        let feed: Arc<dyn ChangeFeed> = store.clone();
        Self::with_parts(config, store, feed)
    }

    /// Create a lab over separate store and change-feed handles.
    pub fn with_parts(
        config: LabConfig,
        store: Arc<dyn DocumentStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<Self> {
        let lab = Self {
            id: config.id,
            beakers: RwLock::new(HashMap::new()),
            rule_cache: RuleCache::new(config.rule_cache_size),
            store,
            dispatcher: ChangeDispatcher::new(feed, config.dispatcher),
            functions: EvalContext::new(),
        };
        for beaker in &config.beakers {
            lab.configure_beaker(beaker)?;
        }
        info!(lab = %lab.id, beakers = config.beakers.len(), "lab opened");
        Ok(lab)
    }

    /// Make `name` callable from every rule of this lab.
    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &EvalContext) -> std::result::Result<Value, EvaluationError>
            + Send
            + Sync
            + 'static,
    {
        self.functions = std::mem::take(&mut self.functions).with_function(name, function);
    }

    pub fn id(&self) -> &LabId {
        &self.id
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    // --- Beakers ---

    /// Parse the beaker's rules and install them, replacing any previous
    /// set. Nothing changes if a rule fails to parse.
    pub fn configure_beaker(&self, config: &BeakerConfig) -> Result<()> {
        let rules = RuleSet::compile(&config.id, &config.rules, &self.rule_cache)?;
        let replaced = self
            .beakers
            .write()
            .insert(config.id.clone(), Arc::new(rules))
            .is_some();
        info!(lab = %self.id, beaker = %config.id, replaced, "beaker configured");
        Ok(())
    }

    /// Forget a beaker's rules. Its records stay in the store.
    pub fn remove_beaker(&self, beaker: &BeakerId) -> bool {
        let removed = self.beakers.write().remove(beaker).is_some();
        if removed {
            info!(lab = %self.id, beaker = %beaker, "beaker removed");
        }
        removed
    }

    pub fn beaker_ids(&self) -> Vec<BeakerId> {
        let mut ids: Vec<_> = self.beakers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn rules(&self, beaker: &BeakerId) -> Result<Arc<RuleSet>> {
        self.beakers
            .read()
            .get(beaker)
            .cloned()
            .ok_or_else(|| LabError::UnknownBeaker(beaker.clone()))
    }

    // --- Sessions ---

    pub fn open_session(&self, connection: ConnectionId, user: Value) -> Session {
        debug!(lab = %self.id, connection = %connection, "session opened");
        Session::new(connection, user)
    }

    /// Tear down a connection's subscriptions. Returns how many there were.
    pub fn disconnect(&self, session: &mut Session) -> usize {
        self.dispatcher.on_disconnect(session)
    }

    // --- Records ---

    pub fn create(&self, session: &Session, beaker: &BeakerId, compound: Document) -> Result<Document> {
        let rules = self.rules(beaker)?;
        validate_document(&compound)?;
        reject_reserved(compound.keys(), true)?;

        let context = self.context(session, None, Some(&compound));
        self.authorize(&rules, Operation::Create, beaker, session, EvaluationMode::Concrete, &context)?;

        let stored = self.store.insert_one(beaker, compound)?;
        Ok(strip_internal_fields(stored))
    }

    pub fn get(&self, session: &Session, beaker: &BeakerId, id: ObjectId) -> Result<Document> {
        let rules = self.rules(beaker)?;
        let stored = self.fetch(beaker, id)?;

        let context = self.context(session, Some(&stored), Some(&stored));
        self.authorize(&rules, Operation::Get, beaker, session, EvaluationMode::Concrete, &context)?;

        Ok(strip_internal_fields(stored))
    }

    /// Records matching `conditions`, admitted by checking the `list` rule
    /// against the query's shape. Sort and projection paths may not reach
    /// into the shadow copy.
    pub fn find(
        &self,
        session: &Session,
        beaker: &BeakerId,
        conditions: &ConditionMap,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let rules = self.rules(beaker)?;
        let paths = options
            .sort
            .iter()
            .map(|(path, _)| path)
            .chain(options.projection.iter().flat_map(|p| p.paths()));
        for path in paths {
            if is_shadow_path(path) {
                return Err(LabError::InvalidField(format!(
                    "{path} cannot be sorted on or projected"
                )));
            }
        }
        let context = self.context(session, None, None);
        self.authorize(
            &rules,
            Operation::List,
            beaker,
            session,
            EvaluationMode::Query(conditions),
            &context,
        )?;

        Ok(self
            .store
            .find(beaker, conditions, options)?
            .into_iter()
            .map(strip_internal_fields)
            .collect())
    }

    /// Apply a dotted-path set map to one record. A concurrent writer
    /// winning the version race yields [`LabError::WriteConflict`].
    pub fn update(
        &self,
        session: &Session,
        beaker: &BeakerId,
        id: ObjectId,
        set: Document,
    ) -> Result<Document> {
        let rules = self.rules(beaker)?;
        let stored = self.fetch(beaker, id)?;
        let candidate = expand_dotted(&stored, &set)?;
        validate_document(&candidate)?;
        let prepared = prepare_update(&stored, set)?;

        let context = self.context(session, Some(&stored), Some(&candidate));
        self.authorize(&rules, Operation::Update, beaker, session, EvaluationMode::Concrete, &context)?;

        let written = self.store.update_one(beaker, &prepared.query, &prepared.update)?;
        check_written(beaker, id, written)?;

        let mut updated = stored;
        prepared.update.apply(&mut updated)?;
        Ok(strip_internal_fields(updated))
    }

    pub fn delete(&self, session: &Session, beaker: &BeakerId, id: ObjectId) -> Result<()> {
        let rules = self.rules(beaker)?;
        let stored = self.fetch(beaker, id)?;

        let context = self.context(session, Some(&stored), None);
        self.authorize(&rules, Operation::Delete, beaker, session, EvaluationMode::Concrete, &context)?;

        let query = prepare_delete(&stored)?;
        let deleted = self.store.delete_one(beaker, &query)?;
        check_written(beaker, id, deleted)
    }

    // --- Subscriptions ---

    /// Open a live subscription, admitted by the `list` rule like `find`.
    pub fn subscribe(
        &self,
        session: &mut Session,
        beaker: &BeakerId,
        conditions: &ConditionMap,
    ) -> Result<SubscriptionHandle> {
        let rules = self.rules(beaker)?;
        let context = self.context(session, None, None);
        self.authorize(
            &rules,
            Operation::List,
            beaker,
            session,
            EvaluationMode::Query(conditions),
            &context,
        )?;
        self.dispatcher.subscribe(session, beaker, conditions)
    }

    pub fn unsubscribe(&self, session: &mut Session, id: SubscriptionId) -> Result<()> {
        self.dispatcher.unsubscribe(session, id)
    }

    // --- Helpers ---

    fn fetch(&self, beaker: &BeakerId, id: ObjectId) -> Result<Document> {
        self.store.find_one(beaker, id)?.ok_or_else(|| LabError::NotFound {
            beaker: beaker.clone(),
            id,
        })
    }

    /// `compound` is the stored record; `request.compound` the record the
    /// caller wants to exist.
    fn context(
        &self,
        session: &Session,
        stored: Option<&Document>,
        requested: Option<&Document>,
    ) -> EvalContext {
        let mut request = Document::new();
        request.insert("user".to_string(), session.user().clone());
        request.insert(
            "connection".to_string(),
            Value::Int64(session.connection().0 as i64),
        );
        if let Some(requested) = requested {
            request.insert("compound".to_string(), Value::Document(requested.clone()));
        }

        let mut context = self
            .functions
            .clone()
            .with_clock(DateTime::from_millis(now_millis()))
            .with_variable("request", Value::Document(request));
        if let Some(stored) = stored {
            context = context.with_variable("compound", Value::Document(stored.clone()));
        }
        context
    }

    fn authorize(
        &self,
        rules: &RuleSet,
        operation: Operation,
        beaker: &BeakerId,
        session: &Session,
        mode: EvaluationMode<'_>,
        context: &EvalContext,
    ) -> Result<()> {
        if rules.get(operation).allows(mode, context) {
            return Ok(());
        }
        info!(
            lab = %self.id,
            beaker = %beaker,
            operation = %operation,
            connection = %session.connection(),
            "access denied"
        );
        Err(LabError::AccessDenied {
            operation,
            beaker: beaker.clone(),
        })
    }
}

impl std::fmt::Debug for Lab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lab")
            .field("id", &self.id)
            .field("beakers", &self.beaker_ids())
            .field("rule_cache", &self.rule_cache)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// The `_id` of a record returned by the lab.
pub fn compound_id(compound: &Document) -> Option<ObjectId> {
    match compound.get(ID_FIELD) {
        Some(Value::ObjectId(id)) => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleSources;
    use crate::store::{MemoryStore, Projection, SortOrder};
    use crate::value::{document_from_json, OLD_FIELD, VERSION_FIELD};
    use serde_json::json;

    fn lab_with(rules: RuleSources) -> Lab {
        let config = LabConfig {
            beakers: vec![BeakerConfig::new("posts", rules)],
            ..Default::default()
        };
        Lab::new(config, Arc::new(MemoryStore::new())).unwrap()
    }

    fn posts() -> BeakerId {
        BeakerId::from("posts")
    }

    fn alice(lab: &Lab) -> Session {
        lab.open_session(ConnectionId(1), Value::from_json(json!({ "name": "alice" })))
    }

    #[test]
    fn test_unknown_beaker() {
        let lab = lab_with(RuleSources::all("true"));
        let session = alice(&lab);
        let err = lab
            .create(&session, &BeakerId::from("nope"), Document::new())
            .unwrap_err();
        assert!(matches!(err, LabError::UnknownBeaker(_)));
    }

    #[test]
    fn test_create_rule_sees_request_compound() {
        let lab = lab_with(RuleSources {
            create: "request.compound.owner == request.user.name".into(),
            ..RuleSources::all("true")
        });
        let session = alice(&lab);
        assert!(lab
            .create(&session, &posts(), document_from_json(json!({ "owner": "alice" })))
            .is_ok());
        assert!(matches!(
            lab.create(&session, &posts(), document_from_json(json!({ "owner": "bob" }))),
            Err(LabError::AccessDenied { operation: Operation::Create, .. })
        ));
    }

    #[test]
    fn test_update_rule_sees_stored_and_candidate() {
        let lab = lab_with(RuleSources {
            update: "compound.locked != true && request.compound.title != ''".into(),
            ..RuleSources::all("true")
        });
        let session = alice(&lab);
        let created = lab
            .create(&session, &posts(), document_from_json(json!({ "title": "a" })))
            .unwrap();
        let id = compound_id(&created).unwrap();

        let updated = lab
            .update(&session, &posts(), id, document_from_json(json!({ "title": "b" })))
            .unwrap();
        assert_eq!(updated.get("title"), Some(&Value::String("b".into())));
        assert_eq!(updated.get(VERSION_FIELD), Some(&Value::Int64(0)));
        assert!(!updated.contains_key(OLD_FIELD));

        assert!(matches!(
            lab.update(&session, &posts(), id, document_from_json(json!({ "title": "" }))),
            Err(LabError::AccessDenied { .. })
        ));
        lab.update(&session, &posts(), id, document_from_json(json!({ "locked": true })))
            .unwrap();
        assert!(lab
            .update(&session, &posts(), id, document_from_json(json!({ "title": "c" })))
            .is_err());
    }

    #[test]
    fn test_get_projects_out_shadow_copy() {
        let lab = lab_with(RuleSources::all("true"));
        let session = alice(&lab);
        let created = lab
            .create(&session, &posts(), document_from_json(json!({ "n": 1 })))
            .unwrap();
        let id = compound_id(&created).unwrap();
        lab.update(&session, &posts(), id, document_from_json(json!({ "n": 2 })))
            .unwrap();

        let fetched = lab.get(&session, &posts(), id).unwrap();
        assert!(!fetched.contains_key(OLD_FIELD));
        assert_eq!(fetched.get("n"), Some(&Value::Int64(2)));

        lab.delete(&session, &posts(), id).unwrap();
        assert!(matches!(
            lab.get(&session, &posts(), id),
            Err(LabError::NotFound { .. })
        ));
    }

    #[test]
    fn test_find_sorts_projects_and_hides_shadow_copy() {
        let lab = lab_with(RuleSources::all("true"));
        let session = alice(&lab);
        for n in [2, 3, 1] {
            let created = lab
                .create(&session, &posts(), document_from_json(json!({ "n": n, "tag": "x" })))
                .unwrap();
            let id = compound_id(&created).unwrap();
            lab.update(&session, &posts(), id, document_from_json(json!({ "seen": true })))
                .unwrap();
        }

        let options = FindOptions {
            sort: vec![("n".to_string(), SortOrder::Ascending)],
            projection: Some(Projection::Exclude(vec!["tag".to_string()])),
            ..Default::default()
        };
        let found = lab.find(&session, &posts(), &ConditionMap::empty(), &options).unwrap();
        let ns: Vec<_> = found.iter().map(|r| r.get("n").cloned()).collect();
        assert_eq!(ns, vec![Some(Value::Int64(1)), Some(Value::Int64(2)), Some(Value::Int64(3))]);
        assert!(found.iter().all(|r| !r.contains_key(OLD_FIELD) && !r.contains_key("tag")));

        let include = FindOptions {
            projection: Some(Projection::Include(vec!["n".to_string()])),
            ..Default::default()
        };
        let found = lab.find(&session, &posts(), &ConditionMap::empty(), &include).unwrap();
        assert!(found.iter().all(|r| r.len() == 2 && r.contains_key(ID_FIELD)));

        for options in [
            FindOptions {
                sort: vec![("__old.n".to_string(), SortOrder::Descending)],
                ..Default::default()
            },
            FindOptions {
                projection: Some(Projection::Include(vec!["__old".to_string()])),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                lab.find(&session, &posts(), &ConditionMap::empty(), &options),
                Err(LabError::InvalidField(_))
            ));
        }
    }

    #[test]
    fn test_reserved_fields_rejected_on_write() {
        let lab = lab_with(RuleSources::all("true"));
        let session = alice(&lab);
        for payload in [json!({ "__version": 3 }), json!({ "__old": {} }), json!({ "$set": 1 })] {
            assert!(matches!(
                lab.create(&session, &posts(), document_from_json(payload)),
                Err(LabError::InvalidField(_))
            ));
        }
    }

    #[test]
    fn test_registered_function_is_callable() {
        let mut lab = lab_with(RuleSources {
            get: "isAdmin(request.user.name)".into(),
            ..RuleSources::all("true")
        });
        lab.register_function("isAdmin", |args, _| {
            Ok(Value::Bool(args.first().and_then(Value::as_str) == Some("alice")))
        });
        let session = alice(&lab);
        let created = lab.create(&session, &posts(), Document::new()).unwrap();
        let id = compound_id(&created).unwrap();
        assert!(lab.get(&session, &posts(), id).is_ok());

        let bob = lab.open_session(ConnectionId(2), Value::from_json(json!({ "name": "bob" })));
        assert!(lab.get(&bob, &posts(), id).is_err());
    }

    #[test]
    fn test_reconfigure_replaces_rules() {
        let lab = lab_with(RuleSources::default());
        let session = alice(&lab);
        assert!(lab.create(&session, &posts(), Document::new()).is_err());

        lab.configure_beaker(&BeakerConfig::new("posts", RuleSources::all("true")))
            .unwrap();
        assert!(lab.create(&session, &posts(), Document::new()).is_ok());

        let broken = BeakerConfig::new("posts", RuleSources::all("1 +"));
        assert!(matches!(
            lab.configure_beaker(&broken),
            Err(LabError::InvalidRule { .. })
        ));
        assert!(lab.create(&session, &posts(), Document::new()).is_ok());
        assert!(lab.remove_beaker(&posts()));
        assert!(lab.beaker_ids().is_empty());
    }
}
