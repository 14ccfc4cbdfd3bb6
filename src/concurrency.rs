//! Optimistic concurrency for record writes.
//!
//! Every update is a compare-and-swap on `(_id, __version)`: it copies the
//! pre-update record into `__old` and bumps `__version` by one. A write that
//! matches nothing lost a race and surfaces as [`LabError::WriteConflict`];
//! it is never retried here.

use crate::error::{LabError, Result};
use crate::store::UpdateDescription;
use crate::types::BeakerId;
use crate::value::{
    get_path, reject_reserved, set_path, strip_internal_fields, Document, ObjectId, Value, ID_FIELD,
    OLD_FIELD, VERSION_FIELD,
};

/// Write predicate: the record id, plus its version. `None` requires the
/// record to still be unversioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedQuery {
    pub id: ObjectId,
    pub version: Option<i64>,
}

impl VersionedQuery {
    pub fn matches(&self, record: &Document) -> bool {
        if record.get(ID_FIELD) != Some(&Value::ObjectId(self.id)) {
            return false;
        }
        match self.version {
            Some(version) => record_version(record) == Some(version),
            None => !record.contains_key(VERSION_FIELD),
        }
    }
}

/// How an update moves `__version`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionBump {
    /// `__version += 1`
    Increment,
    /// First versioned write: `__version = 0`.
    Initialize,
}

/// The write half of an update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateDocument {
    /// Dotted paths to set.
    pub set: Document,
    /// Shadow copy stored into `__old`.
    pub old: Document,
    pub version: VersionBump,
}

impl UpdateDocument {
    /// Apply to a stored record in place. On error the record is untouched.
    pub fn apply(&self, record: &mut Document) -> Result<UpdateDescription> {
        let mut next = record.clone();
        for (path, value) in &self.set {
            set_path(&mut next, path, value.clone())?;
        }
        next.insert(OLD_FIELD.to_string(), Value::Document(self.old.clone()));
        let version = match self.version {
            VersionBump::Increment => record_version(record)
                .unwrap_or(-1)
                .checked_add(1)
                .ok_or_else(|| {
                    LabError::InvalidField(format!("{VERSION_FIELD} cannot be incremented further"))
                })?,
            VersionBump::Initialize => 0,
        };
        next.insert(VERSION_FIELD.to_string(), Value::Int64(version));

        let mut description = UpdateDescription::default();
        let touched = self
            .set
            .keys()
            .map(String::as_str)
            .chain([OLD_FIELD, VERSION_FIELD]);
        for path in touched {
            let after = get_path(&next, path);
            if get_path(record, path) != after {
                description.updated_fields.insert(path.to_string(), after);
            }
        }

        *record = next;
        Ok(description)
    }
}

/// Predicate and write document for one update.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedUpdate {
    pub query: VersionedQuery,
    pub update: UpdateDocument,
}

fn record_version(record: &Document) -> Option<i64> {
    record.get(VERSION_FIELD).and_then(Value::as_i64)
}

fn record_id(record: &Document) -> Result<ObjectId> {
    match record.get(ID_FIELD) {
        Some(Value::ObjectId(id)) => Ok(*id),
        _ => Err(LabError::InvalidField(format!("{ID_FIELD} must be an object id"))),
    }
}

/// Build the compare-and-swap update of `record` (as read) with `new_fields`.
pub fn prepare_update(record: &Document, new_fields: Document) -> Result<PreparedUpdate> {
    reject_reserved(new_fields.keys(), false)?;
    let id = record_id(record)?;
    let version = record_version(record);
    Ok(PreparedUpdate {
        query: VersionedQuery { id, version },
        update: UpdateDocument {
            set: new_fields,
            old: strip_internal_fields(record.clone()),
            version: match version {
                Some(_) => VersionBump::Increment,
                None => VersionBump::Initialize,
            },
        },
    })
}

/// Build the compare-and-swap delete predicate of `record` (as read).
pub fn prepare_delete(record: &Document) -> Result<VersionedQuery> {
    Ok(VersionedQuery {
        id: record_id(record)?,
        version: record_version(record),
    })
}

/// Map a write's affected count to an outcome: zero means another writer won.
pub fn check_written(beaker: &BeakerId, id: ObjectId, affected: u64) -> Result<()> {
    if affected == 0 {
        return Err(LabError::WriteConflict {
            beaker: beaker.clone(),
            id,
        });
    }
    Ok(())
}
