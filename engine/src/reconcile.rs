//! Reconciliation of local state with a remote query result.
//!
//! The remote service is authoritative: a record it returns replaces the
//! local copy when the versions (`_kmd.lmt`) differ. Records with pending
//! operations are left alone until those operations are pushed, so local
//! writes are never clobbered by stale remote state.
//!
//! # Algorithm
//!
//! 1. Skip remote documents without an id
//! 2. Skip ids pinned by pending operations
//! 3. Upsert when the id is new locally or its version differs
//! 4. When the remote result covers the whole query (no skip/limit), local
//!    ids the remote no longer returns are removed

use crate::{record::document_id, record::document_lmt, Document, RecordId};
use std::collections::{BTreeMap, BTreeSet};

/// Changes needed to bring local state in line with a remote result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Documents to save, in remote order
    pub upserts: Vec<Document>,
    /// Ids already at the remote version
    pub unchanged: Vec<RecordId>,
    /// Local ids to remove
    pub removals: Vec<RecordId>,
    /// Ids left alone because of pending operations
    pub skipped_pending: Vec<RecordId>,
}

impl ReconcilePlan {
    /// Number of records the plan changes.
    pub fn changed(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed() == 0
    }
}

/// Plan the reconciliation of a remote result.
///
/// `local` maps the ids of local records matching the query to their
/// versions; `pinned` holds ids with pending operations.
pub fn plan(
    local: &BTreeMap<RecordId, String>,
    remote: Vec<Document>,
    pinned: &BTreeSet<RecordId>,
    remote_is_complete: bool,
) -> ReconcilePlan {
    let mut result = ReconcilePlan::default();
    let mut seen = BTreeSet::new();

    for document in remote {
        let Some(id) = document_id(&document).map(str::to_string) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        if pinned.contains(&id) {
            result.skipped_pending.push(id);
            continue;
        }
        let remote_version = document_lmt(&document);
        match local.get(&id) {
            Some(version) if remote_version == Some(version.as_str()) => {
                result.unchanged.push(id);
            }
            _ => result.upserts.push(document),
        }
    }

    if remote_is_complete {
        for id in local.keys() {
            if seen.contains(id) {
                continue;
            }
            if pinned.contains(id) {
                result.skipped_pending.push(id.clone());
            } else {
                result.removals.push(id.clone());
            }
        }
    }

    result
}
