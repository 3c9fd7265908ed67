//! Durable queue of outbound mutations.

use crate::{error::Result, local::LocalStore};
use harbor_engine::{document_id, Document, PendingOperation, Query, RecordId};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

/// Local effect of a mutation the remote service confirmed.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Store the authoritative document
    Upsert(Document),
    /// Drop one record
    RemoveId(RecordId),
    /// Drop the records a query selects
    RemoveQuery(Query),
}

/// Where a queued operation stands relative to the rest of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No longer queued; someone else sent or dropped it
    Settled,
    /// An older operation touches the same records
    Blocked,
    /// Next in line for its records
    Ready,
}

fn overlaps(queued: &PendingOperation, object_id: Option<&str>) -> bool {
    match (queued.object_id.as_deref(), object_id) {
        (Some(queued), Some(id)) => queued == id,
        _ => true,
    }
}

/// View of the pending-operation log of a [`LocalStore`].
///
/// Operations are kept in enqueue order; the order of
/// [`PendingQueue::dequeue_in_order`] is the replay order.
#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<LocalStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Append an operation, or replace the queued one with the same request
    /// id. Returns its sequence number.
    pub fn enqueue(&self, operation: PendingOperation) -> Result<u64> {
        let request_id = operation.request_id.clone();
        let collection = operation.collection_name.clone();
        let sequence = self.store.write(move |store| Ok(store.enqueue(operation)))?;
        debug!(%request_id, %collection, sequence, "Queued pending operation");
        Ok(sequence)
    }

    /// Queued operations in replay order, optionally for one collection.
    pub fn dequeue_in_order(&self, collection: Option<&str>) -> Result<Vec<PendingOperation>> {
        let collection = collection.map(str::to_string);
        self.store
            .read(move |store| Ok(store.pending(collection.as_deref())))
    }

    /// Remove one operation; returns whether it was queued.
    pub fn remove(&self, request_id: &str) -> Result<bool> {
        let request_id = request_id.to_string();
        self.store
            .write(move |store| Ok(store.remove_pending(&request_id)))
    }

    pub fn remove_all(&self, collection: Option<&str>) -> Result<usize> {
        let collection = collection.map(str::to_string);
        self.store
            .write(move |store| Ok(store.clear_pending(collection.as_deref())))
    }

    pub fn count(&self, collection: Option<&str>) -> Result<usize> {
        let collection = collection.map(str::to_string);
        self.store
            .read(move |store| Ok(store.pending_count(collection.as_deref())))
    }

    /// Whether any queued operation targets the record.
    pub fn has_pending_for(&self, collection: &str, object_id: &str) -> Result<bool> {
        let collection = collection.to_string();
        let object_id = object_id.to_string();
        self.store
            .read(move |store| Ok(store.has_pending_for(&collection, &object_id)))
    }

    /// Whether a queued operation of `collection` touches `object_id`.
    /// Without an id every queued operation counts, and so does any queued
    /// operation without one.
    pub fn is_blocked(&self, collection: &str, object_id: Option<&str>) -> Result<bool> {
        let collection = collection.to_string();
        let object_id = object_id.map(str::to_string);
        self.store.read(move |store| {
            Ok(store
                .pending(Some(&collection))
                .iter()
                .any(|queued| overlaps(queued, object_id.as_deref())))
        })
    }

    /// Locate a queued operation among the older ones of its collection.
    pub fn state_of(&self, collection: &str, request_id: &str) -> Result<QueueState> {
        let collection = collection.to_string();
        let request_id = request_id.to_string();
        self.store.read(move |store| {
            let queued = store.pending(Some(&collection));
            let Some(position) = queued.iter().position(|op| op.request_id == request_id) else {
                return Ok(QueueState::Settled);
            };
            let target = queued[position].object_id.as_deref();
            let blocked = queued[..position]
                .iter()
                .any(|older| overlaps(older, target));
            Ok(if blocked {
                QueueState::Blocked
            } else {
                QueueState::Ready
            })
        })
    }

    /// Record a confirmed mutation.
    ///
    /// Removes the confirmed operation, if any, then applies `settlement`
    /// to records no other queued operation targets, all in one store job.
    /// A settlement the store rejects is logged and skipped; the operation
    /// is still removed.
    pub fn confirm(
        &self,
        collection: &str,
        request_id: Option<&str>,
        settlement: Option<Settlement>,
    ) -> Result<()> {
        let collection = collection.to_string();
        let request_id = request_id.map(str::to_string);
        let rejected = self.store.write(move |store| {
            if let Some(request_id) = &request_id {
                store.remove_pending(request_id);
            }
            let pinned = store.pending_object_ids(&collection);
            let applied = match settlement {
                None => Ok(()),
                Some(Settlement::Upsert(document)) => {
                    let skip = document_id(&document).map_or(true, |id| pinned.contains(id));
                    if skip {
                        Ok(())
                    } else {
                        store.save(&collection, document).map(drop)
                    }
                }
                Some(Settlement::RemoveId(id)) if pinned.contains(&id) => Ok(()),
                Some(Settlement::RemoveId(id)) => store.remove_by_id(&collection, &id).map(drop),
                Some(Settlement::RemoveQuery(query)) => {
                    store.matching_ids(&collection, &query).and_then(|ids| {
                        let ids: Vec<RecordId> =
                            ids.into_iter().filter(|id| !pinned.contains(id)).collect();
                        store.remove_many(&collection, &ids).map(drop)
                    })
                }
            };
            Ok(applied.err())
        })?;
        if let Some(error) = rejected {
            warn!(error = %error, "Confirmed change could not be applied to the local cache");
        }
        Ok(())
    }

    /// Collections with at least one queued operation.
    pub fn collections(&self) -> Result<BTreeSet<String>> {
        self.store.read(|store| {
            Ok(store
                .pending(None)
                .into_iter()
                .map(|op| op.collection_name)
                .collect())
        })
    }
}
