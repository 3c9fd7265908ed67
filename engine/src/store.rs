//! Store - the in-memory state container.
//!
//! The Store holds every collection's documents in storage form together
//! with the log of pending operations. It performs no IO and never reads a
//! clock: callers pass the current time where TTL filtering needs it.
//!
//! Documents passed in and returned are in logical form (storage keys,
//! plain scalar lists). Every returned document is an owned copy.

use crate::{
    error::Result,
    eval,
    record::{document_id, document_lmt, parse_timestamp},
    snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION},
    translate::Translator,
    CollectionName, Document, EntitySchema, Error, PendingOperation, Query, RecordId, Schema,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Documents of one collection, in storage form, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    records: BTreeMap<RecordId, Document>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored document by id.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, id: RecordId, document: Document) {
        self.records.insert(id, document);
    }
}

/// The local store.
#[derive(Debug, Clone)]
pub struct Store {
    schema: Schema,
    collections: HashMap<CollectionName, Collection>,
    /// Ordered by sequence
    pending: Vec<PendingOperation>,
    next_sequence: u64,
}

impl Store {
    /// Create an empty store with one collection per schema entry.
    pub fn new(schema: Schema) -> Self {
        let collections = schema
            .collections
            .keys()
            .map(|name| (name.clone(), Collection::new()))
            .collect();
        Self {
            schema,
            collections,
            pending: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Restore a store from a snapshot, using the snapshot's schema.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut store = Self::new(snapshot.schema.clone());
        store.import_state(snapshot)?;
        Ok(store)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Stored documents of a collection.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    fn entity_schema(&self, collection: &str) -> Result<&EntitySchema> {
        self.schema.collection(collection)
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    fn collection_ref(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Save a document, replacing any stored document with the same id.
    ///
    /// The document must carry an id and satisfy the collection schema.
    pub fn save(&mut self, collection: &str, document: Document) -> Result<Document> {
        let mut saved = self.save_many(collection, vec![document])?;
        saved.pop().ok_or(Error::ObjectIdMissing)
    }

    /// Save several documents. Nothing is stored unless all are valid.
    pub fn save_many(&mut self, collection: &str, documents: Vec<Document>) -> Result<Vec<Document>> {
        let schema = self.entity_schema(collection)?;
        let mut prepared = Vec::with_capacity(documents.len());
        for document in &documents {
            schema.validate_payload(document)?;
            let id = document_id(document).ok_or(Error::ObjectIdMissing)?;
            prepared.push((id.to_string(), schema.to_storage(document.clone())));
        }

        let target = self.collection_mut(collection)?;
        for (id, stored) in prepared {
            target.insert(id, stored);
        }
        Ok(documents)
    }

    /// Document by id.
    pub fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let schema = self.entity_schema(collection)?;
        Ok(self
            .collection_ref(collection)?
            .get(id)
            .map(|stored| schema.from_storage(stored.clone())))
    }

    /// Documents matching a query, filtered by TTL, sorted and windowed.
    ///
    /// Records without a parseable last-modified time are never TTL-filtered.
    pub fn find(&self, collection: &str, query: &Query, now: DateTime<Utc>) -> Result<Vec<Document>> {
        let schema = self.entity_schema(collection)?;
        let stored = self.select(collection, query, Some(now))?;
        Ok(stored
            .into_iter()
            .map(|(_, document)| schema.from_storage(document.clone()))
            .collect())
    }

    /// Ids and last-modified times of the records matching a query's filter.
    ///
    /// Sort, window and TTL are ignored; records without an id or a
    /// last-modified time are left out.
    pub fn find_ids_and_versions(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<BTreeMap<RecordId, String>> {
        let stored = self.select(collection, &query.predicate_only(), None)?;
        Ok(stored
            .into_iter()
            .filter_map(|(id, document)| {
                document_lmt(document).map(|lmt| (id.clone(), lmt.to_string()))
            })
            .collect())
    }

    /// Every document of a collection, ordered by id.
    pub fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        let schema = self.entity_schema(collection)?;
        Ok(self
            .collection_ref(collection)?
            .records
            .values()
            .map(|stored| schema.from_storage(stored.clone()))
            .collect())
    }

    /// Number of records matching a query, or of all stored records.
    pub fn count(&self, collection: &str, query: Option<&Query>, now: DateTime<Utc>) -> Result<usize> {
        match query {
            None => Ok(self.collection_ref(collection)?.len()),
            Some(query) => Ok(self.select(collection, query, Some(now))?.len()),
        }
    }

    /// Ids of the records a query selects, ignoring TTL.
    pub fn matching_ids(&self, collection: &str, query: &Query) -> Result<Vec<RecordId>> {
        Ok(self
            .select(collection, query, None)?
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    pub fn remove_by_id(&mut self, collection: &str, id: &str) -> Result<usize> {
        let target = self.collection_mut(collection)?;
        Ok(usize::from(target.records.remove(id).is_some()))
    }

    pub fn remove_many<S: AsRef<str>>(&mut self, collection: &str, ids: &[S]) -> Result<usize> {
        let target = self.collection_mut(collection)?;
        let mut removed = 0;
        for id in ids {
            let id: &str = id.as_ref();
            if target.records.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the records a query selects. TTL does not apply.
    pub fn remove_by_query(&mut self, collection: &str, query: &Query) -> Result<usize> {
        let ids = self.matching_ids(collection, query)?;
        self.remove_many(collection, &ids)
    }

    pub fn remove_all(&mut self, collection: &str) -> Result<usize> {
        let target = self.collection_mut(collection)?;
        let removed = target.records.len();
        target.records.clear();
        Ok(removed)
    }

    /// Filter, sort and window stored documents.
    fn select(
        &self,
        collection: &str,
        query: &Query,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<(&RecordId, &Document)>> {
        let schema = self.entity_schema(collection)?;
        let records = &self.collection_ref(collection)?.records;
        let translated = Translator::new(schema).translate_query(query);

        let cutoff = match (now, query.ttl) {
            (Some(now), Some(ttl)) => chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_sub_signed(ttl)),
            _ => None,
        };

        let mut selected = Vec::new();
        for (id, document) in records {
            if let Some(cutoff) = cutoff {
                let stale = document_lmt(document)
                    .and_then(parse_timestamp)
                    .is_some_and(|lmt| lmt < cutoff);
                if stale {
                    continue;
                }
            }
            if let Some(predicate) = &translated.predicate {
                if !eval::matches(predicate, document)? {
                    continue;
                }
            }
            selected.push((id, document));
        }

        if !translated.sort.is_empty() {
            selected.sort_by(|a, b| eval::compare_documents(a.1, b.1, &translated.sort));
        }

        let total = selected.len();
        let begin = query.skip.unwrap_or(0).min(total);
        let end = match query.limit {
            Some(limit) => begin.saturating_add(limit).min(total),
            None => total,
        };
        Ok(selected.drain(begin..end).collect())
    }

    // ------------------------------------------------------------------
    // Pending operations
    // ------------------------------------------------------------------

    /// Append an operation, or replace the one with the same request id.
    ///
    /// Returns the operation's sequence number. A replaced operation keeps
    /// its original position.
    pub fn enqueue(&mut self, mut operation: PendingOperation) -> u64 {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|p| p.request_id == operation.request_id)
        {
            operation.sequence = existing.sequence;
            *existing = operation;
            return existing.sequence;
        }

        operation.sequence = self.next_sequence;
        self.next_sequence += 1;
        let sequence = operation.sequence;
        self.pending.push(operation);
        sequence
    }

    /// Pending operations in enqueue order, optionally for one collection.
    pub fn pending(&self, collection: Option<&str>) -> Vec<PendingOperation> {
        self.pending
            .iter()
            .filter(|p| collection.map_or(true, |c| p.collection_name == c))
            .cloned()
            .collect()
    }

    pub fn pending_count(&self, collection: Option<&str>) -> usize {
        self.pending
            .iter()
            .filter(|p| collection.map_or(true, |c| p.collection_name == c))
            .count()
    }

    /// Remove one operation. Returns whether it existed.
    pub fn remove_pending(&mut self, request_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.request_id != request_id);
        self.pending.len() != before
    }

    /// Remove every operation, optionally only for one collection.
    pub fn clear_pending(&mut self, collection: Option<&str>) -> usize {
        let before = self.pending.len();
        match collection {
            Some(c) => self.pending.retain(|p| p.collection_name != c),
            None => self.pending.clear(),
        }
        before - self.pending.len()
    }

    /// Whether any operation targets a record.
    pub fn has_pending_for(&self, collection: &str, object_id: &str) -> bool {
        self.pending
            .iter()
            .any(|p| p.collection_name == collection && p.object_id.as_deref() == Some(object_id))
    }

    /// Ids of the records of a collection with pending operations.
    pub fn pending_object_ids(&self, collection: &str) -> BTreeSet<RecordId> {
        self.pending
            .iter()
            .filter(|p| p.collection_name == collection)
            .filter_map(|p| p.object_id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Export the current state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.schema.clone());
        for (name, collection) in &self.collections {
            snapshot
                .collections
                .insert(name.clone(), collection.records.clone());
        }
        snapshot.pending = self.pending.clone();
        snapshot.next_sequence = self.next_sequence;
        snapshot
    }

    /// Replace the current state with a snapshot's.
    ///
    /// The snapshot must have been taken with the same schema version.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;

        for collection in self.collections.values_mut() {
            collection.records.clear();
        }
        for (name, records) in snapshot.collections {
            if let Some(collection) = self.collections.get_mut(&name) {
                collection.records = records;
            }
        }

        let mut pending = snapshot.pending;
        pending.sort_by_key(|p| p.sequence);
        let max_sequence = pending.last().map_or(0, |p| p.sequence);
        self.pending = pending;
        self.next_sequence = snapshot.next_sequence.max(max_sequence + 1);
        Ok(())
    }

    /// Summary of the current state.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            record_count: self.collections.values().map(Collection::len).sum(),
            pending_count: self.pending.len(),
        }
    }
}
