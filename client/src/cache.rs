//! Typed local cache over the durable store.
//!
//! [`Cache`] is the per-entity view of a [`LocalStore`]: it converts between
//! `T` and documents and runs every call on the store's serial executor.
//! Records come back as owned values deserialized from copies of the stored
//! documents, so mutating them never touches the store.

use crate::{
    error::Result,
    local::LocalStore,
};
use chrono::Utc;
use harbor_engine::{Document, Entity, Query, RecordId, ReconcilePlan};
use std::{collections::BTreeMap, marker::PhantomData, sync::Arc, time::Duration};
use tracing::debug;

/// Length of client-generated ids, in hex characters.
pub const CLIENT_ID_LEN: usize = 24;

/// A fresh client-side record id.
pub fn new_client_id() -> RecordId {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(CLIENT_ID_LEN);
    id
}

/// Local cache for one entity type.
pub struct Cache<T> {
    store: Arc<LocalStore>,
    ttl: Option<Duration>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ttl: self.ttl,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Cache<T> {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            ttl: None,
            _entity: PhantomData,
        }
    }

    /// Default maximum record age for queries that set none.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    fn collection() -> &'static str {
        T::collection_name()
    }

    fn with_default_ttl(&self, query: &Query) -> Query {
        let mut query = query.clone();
        if query.ttl.is_none() {
            query.ttl = self.ttl;
        }
        query
    }

    /// Save a record, assigning a client id when it has none.
    pub fn save(&self, record: T) -> Result<T> {
        let mut saved = self.save_many(vec![record])?;
        Ok(saved.remove(0))
    }

    /// Save several records at once; nothing is stored unless all are valid.
    pub fn save_many(&self, records: Vec<T>) -> Result<Vec<T>> {
        let mut documents = Vec::with_capacity(records.len());
        let mut saved = Vec::with_capacity(records.len());
        for mut record in records {
            if record.entity_id().is_none() {
                record.set_entity_id(new_client_id());
            }
            documents.push(record.to_document()?);
            saved.push(record);
        }
        let count = documents.len();
        self.store
            .write(move |store| store.save_many(Self::collection(), documents))?;
        debug!(collection = Self::collection(), count, "Saved records");
        Ok(saved)
    }

    /// Save raw documents, as returned by the remote service.
    pub fn save_documents(&self, documents: Vec<Document>) -> Result<usize> {
        let count = documents.len();
        self.store
            .write(move |store| store.save_many(Self::collection(), documents))?;
        Ok(count)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let id = id.to_string();
        let document = self
            .store
            .read(move |store| store.find_by_id(Self::collection(), &id))?;
        debug!(collection = Self::collection(), found = document.is_some(), "Find by id");
        document.map(T::from_document).transpose().map_err(Into::into)
    }

    /// Records matching a query, after TTL filtering, sorting and windowing.
    pub fn find(&self, query: &Query) -> Result<Vec<T>> {
        let query = self.with_default_ttl(query);
        let documents = self
            .store
            .read(move |store| store.find(Self::collection(), &query, Utc::now()))?;
        debug!(collection = Self::collection(), count = documents.len(), "Find by query");
        into_entities(documents)
    }

    /// Id to last-modified time of the records matching a query's filter.
    pub fn find_ids_and_versions(&self, query: &Query) -> Result<BTreeMap<RecordId, String>> {
        let query = query.clone();
        self.store
            .read(move |store| store.find_ids_and_versions(Self::collection(), &query))
    }

    pub fn find_all(&self) -> Result<Vec<T>> {
        let documents = self
            .store
            .read(|store| store.find_all(Self::collection()))?;
        into_entities(documents)
    }

    /// Number of records matching `query`, or of every stored record.
    ///
    /// Without a query TTL does not apply.
    pub fn count(&self, query: Option<&Query>) -> Result<usize> {
        let query = query.map(|q| self.with_default_ttl(q));
        self.store
            .read(move |store| store.count(Self::collection(), query.as_ref(), Utc::now()))
    }

    pub fn remove_by_id(&self, id: &str) -> Result<usize> {
        let id = id.to_string();
        let removed = self
            .store
            .write(move |store| store.remove_by_id(Self::collection(), &id))?;
        debug!(collection = Self::collection(), removed, "Remove by id");
        Ok(removed)
    }

    pub fn remove_many(&self, ids: Vec<RecordId>) -> Result<usize> {
        self.store
            .write(move |store| store.remove_many(Self::collection(), &ids))
    }

    /// Remove the records a query selects; TTL does not apply.
    pub fn remove_by_query(&self, query: &Query) -> Result<usize> {
        let query = query.clone();
        let removed = self
            .store
            .write(move |store| store.remove_by_query(Self::collection(), &query))?;
        debug!(collection = Self::collection(), removed, "Remove by query");
        Ok(removed)
    }

    pub fn remove_all(&self) -> Result<usize> {
        self.store
            .write(|store| store.remove_all(Self::collection()))
    }

    /// Apply a reconciliation plan in one store job.
    pub fn apply(&self, plan: ReconcilePlan) -> Result<usize> {
        let changed = plan.changed();
        if changed == 0 {
            return Ok(0);
        }
        self.store.write(move |store| {
            store.save_many(Self::collection(), plan.upserts)?;
            store.remove_many(Self::collection(), &plan.removals)
        })?;
        debug!(collection = Self::collection(), changed, "Applied remote changes");
        Ok(changed)
    }
}

fn into_entities<T: Entity>(documents: Vec<Document>) -> Result<Vec<T>> {
    documents
        .into_iter()
        .map(|d| T::from_document(d).map_err(Into::into))
        .collect()
}
