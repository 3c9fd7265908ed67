//! Write orchestration and typed data access.
//!
//! A [`DataStore`] combines the local [`Cache`], the [`PendingQueue`] and the
//! remote service according to a [`WritePolicy`] or [`ReadPolicy`]. Every
//! call runs as one Tokio task and returns an [`OperationHandle`] that
//! delivers the local result (when a local step ran) and exactly one final
//! result.
//!
//! | Policy             | Local step                 | Network step        | Final result                 |
//! |--------------------|----------------------------|---------------------|------------------------------|
//! | `LocalOnly`        | apply + queue              | none                | local                        |
//! | `NetworkOnly`      | none                       | send                | network, cache untouched     |
//! | `LocalThenNetwork` | apply + queue              | replay queued request | network                    |
//! | `NetworkElseLocal` | only on transient failure  | send                | network, else local          |
//!
//! A network step never overtakes a queued operation touching the same
//! records. It runs under the collection's push lock; when an older
//! operation is still queued the new one stays queued behind it (or, for
//! `NetworkElseLocal`, is applied locally and queued) and the final result
//! is the local one.

use crate::{
    cache::{new_client_id, Cache},
    cancel::CancelToken,
    error::{Error, Result},
    executor::run_blocking,
    http::{HttpRequest, HttpResponse},
    net::Network,
    pending::{PendingQueue, QueueState, Settlement},
    request::RequestFactory,
    sync::CollectionLocks,
};
use chrono::Utc;
use harbor_engine::{document_id, plan_reconcile, Document, Entity, Query, RecordId};
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

/// How a mutation combines the local cache and the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritePolicy {
    /// Apply locally and queue the request for a later push
    LocalOnly,
    /// Send to the remote service only
    NetworkOnly,
    /// Apply locally and queue, then send the queued request
    #[default]
    LocalThenNetwork,
    /// Send; on a transient failure apply locally and queue instead
    NetworkElseLocal,
}

/// Where a read is served from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadPolicy {
    ForceLocal,
    ForceNetwork,
    /// Local result first, then the network result
    #[default]
    Both,
}

/// Handle to a running operation.
///
/// Dropping the handle does not stop the operation; call
/// [`OperationHandle::cancel`] for that. Cancellation stops outstanding
/// requests but never undoes a local effect.
pub struct OperationHandle<R> {
    cancel: CancelToken,
    local: Option<oneshot::Receiver<Result<R>>>,
    task: JoinHandle<Result<R>>,
}

/// Handle to a save or remove.
pub type WriteHandle<R> = OperationHandle<R>;
/// Handle to a find.
pub type ReadHandle<R> = OperationHandle<R>;

impl<R: Send + 'static> OperationHandle<R> {
    /// Spawn `operation` on the current Tokio runtime.
    fn spawn<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(LocalResult<R>, CancelToken) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (sender, receiver) = oneshot::channel();
        let task = tokio::spawn(operation(LocalResult(Some(sender)), cancel.clone()));
        Self {
            cancel,
            local: Some(receiver),
            task,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Result of the local step.
    ///
    /// `None` when no local step ran, or when it was already taken.
    pub async fn local(&mut self) -> Option<Result<R>> {
        self.local.take()?.await.ok()
    }

    /// Final result of the operation.
    pub async fn result(self) -> Result<R> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::RequestCancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// One-shot channel for the local step's result.
struct LocalResult<R>(Option<oneshot::Sender<Result<R>>>);

impl<R: Clone> LocalResult<R> {
    fn deliver(&mut self, result: &Result<R>) {
        if let Some(sender) = self.0.take() {
            let _ = sender.send(result.clone());
        }
    }
}

/// Typed access to one collection.
pub struct DataStore<T> {
    cache: Cache<T>,
    pending: PendingQueue,
    network: Network,
    factory: Arc<dyn RequestFactory>,
    locks: Arc<CollectionLocks>,
}

impl<T> Clone for DataStore<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            pending: self.pending.clone(),
            network: self.network.clone(),
            factory: self.factory.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<T: Entity> DataStore<T> {
    pub fn new(
        cache: Cache<T>,
        pending: PendingQueue,
        network: Network,
        factory: Arc<dyn RequestFactory>,
        locks: Arc<CollectionLocks>,
    ) -> Self {
        Self {
            cache,
            pending,
            network,
            factory,
            locks,
        }
    }

    /// Direct, synchronous access to the local cache.
    pub fn cache(&self) -> &Cache<T> {
        &self.cache
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Queued operations for this collection.
    pub fn pending_count(&self) -> Result<usize> {
        self.pending.count(Some(Self::collection()))
    }

    fn collection() -> &'static str {
        T::collection_name()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Save a record.
    ///
    /// Except under [`WritePolicy::NetworkOnly`], a record without an id is
    /// given a client id first, so the queued request is an upsert.
    ///
    /// Must be called within a Tokio runtime.
    pub fn save(&self, record: T, policy: WritePolicy) -> WriteHandle<T> {
        let this = self.clone();
        OperationHandle::spawn(move |mut local, cancel| async move {
            this.run_save(record, policy, &mut local, &cancel).await
        })
    }

    async fn run_save(
        &self,
        mut record: T,
        policy: WritePolicy,
        local: &mut LocalResult<T>,
        cancel: &CancelToken,
    ) -> Result<T> {
        if policy != WritePolicy::NetworkOnly && record.entity_id().is_none() {
            record.set_entity_id(new_client_id());
        }
        let document = record.to_document()?;
        let request = self.factory.build_save(Self::collection(), &document)?;

        match policy {
            WritePolicy::LocalOnly => {
                let result = self.save_locally(record, document, &request).await;
                local.deliver(&result);
                result
            }
            WritePolicy::NetworkOnly => {
                let saved = self.send_for_document(request, cancel).await?;
                T::from_document(saved).map_err(Into::into)
            }
            WritePolicy::LocalThenNetwork => {
                let result = self.save_locally(record, document, &request).await;
                local.deliver(&result);
                let record = result?;
                let _guard = self.locks.lock_or_cancel(Self::collection(), cancel).await?;
                if !self.ready_to_send(&request).await? {
                    return self.cached_or(record).await;
                }
                let request_id = request.request_id().map(str::to_string);
                let saved = self.send_for_document(request, cancel).await?;
                self.confirm(request_id, Some(Settlement::Upsert(saved.clone())))
                    .await?;
                T::from_document(saved).map_err(Into::into)
            }
            WritePolicy::NetworkElseLocal => {
                let object_id = record.entity_id().map(str::to_string);
                let _guard = self.locks.lock_or_cancel(Self::collection(), cancel).await?;
                if self.is_blocked(object_id).await? {
                    debug!(collection = Self::collection(), "Record has queued operations, saving locally");
                    let result = self.save_locally(record, document, &request).await;
                    local.deliver(&result);
                    return result;
                }
                match self.send_for_document(request.clone(), cancel).await {
                    Ok(saved) => {
                        self.confirm(None, Some(Settlement::Upsert(saved.clone())))
                            .await?;
                        T::from_document(saved).map_err(Into::into)
                    }
                    Err(e) if e.is_transient() => {
                        warn!(collection = Self::collection(), error = %e, "Save failed, keeping it locally");
                        let result = self.save_locally(record, document, &request).await;
                        local.deliver(&result);
                        result
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Store the record and queue `request` in one store job.
    async fn save_locally(&self, record: T, document: Document, request: &HttpRequest) -> Result<T> {
        let id = document_id(&document)
            .map(str::to_string)
            .ok_or(Error::ObjectIdMissing)?;
        let operation = request.to_pending(Self::collection(), Some(id), Utc::now().timestamp_millis())?;
        let store = self.cache.store().clone();
        run_blocking(move || {
            store.write(move |s| {
                s.save(Self::collection(), document)?;
                Ok(s.enqueue(operation))
            })
        })
        .await?;
        Ok(record)
    }

    /// Remove a record by id; resolves to the number removed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn remove_by_id(&self, id: impl Into<RecordId>, policy: WritePolicy) -> WriteHandle<usize> {
        let this = self.clone();
        let id = id.into();
        OperationHandle::spawn(move |mut local, cancel| async move {
            let request = this.factory.build_remove_by_id(Self::collection(), &id)?;
            this.run_remove(
                request,
                Some(id.clone()),
                Settlement::RemoveId(id),
                policy,
                &mut local,
                &cancel,
            )
            .await
        })
    }

    /// Remove the records a query selects; resolves to the number removed.
    ///
    /// The local count comes from the records stored at the time of the
    /// call; the same predicate is sent to the remote service.
    ///
    /// Must be called within a Tokio runtime.
    pub fn remove_by_query(&self, query: Query, policy: WritePolicy) -> WriteHandle<usize> {
        let this = self.clone();
        OperationHandle::spawn(move |mut local, cancel| async move {
            let remote = query.to_remote(Some(T::schema()))?;
            let request = this.factory.build_remove_by_query(Self::collection(), &remote)?;
            this.run_remove(
                request,
                None,
                Settlement::RemoveQuery(query),
                policy,
                &mut local,
                &cancel,
            )
            .await
        })
    }

    async fn run_remove(
        &self,
        request: HttpRequest,
        object_id: Option<RecordId>,
        settlement: Settlement,
        policy: WritePolicy,
        local: &mut LocalResult<usize>,
        cancel: &CancelToken,
    ) -> Result<usize> {
        match policy {
            WritePolicy::LocalOnly => {
                let result = self.remove_locally(&settlement, object_id, &request).await;
                local.deliver(&result);
                result
            }
            WritePolicy::NetworkOnly => self.send_for_count(request, cancel).await,
            WritePolicy::LocalThenNetwork => {
                let result = self.remove_locally(&settlement, object_id, &request).await;
                local.deliver(&result);
                let removed = result?;
                let _guard = self.locks.lock_or_cancel(Self::collection(), cancel).await?;
                if !self.ready_to_send(&request).await? {
                    return Ok(removed);
                }
                let request_id = request.request_id().map(str::to_string);
                let count = self.send_for_count(request, cancel).await?;
                self.confirm(request_id, Some(settlement)).await?;
                Ok(count)
            }
            WritePolicy::NetworkElseLocal => {
                let _guard = self.locks.lock_or_cancel(Self::collection(), cancel).await?;
                if self.is_blocked(object_id.clone()).await? {
                    debug!(collection = Self::collection(), "Records have queued operations, removing locally");
                    let result = self.remove_locally(&settlement, object_id, &request).await;
                    local.deliver(&result);
                    return result;
                }
                match self.send_for_count(request.clone(), cancel).await {
                    Ok(count) => {
                        self.confirm(None, Some(settlement)).await?;
                        Ok(count)
                    }
                    Err(e) if e.is_transient() => {
                        warn!(collection = Self::collection(), error = %e, "Remove failed, applying it locally");
                        let result = self.remove_locally(&settlement, object_id, &request).await;
                        local.deliver(&result);
                        result
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Remove locally and queue `request` in one store job.
    async fn remove_locally(
        &self,
        settlement: &Settlement,
        object_id: Option<RecordId>,
        request: &HttpRequest,
    ) -> Result<usize> {
        let operation = request.to_pending(Self::collection(), object_id, Utc::now().timestamp_millis())?;
        let settlement = settlement.clone();
        let store = self.cache.store().clone();
        run_blocking(move || {
            store.write(move |s| {
                let removed = match &settlement {
                    Settlement::RemoveId(id) => s.remove_by_id(Self::collection(), id)?,
                    Settlement::RemoveQuery(query) => s.remove_by_query(Self::collection(), query)?,
                    Settlement::Upsert(_) => 0,
                };
                s.enqueue(operation);
                Ok(removed)
            })
        })
        .await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Find records matching a query.
    ///
    /// Network reads reconcile the local cache with the result.
    ///
    /// Must be called within a Tokio runtime.
    pub fn find(&self, query: Query, policy: ReadPolicy) -> ReadHandle<Vec<T>> {
        let this = self.clone();
        OperationHandle::spawn(move |mut local, cancel| async move {
            if policy != ReadPolicy::ForceNetwork {
                let cache = this.cache.clone();
                let local_query = query.clone();
                let result = run_blocking(move || cache.find(&local_query)).await;
                local.deliver(&result);
                if policy == ReadPolicy::ForceLocal {
                    return result;
                }
                result?;
            }
            let documents = this.fetch(&query, &cancel).await?;
            if let Err(e) = this.reconcile(&query, documents.clone()).await {
                warn!(collection = Self::collection(), error = %e, "Could not reconcile find result");
            }
            documents
                .into_iter()
                .map(|d| T::from_document(d).map_err(Into::into))
                .collect()
        })
    }

    /// Find one record by id.
    ///
    /// Must be called within a Tokio runtime.
    pub fn find_by_id(&self, id: impl Into<RecordId>, policy: ReadPolicy) -> ReadHandle<Option<T>> {
        let this = self.clone();
        let id = id.into();
        OperationHandle::spawn(move |mut local, cancel| async move {
            if policy != ReadPolicy::ForceNetwork {
                let cache = this.cache.clone();
                let local_id = id.clone();
                let result = run_blocking(move || cache.find_by_id(&local_id)).await;
                local.deliver(&result);
                if policy == ReadPolicy::ForceLocal {
                    return result;
                }
                result?;
            }
            let request = this.factory.build_find_by_id(Self::collection(), &id)?;
            let response = this.network.send_authorized(request, &cancel).await?;
            if response.status == 404 {
                this.confirm(None, Some(Settlement::RemoveId(id))).await?;
                return Ok(None);
            }
            let document = response_document(response)?;
            this.confirm(None, Some(Settlement::Upsert(document.clone())))
                .await?;
            Ok(Some(T::from_document(document)?))
        })
    }

    /// Refresh the local cache from the remote service.
    ///
    /// Resolves to the number of local records changed. Records with
    /// queued operations are left alone.
    ///
    /// Must be called within a Tokio runtime.
    pub fn pull(&self, query: Query) -> ReadHandle<usize> {
        let this = self.clone();
        OperationHandle::spawn(move |_local, cancel| async move {
            let documents = this.fetch(&query, &cancel).await?;
            this.reconcile(&query, documents).await
        })
    }

    async fn fetch(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<Document>> {
        let remote = query.to_remote(Some(T::schema()))?;
        let request = self.factory.build_find_by_query(Self::collection(), &remote)?;
        let response = self
            .network
            .send_authorized(request, cancel)
            .await?
            .error_for_status()?;
        response.json()
    }

    /// Apply a remote result to the local cache in one store job.
    async fn reconcile(&self, query: &Query, documents: Vec<Document>) -> Result<usize> {
        let query = query.clone();
        let remote_is_complete = !query.is_windowed();
        let store = self.cache.store().clone();
        let changed = run_blocking(move || {
            store.write(move |s| {
                let local = s.find_ids_and_versions(Self::collection(), &query)?;
                let pinned = s.pending_object_ids(Self::collection());
                let plan = plan_reconcile(&local, documents, &pinned, remote_is_complete);
                let changed = plan.changed();
                s.save_many(Self::collection(), plan.upserts)?;
                s.remove_many(Self::collection(), &plan.removals)?;
                Ok(changed)
            })
        })
        .await?;
        debug!(collection = Self::collection(), changed, "Reconciled with remote result");
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Network helpers
    // ------------------------------------------------------------------

    async fn send_for_document(&self, request: HttpRequest, cancel: &CancelToken) -> Result<Document> {
        let response = self
            .network
            .send_authorized(request, cancel)
            .await?
            .error_for_status()?;
        response_document(response)
    }

    async fn send_for_count(&self, request: HttpRequest, cancel: &CancelToken) -> Result<usize> {
        let response = self
            .network
            .send_authorized(request, cancel)
            .await?
            .error_for_status()?;
        response_count(&response)
    }

    /// Whether the queued `request` is next in line for its records.
    /// Call with the collection lock held.
    async fn ready_to_send(&self, request: &HttpRequest) -> Result<bool> {
        let Some(request_id) = request.request_id().map(str::to_string) else {
            return Ok(true);
        };
        let pending = self.pending.clone();
        let state = run_blocking(move || pending.state_of(Self::collection(), &request_id)).await?;
        if state != QueueState::Ready {
            debug!(collection = Self::collection(), ?state, "Leaving request to the next push");
        }
        Ok(state == QueueState::Ready)
    }

    async fn is_blocked(&self, object_id: Option<RecordId>) -> Result<bool> {
        let pending = self.pending.clone();
        run_blocking(move || pending.is_blocked(Self::collection(), object_id.as_deref())).await
    }

    /// The cached copy of `record`, which a push may have refreshed.
    async fn cached_or(&self, record: T) -> Result<T> {
        let Some(id) = record.entity_id().map(str::to_string) else {
            return Ok(record);
        };
        let cache = self.cache.clone();
        let cached = run_blocking(move || cache.find_by_id(&id)).await?;
        Ok(cached.unwrap_or(record))
    }

    async fn confirm(&self, request_id: Option<String>, settlement: Option<Settlement>) -> Result<()> {
        let pending = self.pending.clone();
        run_blocking(move || pending.confirm(Self::collection(), request_id.as_deref(), settlement))
            .await
    }
}

/// Body of a 2xx response as a document.
pub(crate) fn response_document(response: HttpResponse) -> Result<Document> {
    let response = response.error_for_status()?;
    match response.json::<Value>()? {
        Value::Object(document) => Ok(document),
        other => Err(Error::InvalidResponse(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// `count` field of a removal response.
pub(crate) fn response_count(response: &HttpResponse) -> Result<usize> {
    response
        .json::<Value>()?
        .get("count")
        .and_then(Value::as_u64)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| Error::InvalidResponse("removal response has no count".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_removal_count() {
        let response = HttpResponse::new(200).with_json(&json!({"count": 3}));
        assert_eq!(response_count(&response).unwrap(), 3);

        for body in [json!({}), json!({"count": -1}), json!({"count": "3"})] {
            let response = HttpResponse::new(200).with_json(&body);
            assert!(matches!(
                response_count(&response),
                Err(Error::InvalidResponse(_))
            ));
        }
    }

    #[test]
    fn response_document_requires_object() {
        let response = HttpResponse::new(201).with_json(&json!({"_id": "a"}));
        assert_eq!(document_id(&response_document(response).unwrap()), Some("a"));

        let response = HttpResponse::new(200).with_json(&json!([1]));
        assert!(response_document(response).is_err());

        let response = HttpResponse::new(409).with_json(&json!({"error": "conflict"}));
        assert_eq!(response_document(response).unwrap_err().status(), Some(409));
    }

    #[test]
    fn default_policies() {
        assert_eq!(WritePolicy::default(), WritePolicy::LocalThenNetwork);
        assert_eq!(ReadPolicy::default(), ReadPolicy::Both);
    }
}
