//! Push: replaying queued operations against the remote service.
//!
//! Operations of one collection are replayed strictly in enqueue order and
//! a collection's replay stops at the first operation that may succeed
//! later. Pushes of the same collection are serialized by a per-collection
//! async mutex, which the write policies that send queued operations take
//! too; different collections push concurrently.

use crate::{
    cancel::CancelToken,
    datastore::response_document,
    error::{Error, Result},
    executor::run_blocking,
    http::HttpRequest,
    net::Network,
    pending::{PendingQueue, Settlement},
};
use dashmap::DashMap;
use futures::future::join_all;
use harbor_engine::{Method, PendingOperation};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// What to do with an operation the remote service rejects (4xx).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Remove it and report the failure
    #[default]
    DiscardRejected,
    /// Keep it and halt the collection
    RetainRejected,
}

/// A rejected operation.
#[derive(Debug, Clone)]
pub struct PushFailure {
    pub operation: PendingOperation,
    pub error: Error,
}

/// Outcome of pushing one collection.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub collection: String,
    /// Operations the remote service accepted
    pub pushed: usize,
    /// Operations rejected and discarded
    pub failures: Vec<PushFailure>,
    /// Why the replay stopped early, if it did
    pub halted: Option<Error>,
    /// Operations still queued for the collection
    pub remaining: usize,
}

impl PushReport {
    fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            pushed: 0,
            failures: Vec::new(),
            halted: None,
            remaining: 0,
        }
    }

    /// Whether every queued operation was attempted.
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// One async mutex per collection.
///
/// Whoever sends queued operations of a collection holds its lock, so an
/// operation is never sent twice or ahead of an older one.
#[derive(Debug, Default)]
pub struct CollectionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(collection.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Like [`CollectionLocks::lock`], giving up when `cancel` fires.
    pub async fn lock_or_cancel(
        &self,
        collection: &str,
        cancel: &CancelToken,
    ) -> Result<OwnedMutexGuard<()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::RequestCancelled),
            guard = self.lock(collection) => Ok(guard),
        }
    }
}

/// Replays the pending queue.
pub struct SyncEngine {
    pending: PendingQueue,
    network: Network,
    policy: FailurePolicy,
    locks: Arc<CollectionLocks>,
}

impl SyncEngine {
    pub fn new(
        pending: PendingQueue,
        network: Network,
        locks: Arc<CollectionLocks>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            pending,
            network,
            policy,
            locks,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Push one collection.
    ///
    /// Fails only when nothing could be attempted (no active user, store
    /// unavailable); per-operation outcomes are in the report.
    pub async fn push(&self, collection: &str, cancel: &CancelToken) -> Result<PushReport> {
        self.network.session().require()?;

        let _guard = self.locks.lock(collection).await;

        let pending = self.pending.clone();
        let name = collection.to_string();
        let operations = run_blocking(move || pending.dequeue_in_order(Some(&name))).await?;

        let mut report = PushReport::new(collection);
        for operation in operations {
            if cancel.is_cancelled() {
                report.halted = Some(Error::RequestCancelled);
                break;
            }
            match self.replay(&operation, cancel).await? {
                Replay::Accepted => report.pushed += 1,
                Replay::Rejected(error) => match self.policy {
                    FailurePolicy::DiscardRejected => {
                        warn!(
                            collection,
                            request_id = %operation.request_id,
                            error = %error,
                            "Discarding rejected operation"
                        );
                        self.remove(&operation.request_id).await?;
                        report.failures.push(PushFailure { operation, error });
                    }
                    FailurePolicy::RetainRejected => {
                        report.halted = Some(error);
                        break;
                    }
                },
                Replay::Halted(error) => {
                    report.halted = Some(error);
                    break;
                }
            }
        }

        let pending = self.pending.clone();
        let name = collection.to_string();
        report.remaining = run_blocking(move || pending.count(Some(&name))).await?;

        info!(
            collection,
            pushed = report.pushed,
            failed = report.failures.len(),
            remaining = report.remaining,
            halted = ?report.halted.as_ref().map(ToString::to_string),
            "Push finished"
        );
        Ok(report)
    }

    /// Push every collection with queued operations, concurrently.
    pub async fn push_all(&self, cancel: &CancelToken) -> Result<Vec<PushReport>> {
        let pending = self.pending.clone();
        let collections = run_blocking(move || pending.collections()).await?;
        join_all(collections.iter().map(|c| self.push(c, cancel)))
            .await
            .into_iter()
            .collect()
    }

    async fn replay(&self, operation: &PendingOperation, cancel: &CancelToken) -> Result<Replay> {
        let request = HttpRequest::from_pending(operation);
        let response = match self.network.send_authorized(request, cancel).await {
            Ok(response) => response,
            Err(e) => return Ok(Replay::Halted(e)),
        };

        if !response.is_success() {
            let error = Error::Remote {
                status: response.status,
                body: response.text(),
            };
            return Ok(if error.is_transient() {
                Replay::Halted(error)
            } else {
                Replay::Rejected(error)
            });
        }

        let settlement = match operation.method {
            Method::Put | Method::Post => match response_document(response) {
                Ok(document) => Some(Settlement::Upsert(document)),
                Err(e) => {
                    warn!(
                        request_id = %operation.request_id,
                        error = %e,
                        "Pushed operation returned no usable record, cache not updated"
                    );
                    None
                }
            },
            Method::Get | Method::Delete => None,
        };
        let pending = self.pending.clone();
        let collection = operation.collection_name.clone();
        let request_id = operation.request_id.clone();
        run_blocking(move || pending.confirm(&collection, Some(&request_id), settlement)).await?;
        debug!(request_id = %operation.request_id, "Operation pushed");
        Ok(Replay::Accepted)
    }

    async fn remove(&self, request_id: &str) -> Result<()> {
        let pending = self.pending.clone();
        let request_id = request_id.to_string();
        run_blocking(move || pending.remove(&request_id)).await?;
        Ok(())
    }
}

enum Replay {
    Accepted,
    Rejected(Error),
    Halted(Error),
}
