//! # Harbor Client
//!
//! Offline-first record access, sync and resumable blob transfer on top of
//! [`harbor_engine`].
//!
//! ## Architecture
//!
//! ```text
//! DataStore<T> ──► Cache<T> ─┐
//!      │                     ├─► LocalStore ──► SerialExecutor ──► engine Store
//!      │        PendingQueue ┘        (snapshot file)
//!      ▼
//!   Network ──► HttpClient (reqwest)
//!      ▲
//! SyncEngine (push)      FileStore (upload, download, FileCache)
//! ```
//!
//! - Every store call runs on one worker thread, in order, and blocks the
//!   caller until done
//! - Mutations that still need the remote service are captured as
//!   pending operations and replayed by [`SyncEngine::push`]
//! - Network calls take a [`CancelToken`]; cancelling never undoes a local
//!   effect
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harbor_client::{Client, Config, ReadPolicy, WritePolicy};
//! use harbor_engine::{Entity, EntitySchema, FieldDef, FieldKind, Query, RecordId, ScalarKind};
//! use serde::{Deserialize, Serialize};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Book {
//!     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
//!     id: Option<String>,
//!     title: String,
//! }
//!
//! impl Entity for Book {
//!     fn schema() -> &'static EntitySchema {
//!         static SCHEMA: OnceLock<EntitySchema> = OnceLock::new();
//!         SCHEMA.get_or_init(|| {
//!             EntitySchema::new(
//!                 "books",
//!                 vec![FieldDef::required("title", FieldKind::Scalar(ScalarKind::String))],
//!             )
//!         })
//!     }
//!     fn entity_id(&self) -> Option<&str> {
//!         self.id.as_deref()
//!     }
//!     fn set_entity_id(&mut self, id: RecordId) {
//!         self.id = Some(id);
//!     }
//! }
//!
//! # async fn run() -> harbor_client::Result<()> {
//! let client = Client::builder(Config::new("kid_app").with_auth_token("token"))
//!     .register::<Book>()
//!     .build()?;
//! let books = client.data_store::<Book>()?;
//!
//! let mut handle = books.save(Book { id: None, title: "Dune".into() }, WritePolicy::LocalThenNetwork);
//! let saved_locally = handle.local().await;
//! let saved = handle.result().await?;
//!
//! let found = books.find(Query::new(), ReadPolicy::ForceLocal).result().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod client;
pub mod config;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod file;
pub mod file_cache;
pub mod file_store;
pub mod http;
pub mod local;
pub mod net;
pub mod pending;
pub mod request;
pub mod session;
pub mod sync;
pub mod upload;

pub use cache::{new_client_id, Cache};
pub use cancel::CancelToken;
pub use client::{Client, ClientBuilder};
pub use config::{Config, ConfigError};
pub use datastore::{DataStore, OperationHandle, ReadHandle, ReadPolicy, WriteHandle, WritePolicy};
pub use error::{Error, Result};
pub use file::File;
pub use file_cache::{CacheEntry, FileCache};
pub use file_store::{DownloadOptions, FileStore};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use local::{LocalStore, OpenOutcome};
pub use net::Network;
pub use pending::{PendingQueue, QueueState, Settlement};
pub use request::{HttpRequestFactory, RequestFactory};
pub use session::Session;
pub use sync::{CollectionLocks, FailurePolicy, PushFailure, PushReport, SyncEngine};
pub use upload::{parse_range_header, UploadFailure};
