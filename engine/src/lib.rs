//! # Harbor Engine
//!
//! The deterministic core of an offline-first record cache.
//!
//! This crate holds the logic of the local cache: schemas, queries, the
//! document store, the pending-operation log and reconciliation planning.
//! It performs no IO; the `harbor-client` crate runs it behind a serial
//! executor, persists its snapshots and talks to the remote service.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, clocks or logging
//! - **Deterministic**: same inputs, same outputs; the caller passes `now`
//! - **Owned results**: every read returns detached copies
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Records are JSON [`Document`]s keyed by storage key, with three reserved
//! fields: `_id`, `_kmd` ([`Metadata`]) and `_acl` ([`Acl`]). Typed records
//! implement [`Entity`] and describe their layout with an [`EntitySchema`].
//!
//! ### Queries
//!
//! A [`Query`] is a [`Predicate`] tree plus sort keys, skip/limit and an
//! optional TTL. The [`Translator`] rewrites predicates for the stored
//! layout, where scalar lists declared [`FieldKind::WrappedList`] hold
//! `{"value": x}` carriers. [`Query::to_remote`] encodes the same query for
//! the remote service.
//!
//! ### Pending operations
//!
//! Mutations not yet confirmed by the remote service are captured as
//! [`PendingOperation`]s and kept in the [`Store`] in enqueue order.
//!
//! ## Quick Start
//!
//! ```rust
//! use harbor_engine::{
//!     EntitySchema, FieldDef, FieldKind, Predicate, Query, ScalarKind, Schema, Store,
//! };
//! use serde_json::json;
//!
//! // 1. Define a schema
//! let schema = Schema::new(1).with_collection(EntitySchema::new(
//!     "books",
//!     vec![
//!         FieldDef::required("title", FieldKind::Scalar(ScalarKind::String)),
//!         FieldDef::optional("tags", FieldKind::WrappedList(ScalarKind::String)),
//!     ],
//! ));
//!
//! // 2. Create a store
//! let mut store = Store::new(schema);
//!
//! // 3. Save a document
//! let book = json!({"_id": "b1", "title": "Dune", "tags": ["scifi"]});
//! store.save("books", book.as_object().cloned().unwrap()).unwrap();
//!
//! // 4. Query it
//! let query = Query::filter(Predicate::contains("tags", "scifi"));
//! let found = store.find("books", &query, chrono::Utc::now()).unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0]["tags"], json!(["scifi"]));
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::from_snapshot`] with
//! [`StoreSnapshot`] for persistence.

pub mod error;
pub mod eval;
pub mod pending;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod translate;

// Re-export main types at crate root
pub use error::Error;
pub use pending::{Method, PendingOperation, REQUEST_ID_HEADER};
pub use query::{
    CompareOp, Comparison, ElementIndex, Expr, Modifier, Predicate, Query, RemoteQuery,
    SortDescriptor,
};
pub use reconcile::{plan as plan_reconcile, ReconcilePlan};
pub use record::{
    document_id, document_lmt, format_timestamp, parse_timestamp, Acl, Document, Entity,
    Metadata, ACL_KEY, ID_KEY, METADATA_KEY,
};
pub use schema::{EntitySchema, FieldDef, FieldKind, ResolvedPath, ScalarKind, Schema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, Store};
pub use translate::Translator;

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type SchemaVersion = u32;
