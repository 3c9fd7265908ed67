//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and persistent storage.
//! Collections use BTreeMap so the serialized form is deterministic.

use crate::{
    error::Result, CollectionName, Document, Error, PendingOperation, RecordId, Schema,
    SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema the documents were stored with
    pub schema: Schema,
    /// Stored documents by collection, then by id
    pub collections: BTreeMap<CollectionName, BTreeMap<RecordId, Document>>,
    /// Pending operations, in enqueue order
    pub pending: Vec<PendingOperation>,
    /// Next sequence number to assign
    pub next_sequence: u64,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema: Schema) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema,
            collections: BTreeMap::new(),
            pending: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.schema.version
    }

    /// Count stored documents across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema.version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema.version,
            });
        }

        for (name, documents) in &self.collections {
            let entity = schema.collection(name)?;
            for (id, stored) in documents {
                entity.validate_payload(&entity.from_storage(stored.clone()))?;
                if crate::record::document_id(stored) != Some(id.as_str()) {
                    return Err(Error::InvalidSnapshot(format!(
                        "document stored under '{id}' in '{name}' has a different id"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Summary of a store's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub record_count: usize,
    pub pending_count: usize,
}
