//! Record types: reserved metadata, access control and the [`Entity`] trait.
//!
//! Records travel through the engine as [`Document`]s, JSON objects keyed by
//! storage key. Typed records are plain `serde` structs implementing
//! [`Entity`]; conversion between the two goes through `serde_json` and
//! always produces owned values.

use crate::{error::Result, EntitySchema, Error, RecordId};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A stored record: JSON object keyed by storage key.
pub type Document = serde_json::Map<String, Value>;

/// Storage key of the record id.
pub const ID_KEY: &str = "_id";
/// Storage key of the record metadata.
pub const METADATA_KEY: &str = "_kmd";
/// Storage key of the access control list.
pub const ACL_KEY: &str = "_acl";

/// Timestamp format used by the remote service (`yyyy-MM-dd'T'HH:mm:ss.SSSZ`).
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Server-maintained record metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Last modified time, as sent by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lmt: Option<String>,
    /// Entity creation time, as sent by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ect: Option<String>,
}

impl Metadata {
    /// Metadata carrying only a last-modified time.
    pub fn with_lmt(lmt: impl Into<String>) -> Self {
        Self {
            lmt: Some(lmt.into()),
            ect: None,
        }
    }

    /// Parsed last-modified time.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.lmt.as_deref().and_then(parse_timestamp)
    }

    /// Parsed entity creation time.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.ect.as_deref().and_then(parse_timestamp)
    }
}

/// Ownership and permissions of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// User id of the creator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Globally readable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gr: Option<bool>,
    /// Globally writable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<bool>,
    /// Users allowed to read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r: Vec<String>,
    /// Users allowed to write
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub w: Vec<String>,
}

/// Parse a server timestamp.
///
/// Accepts the remote format with a numeric offset (`+0000`) as well as
/// RFC 3339 with a `Z` suffix.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, REMOTE_TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp the way the server does.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Id of a document, if assigned.
pub fn document_id(document: &Document) -> Option<&str> {
    document
        .get(ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Last-modified time of a document, as stored.
pub fn document_lmt(document: &Document) -> Option<&str> {
    document
        .get(METADATA_KEY)
        .and_then(|kmd| kmd.get("lmt"))
        .and_then(Value::as_str)
}

/// A typed record stored in a collection.
///
/// Implementors are ordinary `serde` structs whose serialized keys match the
/// storage keys declared by [`Entity::schema`]. The schema is built once and
/// shared for the lifetime of the process.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Static schema descriptor for this record type.
    fn schema() -> &'static EntitySchema;

    /// The record id, if assigned.
    fn entity_id(&self) -> Option<&str>;

    /// Assign the record id.
    fn set_entity_id(&mut self, id: RecordId);

    /// Name of the collection this type is stored in.
    fn collection_name() -> &'static str {
        Self::schema().name()
    }

    /// Serialize into a document.
    fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(Error::InvalidPayload(
                "entity must serialize to an object".into(),
            )),
            Err(e) => Err(Error::InvalidPayload(e.to_string())),
        }
    }

    /// Deserialize from a document.
    fn from_document(document: Document) -> Result<Self> {
        serde_json::from_value(Value::Object(document))
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}
