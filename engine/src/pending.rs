//! Pending operations: captured outbound mutations awaiting replay.

use crate::{CollectionName, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the request id of every mutating request.
pub const REQUEST_ID_HEADER: &str = "X-Kinvey-Request-Id";

/// HTTP method of a captured request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exact, replayable capture of one outbound mutation.
///
/// Credentials are never captured; they are attached when the request is
/// replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Unique id, also sent as [`REQUEST_ID_HEADER`]
    pub request_id: String,
    /// Enqueue order, assigned by the store
    #[serde(default)]
    pub sequence: u64,
    /// Capture time (milliseconds since epoch)
    pub timestamp: i64,
    pub collection_name: CollectionName,
    /// Affected record, when the mutation targets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RecordId>,
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl PendingOperation {
    /// Capture a request.
    ///
    /// The request id header is set from `request_id`.
    pub fn new(
        request_id: impl Into<String>,
        collection_name: impl Into<CollectionName>,
        method: Method,
        url: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let request_id = request_id.into();
        let mut headers = BTreeMap::new();
        headers.insert(REQUEST_ID_HEADER.to_string(), request_id.clone());
        Self {
            request_id,
            sequence: 0,
            timestamp,
            collection_name: collection_name.into(),
            object_id: None,
            method,
            url: url.into(),
            headers,
            body: None,
        }
    }

    pub fn with_object_id(mut self, object_id: impl Into<RecordId>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}
