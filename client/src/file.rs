//! Blob file records.

use chrono::{DateTime, Utc};
use harbor_engine::{parse_timestamp, Acl, Metadata, RecordId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::{collections::BTreeMap, path::PathBuf};

/// A blob and its server-side metadata.
///
/// `download_url` and `expires_at` form a signed-URL capability that is only
/// usable until `expires_at`. `local_path` and `etag` describe the on-device
/// copy and are never sent to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,

    #[serde(rename = "_filename", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(rename = "_public", default)]
    pub public: bool,

    #[serde(rename = "_acl", default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,

    #[serde(rename = "_kmd", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(rename = "_uploadURL", default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    #[serde(rename = "_downloadURL", default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Headers the signed upload URL requires
    #[serde(
        rename = "_requiredHeaders",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub upload_headers: BTreeMap<String, String>,

    #[serde(rename = "_expiresAt", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "size_from_number_or_string"
    )]
    pub size: Option<u64>,

    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip)]
    pub local_path: Option<PathBuf>,

    #[serde(skip)]
    pub etag: Option<String>,
}

impl File {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Parsed expiry of the signed download URL.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires_at.as_deref().and_then(parse_timestamp)
    }

    /// Whether `download_url` can still be used at `now`.
    ///
    /// A URL without a parseable expiry is treated as expired.
    pub fn has_valid_download_url(&self, now: DateTime<Utc>) -> bool {
        self.download_url.is_some() && self.expires().is_some_and(|expires| expires > now)
    }

    /// Body of the create-or-update metadata request.
    pub fn metadata_body(&self) -> Value {
        let mut body = json!({ "_public": self.public });
        if let Some(id) = &self.id {
            body["_id"] = json!(id);
        }
        if let Some(name) = &self.file_name {
            body["_filename"] = json!(name);
        }
        if let Some(size) = self.size {
            body["size"] = json!(size.to_string());
        }
        if let Some(mime_type) = &self.mime_type {
            body["mimeType"] = json!(mime_type);
        }
        body
    }

    /// Merge a server response into this file.
    ///
    /// Fields the response leaves out keep their current values; the local
    /// cache fields are never touched.
    pub fn apply_remote(&mut self, remote: File) {
        if remote.id.is_some() {
            self.id = remote.id;
        }
        if remote.file_name.is_some() {
            self.file_name = remote.file_name;
        }
        self.public = remote.public;
        if remote.acl.is_some() {
            self.acl = remote.acl;
        }
        if remote.metadata.is_some() {
            self.metadata = remote.metadata;
        }
        if remote.upload_url.is_some() {
            self.upload_url = remote.upload_url;
        }
        if remote.download_url.is_some() {
            self.download_url = remote.download_url;
        }
        if !remote.upload_headers.is_empty() {
            self.upload_headers = remote.upload_headers;
        }
        if remote.expires_at.is_some() {
            self.expires_at = remote.expires_at;
        }
        if remote.size.is_some() {
            self.size = remote.size;
        }
        if remote.mime_type.is_some() {
            self.mime_type = remote.mime_type;
        }
    }
}

fn size_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("size must be a non-negative integer")),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid size: {s}"))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid size: {other}"))),
    }
}
