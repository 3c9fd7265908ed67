//! HTTP transport.
//!
//! Requests and responses are plain values so they can be captured as
//! pending operations, replayed, and scripted in tests. [`HttpClient`] is the
//! transport seam; [`ReqwestClient`] is the production implementation.

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
};
use async_trait::async_trait;
use harbor_engine::{Method, PendingOperation, RecordId, REQUEST_ID_HEADER};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// JSON body with its content type.
    pub fn json(mut self, body: &serde_json::Value) -> Self {
        self.body = Some(body.to_string().into_bytes());
        self.header("Content-Type", "application/json")
    }

    pub fn bytes(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Header value, matched case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request id of a mutating request.
    pub fn request_id(&self) -> Option<&str> {
        self.header_value(REQUEST_ID_HEADER)
    }

    /// Capture this request for later replay.
    pub fn to_pending(
        &self,
        collection: &str,
        object_id: Option<RecordId>,
        timestamp: i64,
    ) -> Result<PendingOperation> {
        let request_id = self
            .request_id()
            .ok_or_else(|| Error::InvalidResponse("request has no request id".into()))?;
        let body = match &self.body {
            Some(bytes) => Some(
                String::from_utf8(bytes.clone())
                    .map_err(|_| Error::InvalidResponse("request body is not UTF-8".into()))?,
            ),
            None => None,
        };
        Ok(PendingOperation {
            request_id: request_id.to_string(),
            sequence: 0,
            timestamp,
            collection_name: collection.to_string(),
            object_id,
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
        })
    }

    /// Rebuild a captured request.
    pub fn from_pending(operation: &PendingOperation) -> Self {
        Self {
            method: operation.method,
            url: operation.url.clone(),
            headers: operation.headers.clone(),
            body: operation.body.as_ref().map(|b| b.clone().into_bytes()),
        }
    }
}

/// A response; header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_json(mut self, body: &serde_json::Value) -> Self {
        self.body = body.to_string().into_bytes();
        self.with_header("content-type", "application/json")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::InvalidResponse(format!("malformed JSON body: {e}")))
    }

    /// Fail with [`Error::Remote`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Remote {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

/// Transport seam.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request. Non-2xx statuses are responses, not errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Execute a request, abandoning it when `cancel` fires.
pub async fn send(
    client: &dyn HttpClient,
    request: HttpRequest,
    cancel: &CancelToken,
) -> Result<HttpResponse> {
    if cancel.is_cancelled() {
        return Err(Error::RequestCancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::RequestCancelled),
        response = client.execute(request) => response,
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Client that follows redirects, except `308` which the upload
    /// service uses for "resume incomplete".
    pub fn new() -> Result<Self> {
        let policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.status() == reqwest::StatusCode::PERMANENT_REDIRECT {
                attempt.stop()
            } else if attempt.previous().len() >= 10 {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        });
        let inner = reqwest::Client::builder().redirect(policy).build()?;
        Ok(Self { inner })
    }

    pub fn with_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.inner.request(method, &request.url);
        for (name, value) in &request.headers {
            // reqwest derives the length from the body
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        } else if request.method == Method::Put || request.method == Method::Post {
            builder = builder.body(Vec::new());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
