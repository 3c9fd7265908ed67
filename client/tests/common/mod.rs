//! Shared fixtures for client integration tests: a scripted transport, two
//! record types and a client wired to them.

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_client::{Client, Config, Error, HttpClient, HttpRequest, HttpResponse, Result};
use harbor_engine::{
    Entity, EntitySchema, FieldDef, FieldKind, Metadata, Method, RecordId, ScalarKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;

pub const SERVER_LMT: &str = "2024-03-01T10:00:00.000Z";

/// What the scripted transport does with a request.
pub enum Reply {
    Now(HttpResponse),
    /// Transport failure, as when the device is offline
    Fail,
    /// Never completes
    Hang,
}

type Responder = dyn Fn(&HttpRequest) -> Reply + Send + Sync;

/// Transport that answers from a closure and records every request.
pub struct MockHttp {
    responder: Box<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new(responder: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request fails at the transport level.
    pub fn offline() -> Arc<Self> {
        Self::new(|_| Reply::Fail)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let reply = (self.responder)(&request);
        self.requests.lock().unwrap().push(request);
        match reply {
            Reply::Now(response) => Ok(response),
            Reply::Fail => Err(Error::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "offline",
            ))),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Answer a save by echoing its body with server metadata added; removals
/// report one record removed and reads return an empty list.
pub fn echo_backend(request: &HttpRequest) -> Reply {
    match request.method {
        Method::Put | Method::Post => Reply::Now(
            HttpResponse::new(if request.method == Method::Post { 201 } else { 200 })
                .with_json(&Value::Object(echo_document(request))),
        ),
        Method::Delete => Reply::Now(HttpResponse::new(200).with_json(&json!({"count": 1}))),
        Method::Get => Reply::Now(HttpResponse::new(200).with_json(&json!([]))),
    }
}

/// Request body with `_kmd.lmt` set, and an `_id` assigned when missing.
pub fn echo_document(request: &HttpRequest) -> serde_json::Map<String, Value> {
    let body = request.body.as_deref().unwrap_or(b"{}");
    let mut document: serde_json::Map<String, Value> =
        serde_json::from_slice(body).unwrap_or_default();
    document
        .entry("_id")
        .or_insert_with(|| json!("server-assigned"));
    document.insert("_kmd".into(), json!({ "lmt": SERVER_LMT, "ect": SERVER_LMT }));
    document
}

/// A book as the server returns it.
pub fn server_book(id: &str, title: &str, lmt: &str) -> Value {
    json!({
        "_id": id,
        "title": title,
        "tags": [],
        "_kmd": { "lmt": lmt, "ect": lmt }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_kmd", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Book {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            metadata: None,
            title: title.to_string(),
            tags: vec![],
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn lmt(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.lmt.as_deref())
    }
}

impl Entity for Book {
    fn schema() -> &'static EntitySchema {
        static SCHEMA: OnceLock<EntitySchema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            EntitySchema::new(
                "books",
                vec![
                    FieldDef::required("title", FieldKind::Scalar(ScalarKind::String)),
                    FieldDef::optional("tags", FieldKind::WrappedList(ScalarKind::String)),
                ],
            )
        })
    }

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_entity_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Author {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
        }
    }
}

impl Entity for Author {
    fn schema() -> &'static EntitySchema {
        static SCHEMA: OnceLock<EntitySchema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            EntitySchema::new(
                "authors",
                vec![FieldDef::required("name", FieldKind::Scalar(ScalarKind::String))],
            )
        })
    }

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_entity_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    Config::new("kid_test")
        .with_base_url("https://backend.test")
        .with_auth_token("token")
        .with_store_path(dir.path().join("store.json"))
        .with_files_dir(dir.path().join("files"))
}

/// In-memory client over `http`. Keep the directory alive for the test.
pub fn client_with(http: Arc<MockHttp>) -> (Client, TempDir) {
    let dir = TempDir::new().unwrap();
    let client = Client::builder(test_config(&dir))
        .register::<Book>()
        .register::<Author>()
        .in_memory()
        .http_client(http)
        .build()
        .unwrap();
    (client, dir)
}
