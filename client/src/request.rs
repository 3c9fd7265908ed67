//! Request construction for the remote service.
//!
//! Record endpoints live under `/appdata/<app key>/<collection>` and blob
//! endpoints under `/blob/<app key>`. Every mutating request carries a fresh
//! `X-Kinvey-Request-Id`, which becomes the pending operation's request id
//! when the request is queued.

use crate::{
    config::ConfigError,
    error::{Error, Result},
    file::File,
    http::HttpRequest,
};
use harbor_engine::{document_id, Document, Method, RemoteQuery, REQUEST_ID_HEADER};
use reqwest::Url;
use serde_json::Value;

/// Builds requests for record and blob operations.
pub trait RequestFactory: Send + Sync {
    /// `POST` for a document without an id, `PUT` otherwise.
    fn build_save(&self, collection: &str, document: &Document) -> Result<HttpRequest>;
    fn build_remove_by_id(&self, collection: &str, id: &str) -> Result<HttpRequest>;
    fn build_remove_by_query(&self, collection: &str, query: &RemoteQuery) -> Result<HttpRequest>;
    fn build_find_by_id(&self, collection: &str, id: &str) -> Result<HttpRequest>;
    fn build_find_by_query(&self, collection: &str, query: &RemoteQuery) -> Result<HttpRequest>;
    /// Create or update blob metadata and obtain an upload URL.
    fn build_upload(&self, file: &File) -> Result<HttpRequest>;
    /// Fetch blob metadata with a fresh signed download URL.
    fn build_download(&self, file_id: &str) -> Result<HttpRequest>;
    fn build_delete_blob(&self, file_id: &str) -> Result<HttpRequest>;
    fn build_query_blob(&self, query: &RemoteQuery) -> Result<HttpRequest>;
}

/// Default [`RequestFactory`] for the hosted service.
#[derive(Debug, Clone)]
pub struct HttpRequestFactory {
    base_url: Url,
    app_key: String,
}

impl HttpRequestFactory {
    pub fn new(base_url: &str, app_key: impl Into<String>) -> std::result::Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            base_url,
            app_key: app_key.into(),
        })
    }

    fn url(&self, segments: &[&str], params: &[(&str, String)]) -> Result<String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidResponse(format!("base URL {} has no path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url.into())
    }

    fn appdata_url(&self, collection: &str, id: Option<&str>, query: Option<&RemoteQuery>) -> Result<String> {
        let mut segments = vec!["appdata", self.app_key.as_str(), collection];
        if let Some(id) = id {
            segments.push(id);
        }
        let params = query.map(RemoteQuery::to_query_pairs).unwrap_or_default();
        self.url(&segments, &params)
    }

    fn blob_url(&self, id: Option<&str>, params: &[(&str, String)]) -> Result<String> {
        let mut segments = vec!["blob", self.app_key.as_str()];
        if let Some(id) = id {
            segments.push(id);
        }
        self.url(&segments, params)
    }
}

/// A new request tagged with a unique request id.
fn mutating(method: Method, url: String) -> HttpRequest {
    HttpRequest::new(method, url).header(REQUEST_ID_HEADER, new_request_id())
}

/// Fresh request id.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl RequestFactory for HttpRequestFactory {
    fn build_save(&self, collection: &str, document: &Document) -> Result<HttpRequest> {
        let body = Value::Object(document.clone());
        let request = match document_id(document) {
            Some(id) => mutating(Method::Put, self.appdata_url(collection, Some(id), None)?),
            None => mutating(Method::Post, self.appdata_url(collection, None, None)?),
        };
        Ok(request.json(&body))
    }

    fn build_remove_by_id(&self, collection: &str, id: &str) -> Result<HttpRequest> {
        Ok(mutating(
            Method::Delete,
            self.appdata_url(collection, Some(id), None)?,
        ))
    }

    fn build_remove_by_query(&self, collection: &str, query: &RemoteQuery) -> Result<HttpRequest> {
        Ok(mutating(
            Method::Delete,
            self.appdata_url(collection, None, Some(query))?,
        ))
    }

    fn build_find_by_id(&self, collection: &str, id: &str) -> Result<HttpRequest> {
        Ok(HttpRequest::new(
            Method::Get,
            self.appdata_url(collection, Some(id), None)?,
        ))
    }

    fn build_find_by_query(&self, collection: &str, query: &RemoteQuery) -> Result<HttpRequest> {
        Ok(HttpRequest::new(
            Method::Get,
            self.appdata_url(collection, None, Some(query))?,
        ))
    }

    fn build_upload(&self, file: &File) -> Result<HttpRequest> {
        let tls = [("tls", "true".to_string())];
        let request = match &file.id {
            Some(id) => mutating(Method::Put, self.blob_url(Some(id), &tls)?),
            None => mutating(Method::Post, self.blob_url(None, &tls)?),
        };
        let content_type = file
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(request
            .json(&file.metadata_body())
            .header("X-Kinvey-Content-Type", content_type))
    }

    fn build_download(&self, file_id: &str) -> Result<HttpRequest> {
        Ok(HttpRequest::new(
            Method::Get,
            self.blob_url(Some(file_id), &[("tls", "true".to_string())])?,
        ))
    }

    fn build_delete_blob(&self, file_id: &str) -> Result<HttpRequest> {
        Ok(mutating(Method::Delete, self.blob_url(Some(file_id), &[])?))
    }

    fn build_query_blob(&self, query: &RemoteQuery) -> Result<HttpRequest> {
        let mut params = query.to_query_pairs();
        params.push(("tls", "true".to_string()));
        Ok(HttpRequest::new(Method::Get, self.blob_url(None, &params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_engine::{Predicate, Query};
    use serde_json::json;

    fn factory() -> HttpRequestFactory {
        HttpRequestFactory::new("https://baas.example.com", "kid_app").unwrap()
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn save_without_id_posts_to_collection() {
        let request = factory()
            .build_save("books", &doc(json!({"title": "Dune"})))
            .unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://baas.example.com/appdata/kid_app/books");
        assert!(request.request_id().is_some());
        assert_eq!(request.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn save_with_id_puts_to_record() {
        let request = factory()
            .build_save("books", &doc(json!({"_id": "a b", "title": "Dune"})))
            .unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url, "https://baas.example.com/appdata/kid_app/books/a%20b");
    }

    #[test]
    fn request_ids_are_unique() {
        let f = factory();
        let a = f.build_remove_by_id("books", "a").unwrap();
        let b = f.build_remove_by_id("books", "a").unwrap();
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn reads_carry_no_request_id() {
        let request = factory().build_find_by_id("books", "a").unwrap();
        assert_eq!(request.method, Method::Get);
        assert!(request.request_id().is_none());
    }

    #[test]
    fn query_is_encoded_as_parameters() {
        let remote = Query::filter(Predicate::eq("title", "Dune"))
            .limit(5)
            .to_remote(None)
            .unwrap();
        let request = factory().build_remove_by_query("books", &remote).unwrap();
        let url = Url::parse(&request.url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), r#"{"title":"Dune"}"#.to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn blob_requests() {
        let f = factory();
        let upload = f.build_upload(&File::new().with_file_name("a.txt")).unwrap();
        assert_eq!(upload.method, Method::Post);
        assert_eq!(upload.url, "https://baas.example.com/blob/kid_app?tls=true");
        assert_eq!(
            upload.header_value("X-Kinvey-Content-Type"),
            Some("application/octet-stream")
        );

        let update = f.build_upload(&File::new().with_id("f1")).unwrap();
        assert_eq!(update.method, Method::Put);
        assert_eq!(update.url, "https://baas.example.com/blob/kid_app/f1?tls=true");

        let delete = f.build_delete_blob("f1").unwrap();
        assert_eq!(delete.method, Method::Delete);
        assert!(delete.request_id().is_some());
    }

    #[test]
    fn base_url_with_path_prefix() {
        let f = HttpRequestFactory::new("http://localhost:9000/api/", "k").unwrap();
        let request = f.build_find_by_id("books", "a").unwrap();
        assert_eq!(request.url, "http://localhost:9000/api/appdata/k/books/a");
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpRequestFactory::new("not a url", "k"),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }
}
