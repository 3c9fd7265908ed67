//! Blob storage: metadata, downloads and the local file cache.
//!
//! Uploads are implemented in [`crate::upload`].

use crate::{
    cancel::CancelToken,
    datastore::{response_count, response_document},
    error::{Error, Result},
    file::File,
    file_cache::{CacheEntry, FileCache},
    http::HttpRequest,
    net::Network,
    request::RequestFactory,
};
use chrono::Utc;
use harbor_engine::{Method, Query};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Options for [`FileStore::download`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Check a cached copy against the server (conditional request) instead
    /// of returning it directly
    pub validate_freshness: bool,
}

/// Blob operations against the remote service.
pub struct FileStore {
    network: Network,
    factory: Arc<dyn RequestFactory>,
    cache: FileCache,
}

impl FileStore {
    pub fn new(network: Network, factory: Arc<dyn RequestFactory>, cache: FileCache) -> Self {
        Self {
            network,
            factory,
            cache,
        }
    }

    pub(crate) fn network(&self) -> &Network {
        &self.network
    }

    pub(crate) fn factory(&self) -> &dyn RequestFactory {
        self.factory.as_ref()
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Fetch the file record, with a fresh download URL.
    pub(crate) async fn fetch_metadata(&self, file: &File, cancel: &CancelToken) -> Result<File> {
        let id = file.id.as_deref().ok_or(Error::ObjectIdMissing)?;
        let request = self.factory.build_download(id)?;
        let response = self.network.send_authorized(request, cancel).await?;
        let document = response_document(response)?;
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    /// Refresh a file's metadata and signed download URL.
    pub async fn refresh(&self, mut file: File, cancel: &CancelToken) -> Result<File> {
        let remote = self.fetch_metadata(&file, cancel).await?;
        file.apply_remote(remote);
        Ok(file)
    }

    /// Make sure `file` has a download URL that has not expired.
    async fn ensure_download_url(&self, file: &mut File, cancel: &CancelToken) -> Result<String> {
        if !file.has_valid_download_url(Utc::now()) {
            let remote = self.fetch_metadata(file, cancel).await?;
            file.apply_remote(remote);
        }
        match &file.download_url {
            Some(url) if file.has_valid_download_url(Utc::now()) => Ok(url.clone()),
            _ => Err(Error::InvalidResponse(
                "file has no valid download URL".into(),
            )),
        }
    }

    /// Download a file into the local cache.
    ///
    /// A cached copy is returned without network access unless
    /// `validate_freshness` is set, in which case the transfer is
    /// conditional on the cached ETag.
    pub async fn download(
        &self,
        mut file: File,
        options: DownloadOptions,
        cancel: &CancelToken,
    ) -> Result<File> {
        let id = file.id.clone().ok_or(Error::ObjectIdMissing)?;
        let cached = self.cache.get(&id).await?;
        if let Some(entry) = &cached {
            if !options.validate_freshness {
                debug!(%id, "Serving cached file");
                apply_entry(&mut file, entry);
                return Ok(file);
            }
        }

        let url = self.ensure_download_url(&mut file, cancel).await?;
        let mut request = HttpRequest::new(Method::Get, url);
        if let Some(etag) = cached.as_ref().and_then(|e| e.etag.as_deref()) {
            request = request.header("If-None-Match", etag);
        }
        let response = self.network.send_unauthenticated(request, cancel).await?;

        if response.status == 304 {
            let entry =
                cached.ok_or_else(|| Error::MissingCachedFile(self.cache.path_for(&id)))?;
            if !tokio::fs::try_exists(&entry.local_path).await? {
                return Err(Error::MissingCachedFile(entry.local_path));
            }
            debug!(%id, "Cached file not modified");
            apply_entry(&mut file, &entry);
            return Ok(file);
        }

        let response = response.error_for_status()?;
        let etag = response.header("etag").map(str::to_string);
        let entry = self.cache.store(&id, &response.body, etag).await?;
        apply_entry(&mut file, &entry);
        Ok(file)
    }

    /// Download a file's bytes without caching them.
    pub async fn download_bytes(&self, mut file: File, cancel: &CancelToken) -> Result<Vec<u8>> {
        let url = self.ensure_download_url(&mut file, cancel).await?;
        let response = self
            .network
            .send_unauthenticated(HttpRequest::new(Method::Get, url), cancel)
            .await?
            .error_for_status()?;
        Ok(response.body)
    }

    /// Delete a file on the server and drop its cached copy.
    pub async fn remove(&self, file: &File, cancel: &CancelToken) -> Result<usize> {
        let id = file.id.as_deref().ok_or(Error::ObjectIdMissing)?;
        let request = self.factory.build_delete_blob(id)?;
        let response = self
            .network
            .send_authorized(request, cancel)
            .await?
            .error_for_status()?;
        let count = response_count(&response)?;
        self.cache.remove(id).await?;
        Ok(count)
    }

    /// File records matching a query.
    pub async fn find(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<File>> {
        let remote = query.to_remote(None)?;
        let request = self.factory.build_query_blob(&remote)?;
        let response = self
            .network
            .send_authorized(request, cancel)
            .await?
            .error_for_status()?;
        response.json()
    }

    /// The cached copy of a file, if any.
    pub async fn cached_file(&self, id: &str) -> Result<Option<File>> {
        Ok(self.cache.get(id).await?.map(|entry| {
            let mut file = File::new().with_id(id);
            apply_entry(&mut file, &entry);
            file
        }))
    }

    /// Delete every cached file. Returns the number removed.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.cache.clear().await
    }
}

fn apply_entry(file: &mut File, entry: &CacheEntry) {
    file.local_path = Some(entry.local_path.clone());
    file.etag = entry.etag.clone();
    file.size = Some(entry.size);
}
