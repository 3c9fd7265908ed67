//! Resumable blob upload.
//!
//! # Protocol
//!
//! 1. **Metadata**: `POST` (new) or `PUT` (existing) the file record; the
//!    response carries the signed upload URL and its required headers
//! 2. **Probe** (files that already had an id): zero-byte `PUT` with
//!    `Content-Range: bytes */<total>`. `2xx` means the bytes are all there;
//!    `308` with `Range: bytes=<start>-<end>` means resume at `end + 1`;
//!    `308` without `Range` means start over
//! 3. **Upload**: `PUT` the remaining bytes, with
//!    `Content-Range: bytes <start>-<total - 1>/<total>` when resuming
//! 4. **Refresh**: fetch the record again for a current download URL
//!
//! A failure at any step ends the upload; the error comes back with the
//! file as far as it got, so the caller can retry and resume.

use crate::{
    cancel::CancelToken,
    datastore::response_document,
    error::{Error, Result},
    file::File,
    file_store::FileStore,
    http::HttpRequest,
};
use harbor_engine::Method;
use serde_json::Value;
use tracing::{debug, info};

/// Status the upload service uses for "resume incomplete".
pub const RESUME_INCOMPLETE: u16 = 308;

/// A failed upload and the file state it reached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upload failed: {error}")]
pub struct UploadFailure {
    pub file: File,
    #[source]
    pub error: Error,
}

/// Parse a `Range: bytes=<start>-<end>` header.
pub fn parse_range_header(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    (start <= end).then_some((start, end))
}

enum Probe {
    Complete,
    ResumeAt(u64),
}

impl FileStore {
    /// Upload `data` as the content of `file`.
    ///
    /// A file that already has an id is probed first, and only the bytes
    /// the upload service has not received are sent.
    pub async fn upload(
        &self,
        mut file: File,
        data: &[u8],
        cancel: &CancelToken,
    ) -> std::result::Result<File, UploadFailure> {
        file.size = Some(data.len() as u64);
        match self.run_upload(&mut file, data, cancel).await {
            Ok(()) => {
                info!(id = ?file.id, size = data.len(), "Upload finished");
                Ok(file)
            }
            Err(error) => Err(UploadFailure { file, error }),
        }
    }

    async fn run_upload(&self, file: &mut File, data: &[u8], cancel: &CancelToken) -> Result<()> {
        let resuming = file.id.is_some();
        self.create_or_update_metadata(file, cancel).await?;

        let start = if resuming {
            match self.probe(file, data.len() as u64, cancel).await? {
                Probe::Complete => None,
                Probe::ResumeAt(start) => Some(start),
            }
        } else {
            Some(0)
        };

        if let Some(start) = start {
            self.upload_bytes(file, data, start, cancel).await?;
        }

        let refreshed = self.fetch_metadata(file, cancel).await?;
        file.apply_remote(refreshed);
        Ok(())
    }

    async fn create_or_update_metadata(&self, file: &mut File, cancel: &CancelToken) -> Result<()> {
        let request = self.factory().build_upload(file)?;
        let response = self.network().send_authorized(request, cancel).await?;
        let document = response_document(response)?;
        let remote: File = serde_json::from_value(Value::Object(document))?;
        file.apply_remote(remote);
        if file.upload_url.is_none() {
            return Err(Error::InvalidResponse(
                "file metadata response has no upload URL".into(),
            ));
        }
        debug!(id = ?file.id, "Upload metadata stored");
        Ok(())
    }

    fn upload_request(file: &File) -> Result<HttpRequest> {
        let url = file
            .upload_url
            .clone()
            .ok_or_else(|| Error::InvalidResponse("file has no upload URL".into()))?;
        let mut request = HttpRequest::new(Method::Put, url);
        for (name, value) in &file.upload_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request)
    }

    async fn probe(&self, file: &File, total: u64, cancel: &CancelToken) -> Result<Probe> {
        let request = Self::upload_request(file)?
            .header("Content-Length", "0")
            .header("Content-Range", format!("bytes */{total}"))
            .bytes(Vec::new());
        let response = self.network().send_unauthenticated(request, cancel).await?;

        if response.is_success() {
            debug!(id = ?file.id, "Upload already complete");
            return Ok(Probe::Complete);
        }
        if response.status != RESUME_INCOMPLETE {
            return Err(Error::Remote {
                status: response.status,
                body: response.text(),
            });
        }
        match response.header("range") {
            None => Ok(Probe::ResumeAt(0)),
            Some(range) => {
                let (_, end) = parse_range_header(range).ok_or_else(|| {
                    Error::InvalidResponse(format!("malformed Range header: {range}"))
                })?;
                debug!(id = ?file.id, received = end + 1, total, "Resuming upload");
                Ok(Probe::ResumeAt(end + 1))
            }
        }
    }

    async fn upload_bytes(
        &self,
        file: &File,
        data: &[u8],
        start: u64,
        cancel: &CancelToken,
    ) -> Result<()> {
        let total = data.len() as u64;
        if start > total {
            return Err(Error::InvalidResponse(format!(
                "upload service reports {start} bytes received of {total}"
            )));
        }
        // An empty payload still needs one PUT to create the blob.
        if start == total && total > 0 {
            return Ok(());
        }

        let offset = usize::try_from(start)
            .map_err(|_| Error::InvalidResponse(format!("resume offset {start} out of range")))?;
        let mut request = Self::upload_request(file)?.bytes(data[offset..].to_vec());
        if start > 0 {
            request = request.header(
                "Content-Range",
                format!("bytes {start}-{}/{total}", total - 1),
            );
        }
        self.network()
            .send_unauthenticated(request, cancel)
            .await?
            .error_for_status()?;
        Ok(())
    }
}
