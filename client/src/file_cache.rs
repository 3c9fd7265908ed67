//! On-device cache of downloaded blobs.
//!
//! Blob bytes live in one directory, one file per blob id, next to an
//! `index.json` mapping ids to their local path and ETag. An entry whose
//! file has disappeared is dropped the next time it is read.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};
use tracing::debug;

const INDEX_FILE: &str = "index.json";

/// A cached blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub size: u64,
}

/// Blob cache rooted at a directory.
pub struct FileCache {
    dir: PathBuf,
    index: Mutex<BTreeMap<String, CacheEntry>>,
}

impl FileCache {
    /// Open the cache, creating the directory when needed.
    ///
    /// An unreadable index starts the cache empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index = std::fs::read_to_string(dir.join(INDEX_FILE))
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the bytes of `id` are stored at.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(file_name_for(id))
    }

    /// Cache entry for `id`, if its file still exists.
    pub async fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        let mut index = self.index.lock().await;
        let Some(entry) = index.get(id).cloned() else {
            return Ok(None);
        };
        if fs::try_exists(&entry.local_path).await? {
            return Ok(Some(entry));
        }
        index.remove(id);
        self.persist(&index).await?;
        debug!(id, path = %entry.local_path.display(), "Cached file missing, entry dropped");
        Ok(None)
    }

    /// Store the bytes of `id`, replacing any previous copy.
    pub async fn store(&self, id: &str, bytes: &[u8], etag: Option<String>) -> Result<CacheEntry> {
        let path = self.path_for(id);
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;

        let entry = CacheEntry {
            local_path: path,
            etag,
            size: bytes.len() as u64,
        };
        let mut index = self.index.lock().await;
        index.insert(id.to_string(), entry.clone());
        self.persist(&index).await?;
        debug!(id, size = entry.size, "Cached file stored");
        Ok(entry)
    }

    /// Drop the entry and bytes of `id`. Returns whether an entry existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut index = self.index.lock().await;
        let Some(entry) = index.remove(id) else {
            return Ok(false);
        };
        remove_file_if_present(&entry.local_path).await?;
        self.persist(&index).await?;
        Ok(true)
    }

    /// Drop every entry and its bytes. Returns the number of entries.
    pub async fn clear(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        let count = index.len();
        for entry in index.values() {
            remove_file_if_present(&entry.local_path).await?;
        }
        index.clear();
        self.persist(&index).await?;
        Ok(count)
    }

    async fn persist(&self, index: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(index)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn remove_file_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// File name for a blob id; characters unsafe in paths become `_`.
fn file_name_for(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    format!("blob-{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_path_safe() {
        assert_eq!(file_name_for("abc-123"), "blob-abc-123");
        assert_eq!(file_name_for("../etc/passwd"), "blob-___etc_passwd");
    }

    #[tokio::test]
    async fn store_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path().join("files")).unwrap();

        let entry = cache.store("f1", b"hello", Some("\"v1\"".into())).await.unwrap();
        assert_eq!(fs::read(&entry.local_path).await.unwrap(), b"hello");
        assert_eq!(cache.get("f1").await.unwrap(), Some(entry.clone()));

        let replaced = cache.store("f1", b"bye", None).await.unwrap();
        assert_eq!(replaced.size, 3);
        assert_eq!(fs::read(&replaced.local_path).await.unwrap(), b"bye");

        assert!(cache.remove("f1").await.unwrap());
        assert!(!cache.remove("f1").await.unwrap());
        assert!(!entry.local_path.exists());
    }

    #[tokio::test]
    async fn missing_file_invalidates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let entry = cache.store("f1", b"data", None).await.unwrap();

        std::fs::remove_file(&entry.local_path).unwrap();
        assert_eq!(cache.get("f1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FileCache::open(dir.path()).unwrap();
            cache.store("f1", b"a", Some("e1".into())).await.unwrap();
            cache.store("f2", b"b", None).await.unwrap();
        }
        let cache = FileCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("f1").await.unwrap().unwrap().etag.as_deref(), Some("e1"));
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.get("f2").await.unwrap().is_none());
    }
}
