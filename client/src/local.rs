//! Durable local store.
//!
//! [`LocalStore`] owns an engine [`Store`] on a [`SerialExecutor`] worker and
//! persists a snapshot of it after every successful mutating job. Snapshots
//! are written to a temporary file and renamed over the previous one, so a
//! crash leaves either the old or the new state on disk.

use crate::{
    error::{Error, Result},
    executor::SerialExecutor,
};
use harbor_engine::{Schema, Store, StoreSnapshot};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// How [`LocalStore::open_or_reset`] obtained its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Existing snapshot loaded
    Opened,
    /// No snapshot on disk; started empty
    Created,
    /// Snapshot unreadable; moved aside and started empty
    Reset {
        /// Pending operations in the discarded snapshot, when countable
        discarded_pending: Option<usize>,
        /// Where the unreadable file was moved
        backup_path: PathBuf,
    },
}

struct DurableState {
    store: Store,
    path: Option<PathBuf>,
}

impl DurableState {
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = self.store.export_state().to_json()?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// The engine store behind a serial executor, optionally file-backed.
pub struct LocalStore {
    executor: SerialExecutor<DurableState>,
    schema: Schema,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Store kept only in memory.
    pub fn in_memory(schema: Schema) -> Result<Self> {
        Self::start(Store::new(schema), None)
    }

    /// Open the store at `path`, creating it when the file does not exist.
    ///
    /// An unreadable file, or one written with another schema version, is
    /// reported as [`Error::StoreUnavailable`] and left untouched.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref();
        let store = match load_snapshot(path)? {
            Some(snapshot) => {
                let mut store = Store::new(schema);
                store
                    .import_state(snapshot)
                    .map_err(|e| unavailable(path, e))?;
                store
            }
            None => Store::new(schema),
        };
        Self::start(store, Some(path.to_path_buf()))
    }

    /// Open an existing store using the schema recorded in its snapshot.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = load_snapshot(path)?
            .ok_or_else(|| Error::StoreUnavailable(format!("{} does not exist", path.display())))?;
        let store = Store::from_snapshot(snapshot).map_err(|e| unavailable(path, e))?;
        Self::start(store, Some(path.to_path_buf()))
    }

    /// Open the store at `path`, replacing an unreadable file with an empty
    /// store.
    ///
    /// The unreadable file is moved to `<path>.corrupt-<timestamp>`; pending
    /// operations it held are lost and their count is reported.
    pub fn open_or_reset(path: impl AsRef<Path>, schema: Schema) -> Result<(Self, OpenOutcome)> {
        let path = path.as_ref();
        let existed = path.exists();
        match Self::open(path, schema.clone()) {
            Ok(store) if existed => Ok((store, OpenOutcome::Opened)),
            Ok(store) => Ok((store, OpenOutcome::Created)),
            Err(Error::StoreUnavailable(reason)) => {
                let discarded_pending = count_pending(path);
                let backup_path = backup_path(path);
                fs::rename(path, &backup_path)?;
                warn!(
                    path = %path.display(),
                    backup = %backup_path.display(),
                    discarded_pending = ?discarded_pending,
                    %reason,
                    "Local store unreadable, starting empty"
                );
                let store = Self::open(path, schema)?;
                Ok((
                    store,
                    OpenOutcome::Reset {
                        discarded_pending,
                        backup_path,
                    },
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn start(store: Store, path: Option<PathBuf>) -> Result<Self> {
        let schema = store.schema().clone();
        let state = DurableState {
            store,
            path: path.clone(),
        };
        state.persist()?;
        let executor = SerialExecutor::spawn("harbor-store", state)?;
        debug!(path = ?path, "Local store started");
        Ok(Self {
            executor,
            schema,
            path,
        })
    }

    /// Schema the store was opened with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Snapshot file, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read-only job against the store.
    pub fn read<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Store) -> harbor_engine::error::Result<R> + Send + 'static,
    {
        self.executor
            .execute_and_wait(move |state| job(&state.store))?
            .map_err(Error::from)
    }

    /// Run a mutating job and persist the result.
    ///
    /// A failed job or a failed persist leaves the store as it was.
    pub fn write<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Store) -> harbor_engine::error::Result<R> + Send + 'static,
    {
        self.executor.execute_and_wait(move |state| {
            let previous = state.store.clone();
            let outcome = job(&mut state.store)
                .map_err(Error::from)
                .and_then(|value| state.persist().map(|()| value));
            if let Err(e) = &outcome {
                debug!(error = %e, "Store write failed, rolled back");
                state.store = previous;
            }
            outcome
        })?
    }
}

fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, e)),
    };
    StoreSnapshot::from_json(&json)
        .map(Some)
        .map_err(|e| unavailable(path, e))
}

fn unavailable(path: &Path, cause: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("{}: {}", path.display(), cause))
}

fn count_pending(path: &Path) -> Option<usize> {
    let json = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&json).ok()?;
    value.get("pending")?.as_array().map(Vec::len)
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{stamp}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_engine::{EntitySchema, FieldDef, FieldKind, Method, PendingOperation, ScalarKind};
    use serde_json::json;

    fn schema(version: u32) -> Schema {
        Schema::new(version).with_collection(EntitySchema::new(
            "books",
            vec![FieldDef::required("title", FieldKind::Scalar(ScalarKind::String))],
        ))
    }

    fn book(id: &str) -> harbor_engine::Document {
        json!({"_id": id, "title": "Dune"}).as_object().cloned().unwrap()
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = LocalStore::open(&path, schema(1)).unwrap();
        store.write(|s| s.save("books", book("a"))).unwrap();
        store
            .write(|s| {
                Ok(s.enqueue(PendingOperation::new("r1", "books", Method::Put, "u", 0)))
            })
            .unwrap();
        drop(store);

        let store = LocalStore::open(&path, schema(1)).unwrap();
        let found = store.read(|s| s.find_by_id("books", "a")).unwrap();
        assert!(found.is_some());
        assert_eq!(store.read(|s| Ok(s.pending_count(None))).unwrap(), 1);
    }

    #[test]
    fn failed_write_is_not_applied() {
        let store = LocalStore::in_memory(schema(1)).unwrap();
        let err = store
            .write(|s| s.save("books", json!({"_id": "a"}).as_object().cloned().unwrap()))
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(store.read(|s| s.find_all("books")).unwrap().len(), 0);
    }

    #[test]
    fn failed_job_undoes_earlier_steps() {
        let store = LocalStore::in_memory(schema(1)).unwrap();
        let result = store.write(|s| {
            s.save("books", book("a"))?;
            s.enqueue(PendingOperation::new("r1", "books", Method::Put, "u", 0));
            s.save("missing", book("b"))
        });
        assert!(result.is_err());
        assert!(store.read(|s| s.find_by_id("books", "a")).unwrap().is_none());
        assert_eq!(store.read(|s| Ok(s.pending_count(None))).unwrap(), 0);
    }

    #[test]
    fn failed_persist_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = LocalStore::open(&path, schema(1)).unwrap();
        store.write(|s| s.save("books", book("a"))).unwrap();

        fs::remove_dir_all(dir.path()).unwrap();
        let result = store.write(|s| s.save("books", book("b")));
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(store.read(|s| s.find_by_id("books", "b")).unwrap().is_none());
        assert!(store.read(|s| s.find_by_id("books", "a")).unwrap().is_some());
    }

    #[test]
    fn open_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{garbage").unwrap();

        let err = LocalStore::open(&path, schema(1)).err().unwrap();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{garbage");
    }

    #[test]
    fn open_reports_schema_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        drop(LocalStore::open(&path, schema(1)).unwrap());

        let err = LocalStore::open(&path, schema(2)).err().unwrap();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[test]
    fn open_or_reset_moves_bad_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        drop(LocalStore::open(&path, schema(1)).unwrap());
        let (_, outcome) = LocalStore::open_or_reset(&path, schema(1)).unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);

        // readable JSON written with another schema version
        let (store, outcome) = LocalStore::open_or_reset(&path, schema(2)).unwrap();
        let OpenOutcome::Reset {
            discarded_pending,
            backup_path,
        } = outcome
        else {
            panic!("expected reset");
        };
        assert_eq!(discarded_pending, Some(0));
        assert!(backup_path.exists());
        assert_eq!(store.schema().version, 2);
    }

    #[test]
    fn open_or_reset_creates_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.json");
        let (store, outcome) = LocalStore::open_or_reset(&path, schema(1)).unwrap();
        assert_eq!(outcome, OpenOutcome::Created);
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn open_existing_uses_recorded_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = LocalStore::open(&path, schema(3)).unwrap();
        store.write(|s| s.save("books", book("a"))).unwrap();
        drop(store);

        let store = LocalStore::open_existing(&path).unwrap();
        assert_eq!(store.schema().version, 3);
        assert_eq!(store.read(|s| s.find_all("books")).unwrap().len(), 1);

        let missing = LocalStore::open_existing(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(Error::StoreUnavailable(_))));
    }
}
