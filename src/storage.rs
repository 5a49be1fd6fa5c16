//! Persisted comment store: one JSON snapshot file per source.
//!
//! The snapshot maps item ids to their ordered comment history. It is loaded
//! once at the start of a run, mutated in memory, and written back with an
//! atomic replace.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Comment, ItemId};

/// Errors from reading or writing the store file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// In-memory mapping from item id to comment history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentStore {
    items: BTreeMap<ItemId, Vec<Comment>>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored comments for an item, empty if the item was never seen.
    pub fn comments(&self, id: &ItemId) -> &[Comment] {
        self.items.get(id).map(|c| c.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Replace an item's history. Empty histories are not recorded.
    pub fn update(&mut self, id: ItemId, comments: Vec<Comment>) {
        if comments.is_empty() {
            return;
        }
        self.items.insert(id, comments);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Vec<Comment>)> {
        self.items.iter()
    }

    /// Serialize to the on-disk JSON form, keys in item order.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(&self.items)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let items: BTreeMap<ItemId, Vec<Comment>> = serde_json::from_slice(bytes)?;
        Ok(Self { items })
    }
}

/// Location of a store snapshot on disk.
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base file name, used to name backup artifacts.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database.json".to_string())
    }

    /// Load the snapshot.
    ///
    /// A missing file yields an empty store. A file that cannot be parsed is
    /// moved aside to `<name>.corrupt-<unix-ts>` and also yields an empty store,
    /// so the unreadable bytes are never overwritten by the next save.
    pub fn load(&self) -> Result<CommentStore, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store at {:?}, starting empty", self.path);
                return Ok(CommentStore::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        match CommentStore::from_json_bytes(&bytes) {
            Ok(store) => {
                info!("Loaded {} items from {:?}", store.len(), self.path);
                Ok(store)
            }
            Err(e) => {
                let aside = self.corrupt_path();
                warn!(
                    "Store {:?} is unreadable ({}), moving it to {:?}",
                    self.path, e, aside
                );
                std::fs::rename(&self.path, &aside).map_err(|e| StoreError::io(&self.path, e))?;
                Ok(CommentStore::new())
            }
        }
    }

    /// Atomically replace the snapshot: write a sibling temp file, then rename.
    pub fn save(&self, store: &CommentStore) -> Result<(), StoreError> {
        let bytes = store.to_json_bytes()?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        info!("Saved {} items to {:?}", store.len(), self.path);
        Ok(())
    }

    fn corrupt_path(&self) -> PathBuf {
        let ts = chrono::Utc::now().timestamp();
        let mut name = self.file_name();
        name.push_str(&format!(".corrupt-{}", ts));
        self.path.with_file_name(name)
    }
}
