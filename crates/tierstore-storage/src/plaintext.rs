use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tierstore_core::{KeyPolicy, Storage, StorageError, StoreValue};
use tracing::{debug, instrument, warn};

use crate::atomic::write_atomically;

/// Plaintext tier backed by a single JSON document.
///
/// Writes land in an in-memory copy and reach disk on [`Storage::sync`]
/// (requested per write by `sync_now` keys), on `destroy`, and on drop.
pub struct PlaintextFileStorage {
    path: PathBuf,
    state: Mutex<Document>,
}

#[derive(Default)]
struct Document {
    entries: BTreeMap<String, StoreValue>,
    loaded: bool,
    dirty: bool,
}

impl PlaintextFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(Document::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locked document, loaded from disk on first use.
    fn document(&self) -> Result<MutexGuard<'_, Document>, StorageError> {
        let mut doc = self.state.lock().map_err(|err| StorageError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        if !doc.loaded {
            doc.entries = load_entries(&self.path)?;
            doc.loaded = true;
        }
        Ok(doc)
    }

    fn flush(&self, doc: &mut Document) -> Result<(), StorageError> {
        if !doc.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&doc.entries).map_err(StorageError::storage)?;
        write_atomically(&self.path, &json)?;
        doc.dirty = false;
        debug!(path = %self.path.display(), entries = doc.entries.len(), "plaintext store flushed");
        Ok(())
    }
}

impl Storage for PlaintextFileStorage {
    fn set(
        &self,
        key: &str,
        value: Option<StoreValue>,
        _policy: &KeyPolicy,
    ) -> Result<(), StorageError> {
        let mut doc = self.document()?;
        let changed = match value {
            Some(value) => doc.entries.insert(key.to_string(), value.clone()) != Some(value),
            None => doc.entries.remove(key).is_some(),
        };
        doc.dirty |= changed;
        Ok(())
    }

    fn get(&self, key: &str, _policy: &KeyPolicy) -> Result<Option<StoreValue>, StorageError> {
        Ok(self.document()?.entries.get(key).cloned())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn destroy(&self) -> Result<(), StorageError> {
        let mut doc = self.document()?;
        doc.entries.clear();
        doc.dirty = false;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::storage(err)),
        }
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn sync(&self) -> Result<(), StorageError> {
        let mut doc = self.document()?;
        self.flush(&mut doc)
    }
}

impl Drop for PlaintextFileStorage {
    fn drop(&mut self) {
        let Ok(doc) = self.state.get_mut() else {
            return;
        };
        if !doc.dirty {
            return;
        }
        let mut doc = std::mem::take(doc);
        if let Err(err) = self.flush(&mut doc) {
            warn!(path = %self.path.display(), error = %err, "dropping unsaved plaintext entries");
        }
    }
}

/// A missing file is an empty store. An unreadable document is replaced by an
/// empty one on the next flush.
fn load_entries(path: &Path) -> Result<BTreeMap<String, StoreValue>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(StorageError::storage(err)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_slice(&bytes) {
        Ok(entries) => Ok(entries),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid plaintext store, starting empty");
            Ok(BTreeMap::new())
        }
    }
}
