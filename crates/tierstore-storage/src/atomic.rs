use std::{io::Write, path::Path};

use tempfile::NamedTempFile;
use tierstore_core::StorageError;

/// Replace `path` with `bytes` via a temp file in the same directory, so
/// readers never observe a half-written file.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| StorageError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    std::fs::create_dir_all(parent).map_err(StorageError::storage)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StorageError::storage)?;
    tmp.write_all(bytes).map_err(StorageError::storage)?;
    tmp.flush().map_err(StorageError::storage)?;
    tmp.persist(path).map_err(|e| StorageError::storage(e.error))?;
    Ok(())
}
