//! Contract between the store coordinator and its storage tiers.

pub mod memory;

use thiserror::Error;

use crate::{key::KeyPolicy, value::StoreValue};

/// Errors produced by storage tier implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Encryption key material could not be loaded or created.
    #[error("key provider failure: {reason}")]
    KeyProvider { reason: String },
    /// Stored bytes could not be decoded or decrypted.
    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
    /// Remote synchronization failed.
    #[error("remote failure: {reason}")]
    Remote { reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StorageError {
    pub fn storage(err: impl ToString) -> Self {
        StorageError::Storage {
            reason: err.to_string(),
        }
    }
}

/// One physical storage medium addressed by canonical key names.
///
/// Calls may block on I/O. Implementations must tolerate concurrent calls for
/// distinct keys; the coordinator serializes writes to a single observed key.
pub trait Storage: Send + Sync {
    /// Store `value` under `key`. `None` removes the entry.
    fn set(&self, key: &str, value: Option<StoreValue>, policy: &KeyPolicy)
        -> Result<(), StorageError>;

    /// Read the value stored under `key`, `None` when absent.
    fn get(&self, key: &str, policy: &KeyPolicy) -> Result<Option<StoreValue>, StorageError>;

    /// Delete every entry held by this tier.
    fn destroy(&self) -> Result<(), StorageError>;

    /// Persist buffered changes now. Tiers without buffering keep the default.
    fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
