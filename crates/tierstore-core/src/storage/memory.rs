use std::{collections::HashMap, sync::Mutex};

use super::{Storage, StorageError};
use crate::{key::KeyPolicy, value::StoreValue};

/// Process-local tier. Also the fallback for tiers a store is built without.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, StoreValue>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoreValue>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl Storage for MemoryStorage {
    fn set(
        &self,
        key: &str,
        value: Option<StoreValue>,
        _policy: &KeyPolicy,
    ) -> Result<(), StorageError> {
        let mut map = self.lock()?;
        match value {
            Some(value) => {
                map.insert(key.to_string(), value);
            }
            None => {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn get(&self, key: &str, _policy: &KeyPolicy) -> Result<Option<StoreValue>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn destroy(&self) -> Result<(), StorageError> {
        self.lock()?.clear();
        Ok(())
    }
}
