use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    error::StoreError,
    key::{StoreKey, StoreKind},
    notifier::{NotifierRegistry, Subscription},
    storage::{memory::MemoryStorage, Storage},
    value::{Storable, StoreValue},
};

/// Typed facade over the four storage tiers.
///
/// Every key is routed to the tier named by its [`StoreKind`]. Writes are
/// published to observers of the same canonical key. Once [`Store::destroy`]
/// has run, the store erases everything it holds and ignores further use.
///
/// Reads and writes never fail: tier errors are logged and surface as a
/// dropped write or a `None` read.
pub struct Store {
    tiers: Tiers,
    notifiers: NotifierRegistry,
    // Guards the destroyed flag. Exclusive for destroy/remove_all.
    access: RwLock<bool>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// A store whose four tiers all live in memory.
    pub fn in_memory() -> Self {
        StoreBuilder::default().build()
    }

    /// Store `value` under `key`; `None` removes the entry.
    #[instrument(skip_all, fields(key = key.name()))]
    pub fn set<T: Storable>(&self, key: &StoreKey<T>, value: Option<T>) {
        let destroyed = self.access();
        if *destroyed {
            debug!("store destroyed, dropping write");
            return;
        }

        let raw = match value {
            Some(value) => match value.to_store_value() {
                Some(raw) => Some(raw),
                None => {
                    warn!("value has no storable representation, dropping write");
                    return;
                }
            },
            None => None,
        };

        let notifiers = self.notifiers.read();
        let existing = notifiers.get(key.name()).cloned();
        match existing {
            Some(notifier) => {
                drop(notifiers);
                notifier.publish_after(|| self.write(key, raw.clone()).then_some(raw));
            }
            None => {
                // Holding the registry read lock keeps a concurrent first
                // observe from seeding with the value this write replaces.
                self.write(key, raw);
            }
        }
    }

    /// Read the value stored under `key`.
    pub fn get<T: Storable>(&self, key: &StoreKey<T>) -> Option<T> {
        let destroyed = self.access();
        if *destroyed {
            return None;
        }
        self.read_raw(key)
            .as_ref()
            .and_then(T::from_store_value)
    }

    pub fn has<T: Storable>(&self, key: &StoreKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Subscribe to changes of `key`.
    ///
    /// The first event is the current value. On a destroyed store the
    /// subscription yields [`StoreError::Destroyed`] and ends.
    #[instrument(skip_all, fields(key = key.name()))]
    pub fn observe<T: Storable>(&self, key: &StoreKey<T>) -> Subscription<T> {
        let destroyed = self.access();
        if *destroyed {
            return Subscription::failed(StoreError::Destroyed);
        }

        let notifier = self
            .notifiers
            .get_or_create(key.name(), key.kind(), || self.read_raw(key));
        notifier.subscribe()
    }

    /// Erase every tier and shut the store down. Observers receive
    /// [`StoreError::Destroyed`]. Calling it again does nothing.
    #[instrument(skip_all)]
    pub fn destroy(&self) {
        let mut destroyed = self.access_mut();
        if *destroyed {
            return;
        }
        *destroyed = true;

        self.erase(&StoreKind::ALL);
        for notifier in self.notifiers.drain() {
            notifier.fail(StoreError::Destroyed);
        }
        info!("store destroyed");
    }

    /// Erase the given tiers. Observers of their keys see `None` and stay subscribed.
    #[instrument(skip_all, fields(kinds = ?kinds))]
    pub fn remove_all(&self, kinds: &[StoreKind]) {
        let destroyed = self.access_mut();
        if *destroyed {
            return;
        }

        let erased = self.erase(kinds);
        for notifier in self.notifiers.for_kinds(&erased) {
            notifier.publish(None);
        }
    }

    /// Ask the given tiers to persist buffered changes now.
    #[instrument(skip_all, fields(kinds = ?kinds))]
    pub fn flush(&self, kinds: &[StoreKind]) {
        let destroyed = self.access();
        if *destroyed {
            return;
        }
        for &kind in kinds {
            if let Err(err) = self.tiers.get(kind).sync() {
                warn!(%kind, error = %err, "tier sync failed");
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        *self.access()
    }

    fn access(&self) -> RwLockReadGuard<'_, bool> {
        self.access.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn access_mut(&self) -> RwLockWriteGuard<'_, bool> {
        self.access.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(&self, key: &StoreKey<T>, raw: Option<StoreValue>) -> bool {
        let tier = self.tiers.get(key.kind());
        if let Err(err) = tier.set(key.name(), raw, &key.policy()) {
            warn!(error = %err, "tier write failed");
            return false;
        }
        if key.is_sync_now() {
            if let Err(err) = tier.sync() {
                warn!(error = %err, "tier sync failed");
            }
        }
        true
    }

    fn read_raw<T>(&self, key: &StoreKey<T>) -> Option<StoreValue> {
        match self.tiers.get(key.kind()).get(key.name(), &key.policy()) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = key.name(), error = %err, "tier read failed");
                None
            }
        }
    }

    /// Returns the kinds that were erased successfully.
    fn erase(&self, kinds: &[StoreKind]) -> Vec<StoreKind> {
        kinds
            .iter()
            .copied()
            .filter(|&kind| match self.tiers.get(kind).destroy() {
                Ok(()) => true,
                Err(err) => {
                    warn!(%kind, error = %err, "tier erase failed");
                    false
                }
            })
            .collect()
    }

    #[cfg(test)]
    fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }
}

/// Collects tier implementations for a [`Store`]. Kinds left unset fall back to
/// a fresh [`MemoryStorage`].
#[derive(Default)]
pub struct StoreBuilder {
    tiers: HashMap<StoreKind, Arc<dyn Storage>>,
}

impl StoreBuilder {
    pub fn tier(self, kind: StoreKind, storage: impl Storage + 'static) -> Self {
        self.shared_tier(kind, Arc::new(storage))
    }

    pub fn shared_tier(mut self, kind: StoreKind, storage: Arc<dyn Storage>) -> Self {
        self.tiers.insert(kind, storage);
        self
    }

    pub fn build(mut self) -> Store {
        let mut take = |kind: StoreKind| -> Arc<dyn Storage> {
            self.tiers.remove(&kind).unwrap_or_else(|| {
                debug!(%kind, "no tier configured, using memory storage");
                Arc::new(MemoryStorage::new())
            })
        };
        let tiers = Tiers {
            plaintext: take(StoreKind::Plaintext),
            encrypted: take(StoreKind::Encrypted),
            memory: take(StoreKind::Memory),
            cloud: take(StoreKind::Cloud),
        };
        Store {
            tiers,
            notifiers: NotifierRegistry::default(),
            access: RwLock::new(false),
        }
    }
}

struct Tiers {
    plaintext: Arc<dyn Storage>,
    encrypted: Arc<dyn Storage>,
    memory: Arc<dyn Storage>,
    cloud: Arc<dyn Storage>,
}

impl Tiers {
    fn get(&self, kind: StoreKind) -> &dyn Storage {
        match kind {
            StoreKind::Plaintext => self.plaintext.as_ref(),
            StoreKind::Encrypted => self.encrypted.as_ref(),
            StoreKind::Memory => self.memory.as_ref(),
            StoreKind::Cloud => self.cloud.as_ref(),
        }
    }
}
