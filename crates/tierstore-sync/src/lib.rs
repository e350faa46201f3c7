//! Cloud-synced storage tier: a local mirror of a remote key-value namespace.
//!
//! Writes are applied locally and queued; [`Storage::sync`] pushes the queue
//! and then refreshes the mirror from the remote snapshot. `destroy` pushes its
//! removals right away, covering keys this device has not pulled yet.

mod remote;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tierstore_core::{KeyPolicy, Storage, StorageError, StoreValue};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub use remote::{CloudRemote, HttpRemote, HttpRemoteConfig, InMemoryRemote, NoopRemote};

/// One queued write. `value: None` deletes the entry remotely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudChange {
    pub key: String,
    pub value: Option<StoreValue>,
    pub updated_at: DateTime<Utc>,
    /// Identifies the writing device.
    pub origin: Uuid,
}

/// Cloud tier. Values pulled by `sync` replace the mirror silently: observers
/// of a cloud key through `Store::observe` only see writes made through their
/// own store, not changes that arrive from other devices.
pub struct CloudStorage<R: CloudRemote> {
    remote: R,
    origin: Uuid,
    state: Mutex<Mirror>,
}

#[derive(Default)]
struct Mirror {
    entries: BTreeMap<String, StoreValue>,
    // Latest unpushed change per key.
    pending: BTreeMap<String, CloudChange>,
}

impl<R: CloudRemote> CloudStorage<R> {
    pub fn new(remote: R) -> Self {
        Self::with_origin(remote, Uuid::new_v4())
    }

    pub fn with_origin(remote: R, origin: Uuid) -> Self {
        Self {
            remote,
            origin,
            state: Mutex::new(Mirror::default()),
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn pending_changes(&self) -> usize {
        self.mirror().map(|m| m.pending.len()).unwrap_or_default()
    }

    fn mirror(&self) -> Result<MutexGuard<'_, Mirror>, StorageError> {
        self.state.lock().map_err(|err| StorageError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn queue(&self, mirror: &mut Mirror, key: &str, value: Option<StoreValue>) {
        mirror.pending.insert(
            key.to_string(),
            CloudChange {
                key: key.to_string(),
                value,
                updated_at: Utc::now(),
                origin: self.origin,
            },
        );
    }

    fn push_pending(&self, mirror: &mut Mirror) -> Result<(), StorageError> {
        if mirror.pending.is_empty() {
            return Ok(());
        }
        let changes: Vec<CloudChange> = mirror.pending.values().cloned().collect();
        self.remote
            .push(&changes)
            .map_err(|e| self.remote_error(e))?;
        debug!(pushed = changes.len(), "pushed cloud changes");
        mirror.pending.clear();
        Ok(())
    }

    fn remote_error(&self, err: anyhow::Error) -> StorageError {
        StorageError::Remote {
            reason: format!("{}: {err:#}", self.remote.name()),
        }
    }
}

impl<R: CloudRemote> Storage for CloudStorage<R> {
    fn set(
        &self,
        key: &str,
        value: Option<StoreValue>,
        _policy: &KeyPolicy,
    ) -> Result<(), StorageError> {
        let mut mirror = self.mirror()?;
        match &value {
            Some(value) => {
                mirror.entries.insert(key.to_string(), value.clone());
            }
            None => {
                mirror.entries.remove(key);
            }
        }
        self.queue(&mut mirror, key, value);
        Ok(())
    }

    fn get(&self, key: &str, _policy: &KeyPolicy) -> Result<Option<StoreValue>, StorageError> {
        Ok(self.mirror()?.entries.get(key).cloned())
    }

    /// Clears the mirror and pushes a removal for every key known locally or
    /// remotely. Removals that cannot be pushed stay queued for the next `sync`.
    #[instrument(skip_all, fields(remote = self.remote.name(), origin = %self.origin))]
    fn destroy(&self) -> Result<(), StorageError> {
        let mut mirror = self.mirror()?;
        let mut keys: BTreeSet<String> =
            std::mem::take(&mut mirror.entries).into_keys().collect();
        keys.extend(mirror.pending.keys().cloned());
        match self.remote.pull() {
            Ok(remote) => keys.extend(remote.into_keys()),
            Err(err) => {
                let err = self.remote_error(err);
                warn!(error = %err, "remote keys unknown, erasing local ones");
            }
        }
        for key in keys {
            self.queue(&mut mirror, &key, None);
        }
        if let Err(err) = self.push_pending(&mut mirror) {
            warn!(error = %err, "cloud removals left queued");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(remote = self.remote.name(), origin = %self.origin))]
    fn sync(&self) -> Result<(), StorageError> {
        let mut mirror = self.mirror()?;
        self.push_pending(&mut mirror)?;
        mirror.entries = self.remote.pull().map_err(|e| self.remote_error(e))?;
        debug!(entries = mirror.entries.len(), "pulled cloud snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tierstore_core::{Store, StoreKey, StoreKind};

    use super::*;

    fn policy() -> KeyPolicy {
        KeyPolicy::default()
    }

    #[test]
    fn writes_are_local_until_synced() {
        let remote = InMemoryRemote::default();
        let device = CloudStorage::new(remote.clone());

        device.set("k", Some(json!("v")), &policy()).expect("set");
        assert_eq!(device.get("k", &policy()).expect("get"), Some(json!("v")));
        assert_eq!(device.pending_changes(), 1);
        assert!(remote.snapshot().is_empty());

        device.sync().expect("sync");
        assert_eq!(device.pending_changes(), 0);
        assert_eq!(remote.snapshot().get("k"), Some(&json!("v")));
    }

    #[test]
    fn second_device_sees_first_device_writes_after_sync() {
        let remote = InMemoryRemote::default();
        let phone = CloudStorage::new(remote.clone());
        let laptop = CloudStorage::new(remote.clone());

        phone.set("theme", Some(json!("dark")), &policy()).expect("set");
        phone.sync().expect("phone sync");
        assert_eq!(laptop.get("theme", &policy()).expect("get"), None);

        laptop.sync().expect("laptop sync");
        assert_eq!(laptop.get("theme", &policy()).expect("get"), Some(json!("dark")));

        laptop.set("theme", None, &policy()).expect("unset");
        laptop.sync().expect("laptop sync");
        phone.sync().expect("phone sync");
        assert_eq!(phone.get("theme", &policy()).expect("get"), None);
    }

    #[test]
    fn destroy_pushes_removals_for_known_keys() {
        let remote = InMemoryRemote::default();
        let device = CloudStorage::new(remote.clone());
        device.set("a", Some(json!(1)), &policy()).expect("set");
        device.set("b", Some(json!(2)), &policy()).expect("set");
        device.sync().expect("sync");

        device.destroy().expect("destroy");
        assert_eq!(device.get("a", &policy()).expect("get"), None);
        assert_eq!(device.pending_changes(), 0);
        assert!(remote.snapshot().is_empty());
    }

    #[test]
    fn offline_destroy_keeps_removals_queued() {
        let remote = InMemoryRemote::default();
        let device = CloudStorage::new(remote.clone());
        device.set("a", Some(json!(1)), &policy()).expect("set");
        device.sync().expect("sync");

        remote.set_offline(true);
        device.destroy().expect("destroy still succeeds locally");
        assert_eq!(device.get("a", &policy()).expect("get"), None);
        assert_eq!(device.pending_changes(), 1);

        remote.set_offline(false);
        device.sync().expect("sync");
        assert!(remote.snapshot().is_empty());
    }

    #[test]
    fn destroy_erases_keys_this_device_never_pulled() {
        let remote = InMemoryRemote::default();
        let phone = CloudStorage::new(remote.clone());
        phone.set("theme", Some(json!("dark")), &policy()).expect("set");
        phone.sync().expect("phone sync");

        let laptop = CloudStorage::new(remote.clone());
        laptop.destroy().expect("destroy");
        assert!(remote.snapshot().is_empty());

        laptop.sync().expect("laptop sync");
        assert_eq!(laptop.get("theme", &policy()).expect("get"), None);
    }

    #[test]
    fn remove_all_on_a_fresh_store_clears_other_devices_values() {
        let remote = InMemoryRemote::default();
        let phone = Store::builder()
            .tier(StoreKind::Cloud, CloudStorage::new(remote.clone()))
            .build();
        let nickname = StoreKey::<String>::cloud("nickname").sync_now();
        phone.set(&nickname, Some("satoshi".into()));

        let laptop = Store::builder()
            .tier(StoreKind::Cloud, CloudStorage::new(remote.clone()))
            .build();
        laptop.remove_all(&[StoreKind::Cloud]);
        assert!(remote.snapshot().is_empty());

        laptop.flush(&[StoreKind::Cloud]);
        assert_eq!(laptop.get(&nickname), None);
        phone.flush(&[StoreKind::Cloud]);
        assert_eq!(phone.get(&nickname), None);
    }

    #[test]
    fn store_destroy_clears_the_remote() {
        let remote = InMemoryRemote::default();
        let store = Store::builder()
            .tier(StoreKind::Cloud, CloudStorage::new(remote.clone()))
            .build();
        store.set(&StoreKey::<bool>::cloud("onboarded").sync_now(), Some(true));
        assert_eq!(remote.snapshot().len(), 1);

        store.destroy();
        assert!(remote.snapshot().is_empty());
    }

    #[test]
    fn failed_push_keeps_changes_queued() {
        let remote = InMemoryRemote::default();
        let device = CloudStorage::new(remote.clone());
        device.set("k", Some(json!(1)), &policy()).expect("set");

        remote.set_offline(true);
        let err = device.sync().expect_err("offline sync fails");
        assert!(matches!(err, StorageError::Remote { .. }));
        assert_eq!(device.pending_changes(), 1);
        assert_eq!(device.get("k", &policy()).expect("get"), Some(json!(1)));

        remote.set_offline(false);
        device.sync().expect("sync");
        assert_eq!(remote.snapshot().get("k"), Some(&json!(1)));
    }

    #[test]
    fn store_flush_syncs_cloud_tier() {
        let remote = InMemoryRemote::default();
        let store = Store::builder()
            .tier(StoreKind::Cloud, CloudStorage::new(remote.clone()))
            .build();
        let key = StoreKey::<String>::cloud("nickname");

        store.set(&key, Some("satoshi".into()));
        store.flush(&[StoreKind::Cloud]);
        assert_eq!(remote.snapshot().get(key.name()), Some(&json!("satoshi")));

        let eager = StoreKey::<i64>::cloud("counter").sync_now();
        store.set(&eager, Some(3));
        assert_eq!(remote.snapshot().get(eager.name()), Some(&json!(3)));
    }
}
