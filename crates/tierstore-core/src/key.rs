use std::{fmt, marker::PhantomData};

use serde::{Deserialize, Serialize};

use crate::value::Storable;

const NAME_SEPARATOR: &str = "_";

/// Storage tier a key is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Plaintext entries persisted to disk.
    Plaintext,
    /// Entries encrypted at rest with keys held by the OS keyring.
    Encrypted,
    /// Process-local entries, gone when the store is dropped.
    Memory,
    /// Entries mirrored to a remote key-value service.
    Cloud,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Plaintext,
        StoreKind::Encrypted,
        StoreKind::Memory,
        StoreKind::Cloud,
    ];

    /// Stable name used as the first component of every canonical key.
    /// Changing it orphans previously persisted data.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Plaintext => "plaintext",
            StoreKind::Encrypted => "encrypted",
            StoreKind::Memory => "memory",
            StoreKind::Cloud => "cloud",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protection class for encrypted entries. Each class is encrypted under its own key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    /// Readable only while the device is unlocked.
    WhenUnlocked,
    /// Readable after the first unlock following a restart.
    AfterFirstUnlock,
    /// Always readable.
    Always,
    /// Readable while unlocked, and only when a passcode is set. Never migrates.
    WhenPasscodeSetThisDeviceOnly,
    /// Like `WhenUnlocked`, never migrates to another device.
    #[default]
    WhenUnlockedThisDeviceOnly,
    /// Like `AfterFirstUnlock`, never migrates to another device.
    AfterFirstUnlockThisDeviceOnly,
    /// Like `Always`, never migrates to another device.
    AlwaysThisDeviceOnly,
}

impl Accessibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accessibility::WhenUnlocked => "when_unlocked",
            Accessibility::AfterFirstUnlock => "after_first_unlock",
            Accessibility::Always => "always",
            Accessibility::WhenPasscodeSetThisDeviceOnly => "when_passcode_set_this_device_only",
            Accessibility::WhenUnlockedThisDeviceOnly => "when_unlocked_this_device_only",
            Accessibility::AfterFirstUnlockThisDeviceOnly => "after_first_unlock_this_device_only",
            Accessibility::AlwaysThisDeviceOnly => "always_this_device_only",
        }
    }
}

/// Per-entry options handed to a tier alongside the canonical name.
/// The coordinator never interprets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyPolicy {
    pub accessibility: Option<Accessibility>,
}

/// Typed descriptor of one storage slot.
///
/// The canonical name is `kind_prefix[_id]_typetag`. Two keys with the same
/// canonical name address the same slot even when `T` differs; reading through
/// a key whose type cannot decode the stored value yields `None`.
pub struct StoreKey<T> {
    kind: StoreKind,
    prefix_or_name: String,
    id: Option<String>,
    name: String,
    sync_now: bool,
    accessibility: Option<Accessibility>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Storable> StoreKey<T> {
    pub fn new(kind: StoreKind, prefix_or_name: impl Into<String>) -> Self {
        let prefix_or_name = prefix_or_name.into();
        let name = canonical_name(kind, &prefix_or_name, None, T::type_tag());
        Self {
            kind,
            prefix_or_name,
            id: None,
            name,
            sync_now: false,
            accessibility: None,
            _value: PhantomData,
        }
    }

    pub fn plaintext(prefix_or_name: impl Into<String>) -> Self {
        Self::new(StoreKind::Plaintext, prefix_or_name)
    }

    pub fn encrypted(prefix_or_name: impl Into<String>) -> Self {
        Self::new(StoreKind::Encrypted, prefix_or_name)
    }

    pub fn memory(prefix_or_name: impl Into<String>) -> Self {
        Self::new(StoreKind::Memory, prefix_or_name)
    }

    pub fn cloud(prefix_or_name: impl Into<String>) -> Self {
        Self::new(StoreKind::Cloud, prefix_or_name)
    }

    /// Target one instance of a key family, e.g. per account.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.name = canonical_name(self.kind, &self.prefix_or_name, Some(&id), T::type_tag());
        self.id = Some(id);
        self
    }

    /// Ask the tier to persist immediately after every write through this key.
    pub fn sync_now(mut self) -> Self {
        self.sync_now = true;
        self
    }

    /// Protection class for an encrypted key. Ignored for every other kind.
    pub fn accessible(mut self, accessibility: Accessibility) -> Self {
        if self.kind == StoreKind::Encrypted {
            self.accessibility = Some(accessibility);
        }
        self
    }
}

impl<T> StoreKey<T> {
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Canonical name inside the tier's key space.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_sync_now(&self) -> bool {
        self.sync_now
    }

    pub fn accessibility(&self) -> Option<Accessibility> {
        self.accessibility
    }

    pub fn policy(&self) -> KeyPolicy {
        KeyPolicy {
            accessibility: self.accessibility,
        }
    }
}

impl<T> Clone for StoreKey<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            prefix_or_name: self.prefix_or_name.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
            sync_now: self.sync_now,
            accessibility: self.accessibility,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for StoreKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreKey")
            .field("name", &self.name)
            .field("sync_now", &self.sync_now)
            .field("accessibility", &self.accessibility)
            .finish()
    }
}

fn canonical_name(kind: StoreKind, prefix_or_name: &str, id: Option<&str>, type_tag: &str) -> String {
    [Some(kind.as_str()), Some(prefix_or_name), id, Some(type_tag)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(NAME_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_skips_missing_id() {
        let key = StoreKey::<i64>::plaintext("launch_count");
        assert_eq!(key.name(), "plaintext_launch_count_i64");

        let key = StoreKey::<String>::encrypted("token").with_id("acct-1");
        assert_eq!(key.name(), "encrypted_token_acct-1_String");
        assert_eq!(key.id(), Some("acct-1"));
    }

    #[test]
    fn different_value_types_get_different_names() {
        let a = StoreKey::<i64>::memory("k");
        let b = StoreKey::<String>::memory("k");
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn accessibility_only_applies_to_encrypted_keys() {
        let encrypted = StoreKey::<String>::encrypted("e").accessible(Accessibility::Always);
        assert_eq!(encrypted.policy().accessibility, Some(Accessibility::Always));

        let plain = StoreKey::<String>::plaintext("p").accessible(Accessibility::Always);
        assert_eq!(plain.accessibility(), None);
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in StoreKind::ALL {
            assert_eq!(StoreKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StoreKind::parse("keychain"), None);
    }
}
