use std::{
    fs::{self, File},
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use tierstore_core::{Accessibility, KeyPolicy, Storage, StorageError, StoreValue};
use tracing::instrument;

use crate::{
    atomic::write_atomically,
    key_provider::{KeyMaterial, KeyProvider},
};

/// AES-GCM encrypted tier, one file per entry under `root`.
///
/// Entries are encrypted under the key of their protection class, taken from
/// the key's [`Accessibility`] (default `WhenUnlockedThisDeviceOnly`). The
/// class is recorded next to the ciphertext so reads use the matching key.
pub struct EncryptedFileStorage<P: KeyProvider> {
    root: PathBuf,
    key_provider: P,
}

impl<P: KeyProvider> EncryptedFileStorage<P> {
    pub fn new(root: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            root: root.into(),
            key_provider,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }

    fn cipher_for(&self, class: Accessibility) -> Result<Aes256Gcm, StorageError> {
        let material = self
            .key_provider
            .get_or_create(class)
            .map_err(|e| StorageError::KeyProvider {
                reason: e.to_string(),
            })?;
        build_cipher(&material)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    class: Accessibility,
    nonce: String,
    ciphertext: String,
}

impl<P: KeyProvider> Storage for EncryptedFileStorage<P> {
    #[instrument(skip_all, fields(key = %key))]
    fn set(
        &self,
        key: &str,
        value: Option<StoreValue>,
        policy: &KeyPolicy,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let Some(value) = value else {
            return remove_entry(&path);
        };

        let class = policy.accessibility.unwrap_or_default();
        let cipher = self.cipher_for(class)?;
        let plaintext = serde_json::to_vec(&value).map_err(StorageError::storage)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| StorageError::Storage {
                reason: format!("encrypt failed: {e}"),
            })?;

        let blob = StoredBlob {
            class,
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };
        let json = serde_json::to_vec(&blob).map_err(StorageError::storage)?;
        write_atomically(&path, &json)
    }

    #[instrument(skip_all, fields(key = %key))]
    fn get(&self, key: &str, _policy: &KeyPolicy) -> Result<Option<StoreValue>, StorageError> {
        let Some(blob) = read_blob(&self.path_for(key))? else {
            return Ok(None);
        };
        let corrupt = |reason: String| StorageError::Corrupt {
            key: key.to_string(),
            reason,
        };

        let cipher = self.cipher_for(blob.class)?;
        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(blob.nonce)
            .map_err(|e| corrupt(format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != 12 {
            return Err(corrupt(format!("nonce has {} bytes", nonce_bytes.len())));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = URL_SAFE_NO_PAD
            .decode(blob.ciphertext)
            .map_err(|e| corrupt(format!("ciphertext decode failed: {e}")))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| corrupt(format!("decrypt failed: {e}")))?;
        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|e| corrupt(e.to_string()))
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn destroy(&self) -> Result<(), StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StorageError::storage(err)),
        };
        for entry in entries {
            let path = entry.map_err(StorageError::storage)?.path();
            if path.is_file() {
                remove_entry(&path)?;
            }
        }
        Ok(())
    }
}

fn remove_entry(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::storage(err)),
    }
}

fn read_blob(path: &Path) -> Result<Option<StoredBlob>, StorageError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::storage(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StorageError::storage)?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            key: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| StorageError::Storage {
        reason: format!("cipher init failed: {e}"),
    })
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tierstore_core::{Store, StoreKey, StoreKind};

    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    fn policy(class: Accessibility) -> KeyPolicy {
        KeyPolicy {
            accessibility: Some(class),
        }
    }

    #[test]
    fn round_trip_encrypts_and_decrypts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = EncryptedFileStorage::new(dir.path(), InMemoryKeyProvider::default());

        let key = "encrypted_session_String";
        storage
            .set(key, Some(json!("hello-tierstore")), &KeyPolicy::default())
            .expect("set");
        let decrypted = storage.get(key, &KeyPolicy::default()).expect("get");
        assert_eq!(decrypted, Some(json!("hello-tierstore")));

        // ensure plaintext is not present on disk
        let stored = fs::read_to_string(storage.path_for(key)).expect("read ciphertext");
        assert!(
            !stored.contains("hello-tierstore"),
            "plaintext must not be stored"
        );
        assert!(stored.contains("when_unlocked_this_device_only"));
    }

    #[test]
    fn entries_decrypt_with_the_class_they_were_written_with() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = InMemoryKeyProvider::default();
        let storage = EncryptedFileStorage::new(dir.path(), provider.clone());

        storage
            .set("k", Some(json!(7)), &policy(Accessibility::Always))
            .expect("set");
        let value = storage
            .get("k", &policy(Accessibility::WhenUnlocked))
            .expect("get");
        assert_eq!(value, Some(json!(7)));
    }

    #[test]
    fn tampered_ciphertext_is_reported_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = EncryptedFileStorage::new(dir.path(), InMemoryKeyProvider::default());
        storage
            .set("k", Some(json!("v")), &KeyPolicy::default())
            .expect("set");

        let path = storage.path_for("k");
        let mut blob: StoredBlob =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("parse blob");
        blob.ciphertext = URL_SAFE_NO_PAD.encode(b"garbage-garbage-garbage");
        fs::write(&path, serde_json::to_vec(&blob).expect("encode")).expect("write");

        let err = storage
            .get("k", &KeyPolicy::default())
            .expect_err("tampered entry must not decrypt");
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn unset_and_destroy_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = EncryptedFileStorage::new(dir.path().join("vault"), InMemoryKeyProvider::default());
        storage.destroy().expect("destroy before first write");

        let policy = KeyPolicy::default();
        storage.set("a", Some(json!(1)), &policy).expect("set");
        storage.set("b", Some(json!(2)), &policy).expect("set");
        storage.set("a", None, &policy).expect("unset");
        storage.set("a", None, &policy).expect("unset again");
        assert_eq!(storage.get("a", &policy).expect("get"), None);

        storage.destroy().expect("destroy");
        storage.destroy().expect("destroy again");
        assert_eq!(storage.get("b", &policy).expect("get"), None);
    }

    #[test]
    fn store_routes_encrypted_keys_here() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::builder()
            .tier(
                StoreKind::Encrypted,
                EncryptedFileStorage::new(dir.path(), InMemoryKeyProvider::default()),
            )
            .build();
        let key = StoreKey::<String>::encrypted("e").accessible(Accessibility::AfterFirstUnlock);

        store.set(&key, Some("secret".into()));
        assert_eq!(store.get(&key).as_deref(), Some("secret"));
        assert!(dir.path().join(sanitize_key(key.name())).exists());

        store.remove_all(&[StoreKind::Encrypted]);
        assert_eq!(store.get(&key), None);
        assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }
}
