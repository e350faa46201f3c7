use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tierstore_core::Accessibility;
use tracing::debug;

/// Key material used for encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Protection class this key belongs to (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides one encryption key per protection class
/// (OS keychain in production; memory in tests).
pub trait KeyProvider: Send + Sync {
    fn get_or_create(&self, class: Accessibility) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider. Each protection class is its own keyring entry,
/// `<account>.<class>`, under the configured service.
pub struct KeyringProvider {
    service: String,
    account: String,
    cache: Mutex<HashMap<Accessibility, KeyMaterial>>,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load_or_generate(&self, class: Accessibility) -> Result<KeyMaterial, KeyError> {
        let account = format!("{}.{}", self.account, class.as_str());
        let entry = keyring::Entry::new(&self.service, &account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        match entry.get_password() {
            Ok(secret) => decode_key(class, &secret),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, %account, "generating new data key");
                let material = generate_key(class);
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

impl KeyProvider for KeyringProvider {
    fn get_or_create(&self, class: Accessibility) -> Result<KeyMaterial, KeyError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|err| KeyError::Keyring(format!("lock poisoned: {err}")))?;

        if let Some(existing) = cache.get(&class) {
            return Ok(existing.clone());
        }

        let material = self.load_or_generate(class)?;
        cache.insert(class, material.clone());
        Ok(material)
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<HashMap<Accessibility, KeyMaterial>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn get_or_create(&self, class: Accessibility) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        Ok(guard
            .entry(class)
            .or_insert_with(|| generate_key(class))
            .clone())
    }
}

fn generate_key(class: Accessibility) -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: class.as_str().to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(class: Accessibility, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| KeyError::Decode(format!("expected 32 bytes, got {}", bytes.len())))?;

    Ok(KeyMaterial {
        id: class.as_str().to_string(),
        bytes,
    })
}
