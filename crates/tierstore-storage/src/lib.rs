//! Persistent storage tiers for `tierstore`: a plaintext JSON document and an
//! AES-GCM encrypted file store with keys held by the OS keyring (or test doubles).

mod atomic;
pub mod encrypted;
pub mod key_provider;
pub mod plaintext;

pub use encrypted::EncryptedFileStorage;
pub use key_provider::{InMemoryKeyProvider, KeyError, KeyMaterial, KeyProvider, KeyringProvider};
pub use plaintext::PlaintextFileStorage;
