use std::path::{Path, PathBuf};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use tierstore_core::{Store, StoreBuilder, StoreKind};
use tierstore_storage::{
    EncryptedFileStorage, KeyProvider, KeyringProvider, PlaintextFileStorage,
};
use tierstore_sync::{CloudStorage, HttpRemote, NoopRemote};
use tracing::debug;

const PLAINTEXT_FILE: &str = "plaintext.json";
const ENCRYPTED_DIR: &str = "encrypted";

/// Resolve the default data directory for tierstore.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("tierstore"))
}

/// Build the store described by config: file tiers under the data dir, keys
/// in the OS keyring and the cloud tier against the configured remote.
pub fn store_from_config(config: &Config) -> Result<Store> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let keyring = config.keyring.clone().unwrap_or_default();
    debug!(?root, service = %keyring.service, "initializing store");

    let builder = local_tiers(
        &root,
        KeyringProvider::new(keyring.service, keyring.account),
    );
    let builder = match &config.cloud {
        Some(remote) => {
            debug!(endpoint = %remote.endpoint, "cloud tier enabled");
            builder.tier(
                StoreKind::Cloud,
                CloudStorage::new(HttpRemote::new(remote.clone())),
            )
        }
        None => builder.tier(StoreKind::Cloud, CloudStorage::new(NoopRemote)),
    };
    Ok(builder.build())
}

fn local_tiers<P: KeyProvider + 'static>(root: &Path, key_provider: P) -> StoreBuilder {
    Store::builder()
        .tier(
            StoreKind::Plaintext,
            PlaintextFileStorage::new(root.join(PLAINTEXT_FILE)),
        )
        .tier(
            StoreKind::Encrypted,
            EncryptedFileStorage::new(root.join(ENCRYPTED_DIR), key_provider),
        )
}

/// Helper for tests to construct a store rooted at a temp dir with in-memory
/// keys and an in-process cloud remote.
#[cfg(test)]
pub fn test_store(root: impl AsRef<Path>, remote: tierstore_sync::InMemoryRemote) -> Store {
    local_tiers(root.as_ref(), tierstore_storage::InMemoryKeyProvider::default())
        .tier(StoreKind::Cloud, CloudStorage::new(remote))
        .build()
}
