//! Typed key-value store that routes each key to one of four storage tiers
//! (plaintext, encrypted, memory, cloud) and broadcasts changes per key.
//! Concrete persistent tiers live in `tierstore-storage` and `tierstore-sync`.

pub mod error;
pub mod key;
pub mod notifier;
pub mod storage;
pub mod store;
pub mod value;

pub use error::StoreError;
pub use key::{Accessibility, KeyPolicy, StoreKey, StoreKind};
pub use notifier::{Subscription, Update};
pub use storage::{memory::MemoryStorage, Storage, StorageError};
pub use store::{Store, StoreBuilder};
pub use value::{Storable, StoreValue};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
