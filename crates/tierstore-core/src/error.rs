use thiserror::Error;

/// Errors surfaced by the store coordinator.
///
/// Only observers ever see these; reads and writes on a destroyed store
/// quietly do nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store was destroyed and no longer delivers changes.
    #[error("store destroyed")]
    Destroyed,
}
