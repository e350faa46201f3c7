use color_eyre::Result;
use serde_json::Value;
use tierstore_core::{Store, StoreKey, StoreKind};
use tracing::info;

use crate::cli::{AccessibleArg, KeyArgs, KindArg};

/// Key addressed on the command line. Values are untyped JSON, and writes
/// reach disk or the remote before the command returns.
fn key(args: &KeyArgs) -> StoreKey<Value> {
    let mut key = StoreKey::new(args.kind.into(), args.name.clone()).sync_now();
    if let Some(id) = &args.id {
        key = key.with_id(id.clone());
    }
    key
}

/// JSON if it parses, a plain string otherwise.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn get(store: &Store, args: &KeyArgs) -> Option<Value> {
    if args.kind == KindArg::Cloud {
        store.flush(&[StoreKind::Cloud]);
    }
    store.get(&key(args))
}

pub fn set(store: &Store, args: &KeyArgs, raw: &str, accessible: Option<AccessibleArg>) {
    let mut key = key(args);
    if let Some(class) = accessible {
        key = key.accessible(class.into());
    }
    store.set(&key, Some(parse_value(raw)));
    info!(key = key.name(), "value stored");
}

pub fn unset(store: &Store, args: &KeyArgs) {
    let key = key(args);
    store.set(&key, None);
    info!(key = key.name(), "value removed");
}

pub fn clear(store: &Store, kinds: &[KindArg]) {
    let kinds: Vec<StoreKind> = kinds.iter().copied().map(StoreKind::from).collect();
    store.remove_all(&kinds);
    store.flush(&kinds);
}

pub fn destroy(store: &Store) {
    store.destroy();
}

pub fn sync(store: &Store) {
    store.flush(&StoreKind::ALL);
}

/// Writes, reads back and removes a probe value in every tier.
pub fn health(store: &Store) -> Result<()> {
    for kind in StoreKind::ALL {
        let probe = StoreKey::<String>::new(kind, "health-probe");
        store.set(&probe, Some("ok".to_string()));
        let round_trip = store.get(&probe);
        store.set(&probe, None);
        if round_trip.as_deref() != Some("ok") {
            color_eyre::eyre::bail!("{kind} tier round-trip failed");
        }
        if store.has(&probe) {
            color_eyre::eyre::bail!("{kind} tier kept a removed value");
        }
    }
    Ok(())
}
