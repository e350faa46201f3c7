//! Per-key replay-latest broadcast channels.

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::{error::StoreError, key::StoreKind, value::Storable, value::StoreValue};

/// One event delivered to an observer: the key's new value, or the terminal error.
pub type Update<T> = Result<Option<T>, StoreError>;

type RawUpdate = Result<Option<StoreValue>, StoreError>;

/// Receiving end of [`crate::Store::observe`].
///
/// The first event is the latest value of the key at subscription time. Dropping
/// the subscription unsubscribes. After a terminal `Err` the subscription ends.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: UnboundedReceiver<RawUpdate>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Storable> Subscription<T> {
    fn new(rx: UnboundedReceiver<RawUpdate>) -> Self {
        Self {
            rx,
            _value: PhantomData,
        }
    }

    /// A subscription that yields `err` once and then ends.
    pub(crate) fn failed(err: StoreError) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so the send cannot fail.
        let _ = tx.send(Err(err));
        Self::new(rx)
    }

    /// Wait for the next update. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Update<T>> {
        self.rx.recv().await.map(decode)
    }

    /// Blocking variant of [`Subscription::recv`] for synchronous callers.
    /// Panics when called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Update<T>> {
        self.rx.blocking_recv().map(decode)
    }

    /// Take the next pending update without waiting.
    pub fn try_recv(&mut self) -> Result<Update<T>, TryRecvError> {
        self.rx.try_recv().map(decode)
    }
}

fn decode<T: Storable>(update: RawUpdate) -> Update<T> {
    update.map(|raw| raw.as_ref().and_then(T::from_store_value))
}

/// Replay-latest multicast channel for one canonical key.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    kind: StoreKind,
    state: Mutex<NotifierState>,
}

#[derive(Debug)]
struct NotifierState {
    latest: Option<StoreValue>,
    subscribers: Vec<UnboundedSender<RawUpdate>>,
    failure: Option<StoreError>,
}

impl ChangeNotifier {
    fn new(kind: StoreKind, seed: Option<StoreValue>) -> Self {
        Self {
            kind,
            state: Mutex::new(NotifierState {
                latest: seed,
                subscribers: Vec::new(),
                failure: None,
            }),
        }
    }

    pub(crate) fn kind(&self) -> StoreKind {
        self.kind
    }

    fn state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. It receives the latest value before anything
    /// published afterwards.
    pub(crate) fn subscribe<T: Storable>(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        match &state.failure {
            Some(err) => {
                let _ = tx.send(Err(err.clone()));
            }
            None => {
                let _ = tx.send(Ok(state.latest.clone()));
                state.subscribers.push(tx);
            }
        }
        Subscription::new(rx)
    }

    /// Run `write` and publish its result while holding this notifier's lock,
    /// so concurrent writers to the key are seen by subscribers in write order.
    /// `write` returns the committed value, or `None` when nothing was written.
    pub(crate) fn publish_after<F>(&self, write: F)
    where
        F: FnOnce() -> Option<Option<StoreValue>>,
    {
        let mut state = self.state();
        if state.failure.is_some() {
            return;
        }
        if let Some(value) = write() {
            state.publish(value);
        }
    }

    pub(crate) fn publish(&self, value: Option<StoreValue>) {
        let mut state = self.state();
        if state.failure.is_none() {
            state.publish(value);
        }
    }

    /// Deliver a terminal error and drop every subscriber.
    pub(crate) fn fail(&self, err: StoreError) {
        let mut state = self.state();
        if state.failure.is_some() {
            return;
        }
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.send(Err(err.clone()));
        }
        state.latest = None;
        state.failure = Some(err);
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

impl NotifierState {
    fn publish(&mut self, value: Option<StoreValue>) {
        // Dropped subscriptions fail the send and are pruned here.
        self.subscribers
            .retain(|subscriber| subscriber.send(Ok(value.clone())).is_ok());
        self.latest = value;
    }
}

type NotifierMap = HashMap<String, Arc<ChangeNotifier>>;

/// Canonical key -> notifier. Each key gets at most one notifier.
#[derive(Debug, Default)]
pub(crate) struct NotifierRegistry {
    notifiers: RwLock<NotifierMap>,
}

impl NotifierRegistry {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, NotifierMap> {
        self.notifiers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NotifierMap> {
        self.notifiers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the notifier for `name`, creating it seeded with `seed()` if it
    /// does not exist yet. `seed` runs at most once, under the exclusive lock.
    pub(crate) fn get_or_create<F>(&self, name: &str, kind: StoreKind, seed: F) -> Arc<ChangeNotifier>
    where
        F: FnOnce() -> Option<StoreValue>,
    {
        {
            let notifiers = self.read();
            if let Some(existing) = notifiers.get(name) {
                return Arc::clone(existing);
            }
        }

        let mut notifiers = self.write();
        // Another caller may have created it between the two locks.
        if let Some(existing) = notifiers.get(name) {
            return Arc::clone(existing);
        }

        let notifier = Arc::new(ChangeNotifier::new(kind, seed()));
        notifiers.insert(name.to_string(), Arc::clone(&notifier));
        debug!(key = name, %kind, "created change notifier");
        notifier
    }

    pub(crate) fn for_kinds(&self, kinds: &[StoreKind]) -> Vec<Arc<ChangeNotifier>> {
        self.read()
            .values()
            .filter(|notifier| kinds.contains(&notifier.kind()))
            .cloned()
            .collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<ChangeNotifier>> {
        self.write().drain().map(|(_, notifier)| notifier).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_subscriber_sees_latest_value_first() {
        let notifier = ChangeNotifier::new(StoreKind::Memory, Some(json!(1)));
        notifier.publish(Some(json!(2)));

        let mut sub = notifier.subscribe::<i64>();
        notifier.publish(Some(json!(3)));

        assert_eq!(sub.try_recv(), Ok(Ok(Some(2))));
        assert_eq!(sub.try_recv(), Ok(Ok(Some(3))));
        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let notifier = ChangeNotifier::new(StoreKind::Memory, None);
        let mut kept = notifier.subscribe::<i64>();
        let dropped = notifier.subscribe::<i64>();
        assert_eq!(notifier.subscriber_count(), 2);

        drop(dropped);
        notifier.publish(Some(json!(5)));

        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(Ok(None)));
        assert_eq!(kept.try_recv(), Ok(Ok(Some(5))));
    }

    #[test]
    fn failure_terminates_current_and_future_subscribers() {
        let notifier = ChangeNotifier::new(StoreKind::Memory, Some(json!("v")));
        let mut sub = notifier.subscribe::<String>();
        notifier.fail(StoreError::Destroyed);
        notifier.publish(Some(json!("ignored")));

        assert_eq!(sub.try_recv(), Ok(Ok(Some("v".to_string()))));
        assert_eq!(sub.try_recv(), Ok(Err(StoreError::Destroyed)));
        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));

        let mut late = notifier.subscribe::<String>();
        assert_eq!(late.try_recv(), Ok(Err(StoreError::Destroyed)));
        assert_eq!(late.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn undecodable_values_arrive_as_none() {
        let notifier = ChangeNotifier::new(StoreKind::Memory, Some(json!("text")));
        let mut sub = notifier.subscribe::<i64>();
        assert_eq!(sub.try_recv(), Ok(Ok(None)));
    }

    #[test]
    fn registry_seeds_only_on_first_lookup() {
        let registry = NotifierRegistry::default();
        let mut seeds = 0;
        let first = registry.get_or_create("k", StoreKind::Memory, || {
            seeds += 1;
            Some(json!(1))
        });
        let second = registry.get_or_create("k", StoreKind::Memory, || {
            seeds += 1;
            None
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(seeds, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_filters_by_kind() {
        let registry = NotifierRegistry::default();
        registry.get_or_create("a", StoreKind::Memory, || None);
        registry.get_or_create("b", StoreKind::Encrypted, || None);

        let memory = registry.for_kinds(&[StoreKind::Memory]);
        assert_eq!(memory.len(), 1);
        assert_eq!(memory[0].kind(), StoreKind::Memory);
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
