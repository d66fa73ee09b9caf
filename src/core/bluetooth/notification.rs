//! Characteristic value distribution
//! Each characteristic gets one lazily created `watch` slot holding its latest
//! decoded value. Subscribers see the current value first and then every
//! update; a slow subscriber only ever misses intermediate values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::core::bluetooth::catalog::CharacteristicCatalog;

/// Latest decoded value of a characteristic; `None` until one arrives
pub type CharacteristicValue<C> = Option<<C as CharacteristicCatalog>::Value>;

type Slot<C> = watch::Sender<CharacteristicValue<C>>;

/// Per-device map from characteristic to its latest value.
///
/// Cloning yields another handle onto the same slots. Only the owning
/// session writes; everybody else reads or subscribes.
pub struct CharacteristicValueCache<C: CharacteristicCatalog> {
    slots: Arc<Mutex<HashMap<C, Slot<C>>>>,
}

impl<C: CharacteristicCatalog> Clone for CharacteristicValueCache<C> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<C: CharacteristicCatalog> Default for CharacteristicValueCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CharacteristicCatalog> CharacteristicValueCache<C> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<C, Slot<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live view of one characteristic, starting with its current value
    pub fn subscribe(&self, characteristic: C) -> CharacteristicSubscription<C> {
        let receiver = self
            .lock()
            .entry(characteristic)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        CharacteristicSubscription {
            characteristic,
            receiver,
            initial_pending: true,
        }
    }

    /// Snapshot of the latest value; never blocks on producers
    pub fn current_value(&self, characteristic: C) -> CharacteristicValue<C> {
        self.lock()
            .get(&characteristic)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Characteristics that currently hold a value
    pub fn populated(&self) -> Vec<C> {
        self.lock()
            .iter()
            .filter(|(_, slot)| slot.borrow().is_some())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Replaces the slot's value and wakes every subscriber
    pub(crate) fn store(&self, characteristic: C, value: CharacteristicValue<C>) {
        debug!("Publishing {}: {:?}", characteristic, value);
        self.lock()
            .entry(characteristic)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(value);
    }
}

/// Subscription to one characteristic of one device.
///
/// Ends once the owning cache is gone.
pub struct CharacteristicSubscription<C: CharacteristicCatalog> {
    characteristic: C,
    receiver: watch::Receiver<CharacteristicValue<C>>,
    initial_pending: bool,
}

impl<C: CharacteristicCatalog> CharacteristicSubscription<C> {
    pub fn characteristic(&self) -> C {
        self.characteristic
    }

    pub fn current(&self) -> CharacteristicValue<C> {
        self.receiver.borrow().clone()
    }

    /// Yields the current value on the first call, then waits for each
    /// subsequent update. Returns `None` when the cache has been dropped.
    pub async fn next(&mut self) -> Option<CharacteristicValue<C>> {
        if self.initial_pending {
            self.initial_pending = false;
            return Some(self.receiver.borrow_and_update().clone());
        }
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Continues the sequence of [`next`](Self::next) as a `Stream`: the
    /// current value comes first only if `next` has not yielded it yet.
    pub fn into_stream(self) -> WatchStream<CharacteristicValue<C>> {
        if self.initial_pending {
            WatchStream::new(self.receiver)
        } else {
            WatchStream::from_changes(self.receiver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::{StandardCharacteristic, StandardValue};
    use futures_util::StreamExt;

    type Cache = CharacteristicValueCache<StandardCharacteristic>;

    #[test]
    fn current_value_starts_absent() {
        let cache = Cache::new();
        assert_eq!(cache.current_value(StandardCharacteristic::BatteryLevel), None);
        assert!(cache.populated().is_empty());
    }

    #[test]
    fn last_write_wins() {
        let cache = Cache::new();
        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(80)));
        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(79)));
        assert_eq!(
            cache.current_value(StandardCharacteristic::BatteryLevel),
            Some(StandardValue::Percent(79))
        );
        assert_eq!(cache.populated(), vec![StandardCharacteristic::BatteryLevel]);
    }

    #[tokio::test]
    async fn subscriber_gets_current_then_updates() {
        let cache = Cache::new();
        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(50)));

        let mut sub = cache.subscribe(StandardCharacteristic::BatteryLevel);
        assert_eq!(sub.next().await, Some(Some(StandardValue::Percent(50))));

        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(49)));
        assert_eq!(sub.next().await, Some(Some(StandardValue::Percent(49))));
    }

    #[tokio::test]
    async fn every_subscriber_is_notified() {
        let cache = Cache::new();
        let mut first = cache.subscribe(StandardCharacteristic::HeartRateMeasurement);
        let mut second = cache.subscribe(StandardCharacteristic::HeartRateMeasurement);
        assert_eq!(first.next().await, Some(None));
        assert_eq!(second.next().await, Some(None));

        let value = Some(StandardValue::HeartRate { bpm: 72, contact: None });
        cache.store(StandardCharacteristic::HeartRateMeasurement, value.clone());
        assert_eq!(first.next().await, Some(value.clone()));
        assert_eq!(second.next().await, Some(value));
    }

    #[tokio::test]
    async fn subscription_ends_with_the_cache() {
        let cache = Cache::new();
        let mut sub = cache.subscribe(StandardCharacteristic::BatteryLevel);
        assert_eq!(sub.next().await, Some(None));
        drop(cache);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn stream_yields_current_value_first() {
        let cache = Cache::new();
        cache.store(StandardCharacteristic::ModelNumber, Some(StandardValue::Text("X1".into())));
        let mut stream = cache.subscribe(StandardCharacteristic::ModelNumber).into_stream();
        assert_eq!(stream.next().await, Some(Some(StandardValue::Text("X1".into()))));
    }

    #[tokio::test]
    async fn stream_after_next_skips_the_seen_value() {
        let cache = Cache::new();
        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(50)));
        let mut sub = cache.subscribe(StandardCharacteristic::BatteryLevel);
        assert_eq!(sub.next().await, Some(Some(StandardValue::Percent(50))));

        let mut stream = sub.into_stream();
        cache.store(StandardCharacteristic::BatteryLevel, Some(StandardValue::Percent(49)));
        assert_eq!(stream.next().await, Some(Some(StandardValue::Percent(49))));
    }
}
