use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::mock::{MockRadio, RadioCall};
use super::*;
use crate::config::CentralConfig;
use crate::core::profile::{StandardCharacteristic, StandardPolicy, StandardService, StandardValue};
use crate::store::{IdentityStore, JsonFileStore, MemoryStore};

struct Fixture {
    radio: Arc<MockRadio>,
    store: Arc<dyn IdentityStore>,
    manager: DiscoveryManager<StandardService>,
}

impl Fixture {
    fn new() -> Self {
        Self::with(CentralConfig::default(), Arc::new(MemoryStore::new()), Arc::new(MockRadio::new()))
    }

    fn with(config: CentralConfig, store: Arc<dyn IdentityStore>, radio: Arc<MockRadio>) -> Self {
        let manager = DiscoveryManager::new(radio.clone(), Arc::new(StandardPolicy), store.clone(), config);
        Self {
            radio,
            store,
            manager,
        }
    }

    async fn powered(mut self) -> Self {
        self.manager.power_on();
        self.manager
            .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
            .await;
        self.radio.take_calls();
        self
    }

    fn stored_identity(&self) -> Option<String> {
        self.store.get(LAST_KNOWN_PERIPHERAL_KEY)
    }
}

fn peripheral(platform_id: &str, name: Option<&str>) -> PeripheralHandle {
    PeripheralHandle::new(
        PeripheralId::from_platform_id(platform_id),
        name.map(str::to_string),
    )
}

fn advertised(name: Option<&str>) -> Advertisement {
    Advertisement {
        local_name: name.map(str::to_string),
        rssi: Some(-55),
        ..Advertisement::default()
    }
}

/// Selects `h`, connects it and completes the walk of the heart rate and
/// battery services
async fn walk(f: &mut Fixture, h: &PeripheralHandle) {
    f.manager.select_and_connect(h.clone()).await;
    f.manager.handle_event(RadioEvent::Connected(h.clone())).await;
    f.manager
        .handle_event(RadioEvent::ServicesDiscovered {
            peripheral: h.id,
            services: Ok(vec![UUID_HEART_RATE_SERVICE, UUID_BATTERY_SERVICE]),
        })
        .await;
    f.manager
        .handle_event(RadioEvent::CharacteristicsDiscovered {
            peripheral: h.id,
            service: UUID_HEART_RATE_SERVICE,
            characteristics: Ok(vec![UUID_HEART_RATE_MEASUREMENT, UUID_BODY_SENSOR_LOCATION]),
        })
        .await;
    f.manager
        .handle_event(RadioEvent::CharacteristicsDiscovered {
            peripheral: h.id,
            service: UUID_BATTERY_SERVICE,
            characteristics: Ok(vec![UUID_BATTERY_LEVEL]),
        })
        .await;
}

fn battery(h: &PeripheralHandle, value: Result<Option<Vec<u8>>, RadioError>) -> RadioEvent {
    RadioEvent::ValueUpdated {
        peripheral: h.id,
        characteristic: GattRef::new(UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL),
        value,
    }
}

#[tokio::test]
async fn scan_is_ignored_until_powered_on() {
    let mut f = Fixture::new();
    f.manager.start_scan();
    assert!(f.radio.calls().is_empty());

    f.manager.power_on();
    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOff))
        .await;
    f.manager.start_scan();
    assert_eq!(f.radio.take_calls(), vec![RadioCall::PowerOn]);

    let mut f = f.powered().await;
    f.manager.start_scan();
    assert_eq!(
        f.radio.calls(),
        vec![RadioCall::Scan(StandardService::all_uuids())]
    );
}

#[tokio::test]
async fn power_on_is_idempotent() {
    let mut f = Fixture::new();
    f.manager.power_on();
    f.manager.power_on();
    assert_eq!(f.radio.calls(), vec![RadioCall::PowerOn]);
}

#[tokio::test]
async fn leaving_powered_on_clears_ready_and_scanning() {
    let mut f = Fixture::new().powered().await;
    let observer = f.manager.observer();
    f.manager.handle_event(RadioEvent::ScanStateChanged(true)).await;
    assert!(observer.is_ready());
    assert!(observer.is_scanning());

    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::Unsupported))
        .await;
    assert_eq!(observer.adapter_state(), AdapterState::Unsupported);
    assert!(!observer.is_ready());
    assert!(!observer.is_scanning());
    assert!(!f.manager.is_ready());
}

#[tokio::test]
async fn candidates_are_deduplicated_with_latest_name() {
    let mut f = Fixture::new().powered().await;
    let a = peripheral("dev_a", None);
    let b = peripheral("dev_b", None);

    f.manager
        .handle_event(RadioEvent::PeripheralDiscovered {
            peripheral: a.clone(),
            advertisement: advertised(Some("Strap")),
        })
        .await;
    f.manager
        .handle_event(RadioEvent::PeripheralDiscovered {
            peripheral: b.clone(),
            advertisement: advertised(None),
        })
        .await;
    f.manager
        .handle_event(RadioEvent::PeripheralDiscovered {
            peripheral: a.clone(),
            advertisement: advertised(Some("Strap 2")),
        })
        .await;

    let candidates = f.manager.observer().candidates();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].peripheral_id(), a.id);
    assert_eq!(candidates[0].display_name, "Strap 2");
    assert_eq!(candidates[1].display_name, DEFAULT_PLACEHOLDER_NAME);
    assert_eq!(candidates[1].rssi, Some(-55));
}

#[tokio::test]
async fn select_stops_scan_connects_and_persists() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", Some("Strap"));
    f.manager.select_and_connect(h.clone()).await;

    assert_eq!(
        f.radio.calls(),
        vec![RadioCall::StopScan, RadioCall::Connect(h.id)]
    );
    assert!(f.manager.is_device_selected());
    assert_eq!(f.stored_identity(), Some(h.id.to_string()));

    let selected = f.manager.observer().selected().unwrap();
    assert_eq!(selected.peripheral().id, h.id);
    assert!(!selected.is_connected());
    assert_eq!(selected.phase(), SessionPhase::Created);
}

#[tokio::test]
async fn select_by_id_uses_the_discovered_name() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", None);
    f.manager
        .handle_event(RadioEvent::PeripheralDiscovered {
            peripheral: h.clone(),
            advertisement: advertised(Some("Strap")),
        })
        .await;
    f.manager.select(h.id).await;

    let selected = f.manager.selected().unwrap();
    assert_eq!(selected.peripheral().name.as_deref(), Some("Strap"));
}

#[tokio::test]
async fn late_connect_for_superseded_peripheral_is_ignored() {
    let mut f = Fixture::new().powered().await;
    let first = peripheral("dev_a", Some("A"));
    let second = peripheral("dev_b", Some("B"));

    f.manager.select_and_connect(first.clone()).await;
    f.manager.select_and_connect(second.clone()).await;
    assert!(f.radio.calls().contains(&RadioCall::Disconnect(first.id)));
    f.radio.take_calls();

    f.manager.handle_event(RadioEvent::Connected(first.clone())).await;
    assert!(f.radio.calls().is_empty());

    let selected = f.manager.selected().unwrap();
    assert_eq!(selected.peripheral_id(), second.id);
    assert!(!selected.is_connected());
    assert_eq!(f.stored_identity(), Some(second.id.to_string()));
}

#[tokio::test]
async fn superseded_peripheral_stays_connected_when_configured() {
    let config = CentralConfig {
        disconnect_superseded: false,
        ..CentralConfig::default()
    };
    let mut f = Fixture::with(config, Arc::new(MemoryStore::new()), Arc::new(MockRadio::new()))
        .powered()
        .await;
    f.manager.select_and_connect(peripheral("dev_a", None)).await;
    f.manager.select_and_connect(peripheral("dev_b", None)).await;
    assert!(!f
        .radio
        .calls()
        .iter()
        .any(|call| matches!(call, RadioCall::Disconnect(_))));
}

#[tokio::test]
async fn full_walk_applies_policy_and_delivers_values() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", Some("Strap"));
    walk(&mut f, &h).await;

    let hr = GattRef::new(UUID_HEART_RATE_SERVICE, UUID_HEART_RATE_MEASUREMENT);
    let location = GattRef::new(UUID_HEART_RATE_SERVICE, UUID_BODY_SENSOR_LOCATION);
    let level = GattRef::new(UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL);
    assert_eq!(
        f.radio.calls(),
        vec![
            RadioCall::StopScan,
            RadioCall::Connect(h.id),
            RadioCall::DiscoverServices(h.id, StandardService::all_uuids()),
            RadioCall::DiscoverCharacteristics(
                h.id,
                UUID_HEART_RATE_SERVICE,
                vec![UUID_HEART_RATE_MEASUREMENT, UUID_BODY_SENSOR_LOCATION]
            ),
            RadioCall::DiscoverCharacteristics(h.id, UUID_BATTERY_SERVICE, vec![UUID_BATTERY_LEVEL]),
            RadioCall::SetNotify(h.id, hr, true),
            RadioCall::ReadValue(h.id, location),
            RadioCall::SetNotify(h.id, level, true),
        ]
    );

    let selected = f.manager.observer().selected().unwrap();
    assert!(selected.is_connected());
    assert_eq!(selected.phase(), SessionPhase::Ready);

    let mut subscription = selected.subscribe(StandardCharacteristic::HeartRateMeasurement);
    assert_eq!(subscription.next().await, Some(None));

    f.manager
        .handle_event(RadioEvent::ValueUpdated {
            peripheral: h.id,
            characteristic: hr,
            value: Ok(Some(vec![0x00, 72])),
        })
        .await;

    let expected = StandardValue::HeartRate {
        bpm: 72,
        contact: None,
    };
    assert_eq!(subscription.next().await, Some(Some(expected.clone())));
    assert_eq!(
        selected.current_value(StandardCharacteristic::HeartRateMeasurement),
        Some(expected)
    );

    // A late subscriber starts from the cached value.
    let mut late = selected.subscribe(StandardCharacteristic::HeartRateMeasurement);
    assert!(matches!(
        late.next().await,
        Some(Some(StandardValue::HeartRate { bpm: 72, .. }))
    ));
}

#[tokio::test]
async fn absent_bytes_clear_the_slot_and_errors_keep_it() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", None);
    walk(&mut f, &h).await;
    let selected = f.manager.observer().selected().unwrap();

    f.manager.handle_event(battery(&h, Ok(Some(vec![90])))).await;
    assert_eq!(
        selected.current_value(StandardCharacteristic::BatteryLevel),
        Some(StandardValue::Percent(90))
    );

    f.manager
        .handle_event(battery(&h, Err(RadioError::Gatt("read failed".into()))))
        .await;
    assert_eq!(
        selected.current_value(StandardCharacteristic::BatteryLevel),
        Some(StandardValue::Percent(90))
    );

    f.manager.handle_event(battery(&h, Ok(None))).await;
    assert_eq!(selected.current_value(StandardCharacteristic::BatteryLevel), None);
}

#[tokio::test]
async fn disconnect_keeps_cached_values() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", None);
    walk(&mut f, &h).await;
    f.manager.handle_event(battery(&h, Ok(Some(vec![40])))).await;

    let selected = f.manager.observer().selected().unwrap();
    let mut connection = selected.connection();
    f.manager
        .handle_event(RadioEvent::Disconnected {
            peripheral: h.clone(),
            error: Some(RadioError::Gatt("link lost".into())),
        })
        .await;

    assert!(connection.has_changed().unwrap());
    assert!(!*connection.borrow_and_update());
    assert!(f.manager.is_device_selected());
    assert_eq!(
        selected.current_value(StandardCharacteristic::BatteryLevel),
        Some(StandardValue::Percent(40))
    );
}

#[tokio::test]
async fn adapter_power_cycle_keeps_the_selected_session() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", Some("Strap"));
    f.radio.add_known(h.clone());
    walk(&mut f, &h).await;
    f.manager.handle_event(battery(&h, Ok(Some(vec![40])))).await;

    let selected = f.manager.observer().selected().unwrap();
    let mut subscription = selected.subscribe(StandardCharacteristic::BatteryLevel);
    assert_eq!(subscription.next().await, Some(Some(StandardValue::Percent(40))));

    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOff))
        .await;
    f.manager
        .handle_event(RadioEvent::Disconnected {
            peripheral: h.clone(),
            error: None,
        })
        .await;
    f.radio.take_calls();
    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
        .await;

    assert!(f.radio.calls().contains(&RadioCall::Connect(h.id)));
    assert!(!f.radio.calls().contains(&RadioCall::Disconnect(h.id)));
    let current = f.manager.observer().selected().unwrap();
    assert_eq!(
        current.current_value(StandardCharacteristic::BatteryLevel),
        Some(StandardValue::Percent(40))
    );

    f.manager.handle_event(RadioEvent::Connected(h.clone())).await;
    assert!(f
        .radio
        .calls()
        .contains(&RadioCall::DiscoverServices(h.id, StandardService::all_uuids())));
    assert!(current.is_connected());

    f.manager.handle_event(battery(&h, Ok(Some(vec![39])))).await;
    let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap();
    assert_eq!(next, Some(Some(StandardValue::Percent(39))));
    assert_eq!(f.stored_identity(), Some(h.id.to_string()));
}

#[tokio::test]
async fn events_for_other_peripherals_are_dropped() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", None);
    let other = peripheral("dev_b", None);
    walk(&mut f, &h).await;
    f.radio.take_calls();

    f.manager.handle_event(battery(&other, Ok(Some(vec![10])))).await;
    f.manager
        .handle_event(RadioEvent::ServicesDiscovered {
            peripheral: other.id,
            services: Ok(vec![UUID_BATTERY_SERVICE]),
        })
        .await;

    assert!(f.radio.calls().is_empty());
    let selected = f.manager.selected().unwrap();
    assert!(selected.cache().populated().is_empty());
}

#[tokio::test]
async fn connection_events_refresh_candidate_state() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", Some("Strap"));
    f.manager.select_and_connect(h.clone()).await;
    f.radio.set_state(h.id, PeripheralState::Connected);
    f.manager.handle_event(RadioEvent::Connected(h.clone())).await;

    let candidate = f.manager.candidate(&h.id).unwrap();
    assert!(candidate.is_connected);
    assert_eq!(candidate.display_name, "Strap");

    f.radio.set_state(h.id, PeripheralState::Disconnected);
    f.manager
        .handle_event(RadioEvent::Disconnected {
            peripheral: h.clone(),
            error: None,
        })
        .await;
    assert!(!f.manager.observer().candidates()[0].is_connected);
}

#[tokio::test]
async fn clear_selection_forgets_the_peripheral() {
    let mut f = Fixture::new().powered().await;
    let h = peripheral("dev_a", None);
    f.manager.select_and_connect(h.clone()).await;
    f.radio.take_calls();

    f.manager.clear_selection().await;
    assert_eq!(f.radio.calls(), vec![RadioCall::Disconnect(h.id)]);
    assert!(!f.manager.is_device_selected());
    assert!(f.manager.observer().selected().is_none());
    assert_eq!(f.stored_identity(), None);
    assert_eq!(f.manager.last_known_identity(), None);
}

#[tokio::test]
async fn reconnects_to_known_peripheral_when_ready() {
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let h = peripheral("dev_a", Some("Strap"));
    store
        .set(LAST_KNOWN_PERIPHERAL_KEY, Some(&h.id.to_string()))
        .await
        .unwrap();
    let radio = Arc::new(MockRadio::new());
    radio.add_known(h.clone());

    let mut f = Fixture::with(CentralConfig::default(), store, radio);
    f.manager.power_on();
    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
        .await;

    assert!(f.radio.calls().contains(&RadioCall::Connect(h.id)));
    assert_eq!(f.manager.selected().unwrap().peripheral_id(), h.id);
}

#[tokio::test]
async fn reconnects_to_system_connected_peripheral() {
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let h = peripheral("dev_a", Some("Strap"));
    store
        .set(LAST_KNOWN_PERIPHERAL_KEY, Some(&h.id.to_string()))
        .await
        .unwrap();
    let radio = Arc::new(MockRadio::new());
    radio.add_system_connected(peripheral("dev_b", None), vec![UUID_BATTERY_SERVICE]);
    radio.add_system_connected(h.clone(), vec![UUID_HEART_RATE_SERVICE]);

    let mut f = Fixture::with(CentralConfig::default(), store, radio);
    assert!(f.manager.reconnect().await);
    assert_eq!(
        f.radio.calls(),
        vec![RadioCall::StopScan, RadioCall::Connect(h.id)]
    );
}

#[tokio::test]
async fn unreachable_peripheral_waits_for_selection() {
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let h = peripheral("dev_a", None);
    store
        .set(LAST_KNOWN_PERIPHERAL_KEY, Some(&h.id.to_string()))
        .await
        .unwrap();

    let mut f = Fixture::with(CentralConfig::default(), store, Arc::new(MockRadio::new()));
    assert!(!f.manager.reconnect().await);
    assert!(!f.manager.is_device_selected());
    assert_eq!(f.stored_identity(), Some(h.id.to_string()));
}

#[tokio::test]
async fn reconnect_only_runs_on_transition_into_powered_on() {
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let h = peripheral("dev_a", None);
    store
        .set(LAST_KNOWN_PERIPHERAL_KEY, Some(&h.id.to_string()))
        .await
        .unwrap();
    let radio = Arc::new(MockRadio::new());
    radio.add_known(h.clone());

    let mut f = Fixture::with(CentralConfig::default(), store, radio);
    for _ in 0..2 {
        f.manager
            .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
            .await;
    }
    let connects = f
        .radio
        .calls()
        .iter()
        .filter(|call| matches!(call, RadioCall::Connect(_)))
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn scan_on_ready_without_last_known_peripheral() {
    let config = CentralConfig {
        scan_on_ready: true,
        ..CentralConfig::default()
    };
    let f = Fixture::with(config, Arc::new(MemoryStore::new()), Arc::new(MockRadio::new()));
    let mut manager = f.manager;
    manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
        .await;
    assert_eq!(
        f.radio.calls(),
        vec![RadioCall::Scan(StandardService::all_uuids())]
    );
}

#[tokio::test]
async fn last_known_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    let h = peripheral("dev_a", Some("Strap"));

    {
        let store = Arc::new(JsonFileStore::open(&path).await);
        let mut f = Fixture::with(CentralConfig::default(), store, Arc::new(MockRadio::new()))
            .powered()
            .await;
        f.manager.select_and_connect(h.clone()).await;
    }

    let radio = Arc::new(MockRadio::new());
    radio.add_known(h.clone());
    let mut f = Fixture::with(CentralConfig::default(), Arc::new(JsonFileStore::open(&path).await), radio);
    assert_eq!(f.manager.last_known_identity(), Some(h.id));

    f.manager.power_on();
    f.manager
        .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
        .await;
    assert!(f.radio.calls().contains(&RadioCall::Connect(h.id)));
}

#[tokio::test]
async fn spawned_manager_processes_commands_and_events() {
    let radio = Arc::new(MockRadio::new());
    let manager = DiscoveryManager::<StandardService>::new(
        radio.clone(),
        Arc::new(StandardPolicy),
        Arc::new(MemoryStore::new()),
        CentralConfig::default(),
    );
    let (events, rx) = mpsc::unbounded_channel();
    let (handle, task) = manager.spawn(rx);
    let observer = handle.observer().clone();

    handle.power_on().unwrap();
    events
        .send(RadioEvent::StateChanged(AdapterState::PoweredOn))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), observer.ready_changes().wait_for(|ready| *ready))
        .await
        .unwrap()
        .unwrap();

    handle.start_scan().unwrap();
    let h = peripheral("dev_a", Some("Strap"));
    events
        .send(RadioEvent::PeripheralDiscovered {
            peripheral: h.clone(),
            advertisement: advertised(Some("Strap")),
        })
        .unwrap();
    let mut candidates = observer.candidate_changes();
    tokio::time::timeout(Duration::from_secs(1), candidates.wait_for(|c| !c.is_empty()))
        .await
        .unwrap()
        .unwrap();

    handle.select(h.id).unwrap();
    let mut selection = observer.selection_changes();
    tokio::time::timeout(Duration::from_secs(1), selection.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap();

    handle.shutdown();
    task.await.unwrap();
    assert!(handle.start_scan().is_err());

    let calls = radio.calls();
    assert!(calls.contains(&RadioCall::PowerOn));
    assert!(calls.contains(&RadioCall::Scan(StandardService::all_uuids())));
    assert!(calls.contains(&RadioCall::Connect(h.id)));
}
