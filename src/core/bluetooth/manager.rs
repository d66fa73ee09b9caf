//! Bluetooth manager
//! Owns the adapter lifecycle, the set of discovered peripherals, the single
//! selected device session and the reconnection policy. Every method here
//! runs on the manager's event loop; consumers observe the published
//! snapshots through a [`ManagerObserver`].

use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::CentralConfig;
use crate::core::bluetooth::catalog::{CharacteristicCatalog, ServiceCatalog};
use crate::core::bluetooth::connection::{DeviceSession, SessionHandle};
use crate::core::bluetooth::device::DiscoveredPeripheral;
use crate::core::bluetooth::policy::ReadPolicy;
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{
    AdapterState, Advertisement, PeripheralHandle, PeripheralId, PeripheralState, RadioError,
    RadioEvent,
};
use crate::store::IdentityStore;

/// Manages discovery, selection and reconnection
pub struct DiscoveryManager<S: ServiceCatalog> {
    radio: Arc<dyn Radio>,
    policy: Arc<dyn ReadPolicy<S::Characteristic>>,
    store: Arc<dyn IdentityStore>,
    config: CentralConfig,
    /// Whether the radio has been asked to power on
    powered: bool,
    adapter_state: watch::Sender<AdapterState>,
    ready: watch::Sender<bool>,
    scanning: watch::Sender<bool>,
    /// Discovered peripherals in first-seen order
    candidates: IndexMap<PeripheralId, DiscoveredPeripheral>,
    candidates_tx: watch::Sender<Vec<DiscoveredPeripheral>>,
    /// Currently selected device
    session: Option<DeviceSession<S>>,
    selected_tx: watch::Sender<Option<SessionHandle<S::Characteristic>>>,
}

impl<S: ServiceCatalog> DiscoveryManager<S> {
    /// Creates a new DiscoveryManager. Nothing happens until [`power_on`](Self::power_on).
    pub fn new(
        radio: Arc<dyn Radio>,
        policy: Arc<dyn ReadPolicy<S::Characteristic>>,
        store: Arc<dyn IdentityStore>,
        config: CentralConfig,
    ) -> Self {
        Self {
            radio,
            policy,
            store,
            config,
            powered: false,
            adapter_state: watch::channel(AdapterState::Unknown).0,
            ready: watch::channel(false).0,
            scanning: watch::channel(false).0,
            candidates: IndexMap::new(),
            candidates_tx: watch::channel(Vec::new()).0,
            session: None,
            selected_tx: watch::channel(None).0,
        }
    }

    /// Read-only view for consumers on other tasks
    pub fn observer(&self) -> ManagerObserver<S::Characteristic> {
        ManagerObserver {
            adapter_state: self.adapter_state.subscribe(),
            ready: self.ready.subscribe(),
            scanning: self.scanning.subscribe(),
            candidates: self.candidates_tx.subscribe(),
            selected: self.selected_tx.subscribe(),
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &DiscoveredPeripheral> {
        self.candidates.values()
    }

    pub fn candidate(&self, id: &PeripheralId) -> Option<&DiscoveredPeripheral> {
        self.candidates.get(id)
    }

    pub fn selected(&self) -> Option<&DeviceSession<S>> {
        self.session.as_ref()
    }

    pub fn is_device_selected(&self) -> bool {
        self.session.is_some()
    }

    /// Identifier of the most recently selected peripheral, from the store
    pub fn last_known_identity(&self) -> Option<PeripheralId> {
        let raw = self.store.get(&self.config.last_known_key)?;
        match raw.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Ignoring malformed last known peripheral {:?}: {}", raw, e);
                None
            }
        }
    }

    /// Asks the radio to bring the adapter up. Idempotent.
    pub fn power_on(&mut self) {
        if self.powered {
            return;
        }
        info!("Powering on Bluetooth adapter");
        self.powered = true;
        self.radio.power_on();
    }

    /// Processes one radio callback
    pub async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged(state) => self.on_adapter_state_changed(state).await,
            RadioEvent::ScanStateChanged(scanning) => self.on_scan_state_changed(scanning),
            RadioEvent::PeripheralDiscovered {
                peripheral,
                advertisement,
            } => self.on_peripheral_discovered(&peripheral, &advertisement),
            RadioEvent::Connected(peripheral) => self.on_connected(&peripheral).await,
            RadioEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(&peripheral, error.as_ref()).await;
            }
            RadioEvent::ServicesDiscovered {
                peripheral,
                services,
            } => match self.session.as_mut() {
                Some(session) if session.peripheral_id() == peripheral => {
                    session.on_services_discovered(self.radio.as_ref(), services);
                }
                _ => debug!("Dropping services discovered for stale peripheral {}", peripheral),
            },
            RadioEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => match self.session.as_mut() {
                Some(session) if session.peripheral_id() == peripheral => {
                    session.on_characteristics_discovered(
                        self.radio.as_ref(),
                        self.policy.as_ref(),
                        service,
                        characteristics,
                    );
                }
                _ => debug!(
                    "Dropping characteristics discovered for stale peripheral {}",
                    peripheral
                ),
            },
            RadioEvent::NotificationStateChanged {
                peripheral,
                characteristic,
                result,
            } => match self.session.as_ref() {
                Some(session) if session.peripheral_id() == peripheral => {
                    session.on_notification_state_changed(characteristic, result);
                }
                _ => debug!("Dropping notification state for stale peripheral {}", peripheral),
            },
            RadioEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => match self.session.as_ref() {
                Some(session) if session.peripheral_id() == peripheral => {
                    session.on_value_updated(characteristic, value);
                }
                _ => debug!("Dropping value update for stale peripheral {}", peripheral),
            },
        }
    }

    pub async fn on_adapter_state_changed(&mut self, state: AdapterState) {
        let previous = self.adapter_state.send_replace(state);
        info!("Bluetooth adapter state: {} -> {}", previous, state);

        if !state.is_ready() {
            self.ready.send_replace(false);
            self.scanning.send_replace(false);
            if matches!(state, AdapterState::Unsupported | AdapterState::Unauthorized) {
                warn!("Bluetooth is {}; scanning and connecting are disabled", state);
            }
            return;
        }
        if previous.is_ready() {
            return;
        }

        self.ready.send_replace(true);
        let reconnecting = self.config.reconnect_on_ready && self.reconnect().await;
        if !reconnecting && self.config.scan_on_ready {
            self.start_scan();
        }
    }

    /// Scans for the catalog's services
    pub fn start_scan(&mut self) {
        self.start_scan_filtered(&S::all_uuids());
    }

    /// Scans for peripherals advertising any of `services`. Ignored until the
    /// adapter is powered on.
    pub fn start_scan_filtered(&mut self, services: &[Uuid]) {
        if !self.adapter_state().is_ready() {
            debug!("Scan requested while adapter is {}; ignored", self.adapter_state());
            return;
        }
        info!("Starting Bluetooth scan for {} services", services.len());
        self.radio.scan(services);
    }

    pub fn stop_scan(&mut self) {
        info!("Stopping Bluetooth scan.");
        self.radio.stop_scan();
    }

    pub fn on_scan_state_changed(&mut self, scanning: bool) {
        debug!("Scanning: {}", scanning);
        self.scanning.send_replace(scanning);
    }

    pub fn on_peripheral_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        advertisement: &Advertisement,
    ) {
        let placeholder = &self.config.placeholder_name;
        let record = self
            .candidates
            .entry(peripheral.id)
            .or_insert_with(|| DiscoveredPeripheral::new(peripheral, placeholder));
        record.update_from_advertisement(peripheral, advertisement, placeholder);
        debug!(
            "Found device - ID: {}, Name: {}, RSSI: {:?}",
            record.id, record.display_name, record.rssi
        );
        self.publish_candidates();
    }

    /// Stops scanning, requests a connection to `peripheral` and makes it the
    /// selected device right away so its status can be observed while the
    /// connection is pending.
    ///
    /// Selecting the peripheral that is already selected keeps its session,
    /// so cached values and existing subscriptions carry over.
    pub async fn select_and_connect(&mut self, peripheral: PeripheralHandle) {
        info!(
            "Selecting {} ({})",
            peripheral.title(&self.config.placeholder_name),
            peripheral.id
        );
        self.radio.stop_scan();
        self.release_superseded(Some(peripheral.id));
        self.radio.connect(&peripheral.id);

        let id = peripheral.id;
        if self.session.as_ref().is_some_and(|s| s.peripheral_id() == id) {
            debug!("Keeping existing session for {}", id);
        } else {
            let session = DeviceSession::new(peripheral);
            self.selected_tx.send_replace(Some(session.handle()));
            self.session = Some(session);
        }
        self.persist_selection(Some(id)).await;
    }

    /// Selects a discovered peripheral by identifier
    pub async fn select(&mut self, id: PeripheralId) {
        let peripheral = self
            .candidates
            .get(&id)
            .map_or_else(|| PeripheralHandle::new(id, None), |c| c.handle().clone());
        self.select_and_connect(peripheral).await;
    }

    /// Drops the current session and forgets the last known peripheral
    pub async fn clear_selection(&mut self) {
        info!("Clearing device selection");
        self.release_superseded(None);
        self.session = None;
        self.selected_tx.send_replace(None);
        self.persist_selection(None).await;
    }

    fn release_superseded(&self, next: Option<PeripheralId>) {
        let Some(current) = self.session.as_ref().map(DeviceSession::peripheral_id) else {
            return;
        };
        if self.config.disconnect_superseded && next != Some(current) {
            debug!("Disconnecting superseded peripheral {}", current);
            self.radio.disconnect(&current);
        }
    }

    pub async fn on_connected(&mut self, peripheral: &PeripheralHandle) {
        info!(
            "Connected {} ({})",
            peripheral.title(&self.config.placeholder_name),
            peripheral.id
        );
        self.upsert_from_handle(peripheral);
        self.refresh_candidates().await;

        match self.session.as_mut() {
            Some(session) if session.peripheral_id() == peripheral.id => {
                session.discover(self.radio.as_ref());
                session.set_connected(true);
            }
            Some(session) => debug!(
                "Ignoring connect for {}; {} is selected",
                peripheral.id,
                session.peripheral_id()
            ),
            None => debug!("Ignoring connect for {}; nothing selected", peripheral.id),
        }
    }

    pub async fn on_disconnected(&mut self, peripheral: &PeripheralHandle, reason: Option<&RadioError>) {
        match reason {
            Some(e) => info!("Disconnected {}: {}", peripheral.id, e),
            None => info!("Disconnected {}", peripheral.id),
        }
        self.refresh_candidates().await;

        if let Some(session) = self.session.as_ref() {
            if session.peripheral_id() == peripheral.id {
                // Cached values stay readable until the selection changes.
                session.set_connected(false);
            }
        }
    }

    /// Reconnects to the last known peripheral, first through a direct
    /// lookup, then among the peripherals already connected to the system.
    /// Returns whether a connection was requested.
    pub async fn reconnect(&mut self) -> bool {
        let Some(last_known) = self.last_known_identity() else {
            debug!("No last known peripheral to reconnect to");
            return false;
        };

        let known = self.radio.retrieve_peripherals(&[last_known]).await;
        if let Some(peripheral) = known.into_iter().find(|p| p.id == last_known) {
            info!("Reconnecting to known peripheral {}", last_known);
            self.select_and_connect(peripheral).await;
            return true;
        }

        let connected = self
            .radio
            .retrieve_connected_peripherals(&S::all_uuids())
            .await;
        if let Some(peripheral) = connected.into_iter().find(|p| p.id == last_known) {
            info!("Reconnecting to system-connected peripheral {}", last_known);
            self.select_and_connect(peripheral).await;
            return true;
        }

        info!("Last known peripheral {} is not reachable; waiting for a manual selection", last_known);
        false
    }

    fn upsert_from_handle(&mut self, peripheral: &PeripheralHandle) {
        let placeholder = &self.config.placeholder_name;
        self.candidates
            .entry(peripheral.id)
            .or_insert_with(|| DiscoveredPeripheral::new(peripheral, placeholder))
            .update_from_handle(peripheral);
    }

    /// Re-reads every candidate's connection state from the radio
    async fn refresh_candidates(&mut self) {
        for (id, candidate) in &mut self.candidates {
            candidate.is_connected =
                self.radio.peripheral_state(id).await == PeripheralState::Connected;
        }
        self.publish_candidates();
    }

    fn publish_candidates(&self) {
        self.candidates_tx
            .send_replace(self.candidates.values().cloned().collect());
    }

    async fn persist_selection(&self, id: Option<PeripheralId>) {
        let value = id.map(|id| id.to_string());
        if let Err(e) = self
            .store
            .set(&self.config.last_known_key, value.as_deref())
            .await
        {
            error!("Failed to persist last known peripheral: {}", e);
        }
    }
}

/// Snapshots of the manager's published state.
///
/// Every receiver is updated at the point the manager mutates the value.
#[derive(Clone)]
pub struct ManagerObserver<C: CharacteristicCatalog> {
    adapter_state: watch::Receiver<AdapterState>,
    ready: watch::Receiver<bool>,
    scanning: watch::Receiver<bool>,
    candidates: watch::Receiver<Vec<DiscoveredPeripheral>>,
    selected: watch::Receiver<Option<SessionHandle<C>>>,
}

impl<C: CharacteristicCatalog> ManagerObserver<C> {
    pub fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    pub fn candidates(&self) -> Vec<DiscoveredPeripheral> {
        self.candidates.borrow().clone()
    }

    pub fn selected(&self) -> Option<SessionHandle<C>> {
        self.selected.borrow().clone()
    }

    pub fn ready_changes(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    pub fn scanning_changes(&self) -> watch::Receiver<bool> {
        self.scanning.clone()
    }

    pub fn candidate_changes(&self) -> watch::Receiver<Vec<DiscoveredPeripheral>> {
        self.candidates.clone()
    }

    pub fn selection_changes(&self) -> watch::Receiver<Option<SessionHandle<C>>> {
        self.selected.clone()
    }
}
