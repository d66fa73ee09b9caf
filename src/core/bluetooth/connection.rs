//! Per-device session
//! Walks the services and characteristics of one connected peripheral,
//! applies the read policy and feeds value updates into the device's
//! characteristic cache.

use std::collections::HashSet;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::bluetooth::catalog::{CharacteristicCatalog, ServiceCatalog};
use crate::core::bluetooth::notification::{
    CharacteristicSubscription, CharacteristicValue, CharacteristicValueCache,
};
use crate::core::bluetooth::policy::{ReadAction, ReadPolicy};
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{GattRef, PeripheralHandle, PeripheralId, RadioError};

/// Progress of the discovery walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Created,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
}

/// Session for the selected peripheral. Owned by the discovery manager and
/// only mutated from its event loop.
pub struct DeviceSession<S: ServiceCatalog> {
    peripheral: PeripheralHandle,
    cache: CharacteristicValueCache<S::Characteristic>,
    connected: watch::Sender<bool>,
    phase: watch::Sender<SessionPhase>,
    pending_services: HashSet<S>,
    notifying: HashSet<S::Characteristic>,
    read_requested: HashSet<S::Characteristic>,
}

impl<S: ServiceCatalog> DeviceSession<S> {
    pub fn new(peripheral: PeripheralHandle) -> Self {
        Self {
            peripheral,
            cache: CharacteristicValueCache::new(),
            connected: watch::channel(false).0,
            phase: watch::channel(SessionPhase::Created).0,
            pending_services: HashSet::new(),
            notifying: HashSet::new(),
            read_requested: HashSet::new(),
        }
    }

    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn cache(&self) -> &CharacteristicValueCache<S::Characteristic> {
        &self.cache
    }

    /// Characteristics a notification subscription was requested for
    pub fn notifying(&self) -> &HashSet<S::Characteristic> {
        &self.notifying
    }

    /// Characteristics a one-shot read was requested for
    pub fn read_requested(&self) -> &HashSet<S::Characteristic> {
        &self.read_requested
    }

    /// Application-facing view of this session
    pub fn handle(&self) -> SessionHandle<S::Characteristic> {
        SessionHandle {
            peripheral: self.peripheral.clone(),
            cache: self.cache.clone(),
            connected: self.connected.subscribe(),
            phase: self.phase.subscribe(),
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    fn set_phase(&self, phase: SessionPhase) {
        if self.phase.send_replace(phase) != phase {
            debug!("Session {} entered {:?}", self.peripheral.id, phase);
        }
    }

    /// Starts the walk by asking for the catalog's services
    pub fn discover(&mut self, radio: &dyn Radio) {
        info!("Discovering services on {}", self.peripheral.id);
        self.pending_services.clear();
        self.set_phase(SessionPhase::DiscoveringServices);
        radio.discover_services(&self.peripheral.id, &S::all_uuids());
    }

    pub fn on_services_discovered(
        &mut self,
        radio: &dyn Radio,
        services: Result<Vec<Uuid>, RadioError>,
    ) {
        let services = match services {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery on {} failed: {}", self.peripheral.id, e);
                self.set_phase(SessionPhase::Ready);
                return;
            }
        };

        for uuid in services {
            let Some(service) = S::from_uuid(uuid) else {
                debug!("Skipping unrecognized service {}", uuid);
                continue;
            };
            if !self.pending_services.insert(service) {
                continue;
            }
            info!("Discovering characteristics of {} on {}", service, self.peripheral.id);
            radio.discover_characteristics(
                &self.peripheral.id,
                service.uuid(),
                &service.characteristic_uuids(),
            );
        }

        if self.pending_services.is_empty() {
            self.set_phase(SessionPhase::Ready);
        } else {
            self.set_phase(SessionPhase::DiscoveringCharacteristics);
        }
    }

    pub fn on_characteristics_discovered(
        &mut self,
        radio: &dyn Radio,
        policy: &dyn ReadPolicy<S::Characteristic>,
        service_uuid: Uuid,
        characteristics: Result<Vec<Uuid>, RadioError>,
    ) {
        let Some(service) = S::from_uuid(service_uuid) else {
            debug!("Characteristics for unrecognized service {} ignored", service_uuid);
            return;
        };
        self.pending_services.remove(&service);

        match characteristics {
            Ok(characteristics) => {
                for uuid in characteristics {
                    self.apply_policy(radio, policy, service_uuid, uuid);
                }
            }
            Err(e) => error!(
                "Characteristic discovery for {} on {} failed: {}",
                service, self.peripheral.id, e
            ),
        }

        if self.pending_services.is_empty() {
            self.set_phase(SessionPhase::Ready);
        }
    }

    fn apply_policy(
        &mut self,
        radio: &dyn Radio,
        policy: &dyn ReadPolicy<S::Characteristic>,
        service_uuid: Uuid,
        uuid: Uuid,
    ) {
        let Some(characteristic) = S::Characteristic::from_uuid(uuid) else {
            debug!("Skipping unrecognized characteristic {}", uuid);
            return;
        };
        let gatt = GattRef::new(service_uuid, uuid);
        match policy.action(characteristic) {
            ReadAction::Notify => {
                debug!("Subscribing to {}", characteristic);
                self.notifying.insert(characteristic);
                radio.set_notify(&self.peripheral.id, gatt, true);
            }
            ReadAction::Read => {
                debug!("Reading {}", characteristic);
                self.read_requested.insert(characteristic);
                radio.read_value(&self.peripheral.id, gatt);
            }
            ReadAction::Ignore => debug!("Ignoring {}", characteristic),
        }
    }

    /// Reports the outcome of a subscribe request; the cache is unaffected
    pub fn on_notification_state_changed(
        &self,
        characteristic: GattRef,
        result: Result<bool, RadioError>,
    ) {
        let name = S::Characteristic::from_uuid(characteristic.characteristic)
            .map_or_else(|| characteristic.characteristic.to_string(), |c| c.to_string());
        match result {
            Ok(true) => info!("Characteristic is notifying: {}", name),
            Ok(false) => info!("Characteristic is not notifying: {}", name),
            Err(e) => error!("Notification state update for {} failed: {}", name, e),
        }
    }

    pub fn on_value_updated(
        &self,
        characteristic: GattRef,
        value: Result<Option<Vec<u8>>, RadioError>,
    ) {
        let bytes = match value {
            Ok(bytes) => bytes,
            Err(e) => {
                // Keep the last known value.
                error!(
                    "Value update for {} on {} failed: {}",
                    characteristic.characteristic, self.peripheral.id, e
                );
                return;
            }
        };
        let Some(kind) = S::Characteristic::from_uuid(characteristic.characteristic) else {
            debug!("Value for unrecognized characteristic {} ignored", characteristic.characteristic);
            return;
        };

        let decoded = bytes.and_then(|bytes| match kind.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to decode {} ({} bytes): {}", kind, bytes.len(), e);
                None
            }
        });
        self.cache.store(kind, decoded);
    }
}

/// Clonable view of a session for consumers outside the event loop
pub struct SessionHandle<C: CharacteristicCatalog> {
    peripheral: PeripheralHandle,
    cache: CharacteristicValueCache<C>,
    connected: watch::Receiver<bool>,
    phase: watch::Receiver<SessionPhase>,
}

impl<C: CharacteristicCatalog> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            peripheral: self.peripheral.clone(),
            cache: self.cache.clone(),
            connected: self.connected.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<C: CharacteristicCatalog> SessionHandle<C> {
    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Connection status signal
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn phase_changes(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    pub fn current_value(&self, characteristic: C) -> CharacteristicValue<C> {
        self.cache.current_value(characteristic)
    }

    pub fn subscribe(&self, characteristic: C) -> CharacteristicSubscription<C> {
        self.cache.subscribe(characteristic)
    }
}

impl<C: CharacteristicCatalog> std::fmt::Debug for SessionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peripheral", &self.peripheral)
            .field("connected", &self.is_connected())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
