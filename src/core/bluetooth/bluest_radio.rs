//! Radio backend over the `bluest` crate
//! Every request runs on its own tokio task and reports back through the
//! event channel. Devices, services and characteristics seen so far are kept
//! so later requests can address them by identifier.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use bluest::{Adapter, AdapterEvent, AdvertisingDevice, Characteristic, ConnectionEvent, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{
    AdapterState, Advertisement, GattRef, PeripheralHandle, PeripheralId, PeripheralState,
    RadioError, RadioEvent,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn radio_error(e: bluest::Error) -> RadioError {
    RadioError::Gatt(e.to_string())
}

fn peripheral_id(device: &Device) -> PeripheralId {
    PeripheralId::from_platform_id(&device.id().to_string())
}

fn handle_for(device: &Device) -> PeripheralHandle {
    PeripheralHandle::new(peripheral_id(device), device.name().ok())
}

/// [`Radio`] implementation for the platform Bluetooth stack
#[derive(Clone)]
pub struct BluestRadio {
    inner: Arc<Inner>,
}

struct Inner {
    events: mpsc::UnboundedSender<RadioEvent>,
    adapter: OnceLock<Adapter>,
    devices: Mutex<HashMap<PeripheralId, Device>>,
    services: Mutex<HashMap<(PeripheralId, Uuid), Service>>,
    characteristics: Mutex<HashMap<(PeripheralId, GattRef), Characteristic>>,
    scan_cancel: Mutex<Option<CancellationToken>>,
    notify_cancel: Mutex<HashMap<(PeripheralId, GattRef), CancellationToken>>,
}

impl BluestRadio {
    /// Creates the radio; events are delivered on `events`
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                adapter: OnceLock::new(),
                devices: Mutex::new(HashMap::new()),
                services: Mutex::new(HashMap::new()),
                characteristics: Mutex::new(HashMap::new()),
                scan_cancel: Mutex::new(None),
                notify_cancel: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates the radio together with the receiving end of its event channel
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Inner {
    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Radio event dropped; no receiver");
        }
    }

    fn adapter(&self) -> Option<Adapter> {
        self.adapter.get().cloned()
    }

    fn device(&self, id: &PeripheralId) -> Option<Device> {
        lock(&self.devices).get(id).cloned()
    }

    fn remember(&self, device: &Device) -> PeripheralHandle {
        let handle = handle_for(device);
        lock(&self.devices).insert(handle.id, device.clone());
        handle
    }

    /// Opens the default adapter and forwards its availability changes
    async fn watch_adapter(&self) -> Result<()> {
        let Some(adapter) = Adapter::default().await else {
            warn!("No Bluetooth adapter found");
            self.emit(RadioEvent::StateChanged(AdapterState::Unsupported));
            return Ok(());
        };
        let adapter = self.adapter.get_or_init(|| adapter).clone();

        let events = adapter.events().await?;
        let mut events = pin!(events);
        let state = if adapter.is_available().await.unwrap_or(false) {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        };
        self.emit(RadioEvent::StateChanged(state));

        while let Some(event) = events.next().await {
            match event {
                Ok(AdapterEvent::Available) => {
                    self.emit(RadioEvent::StateChanged(AdapterState::PoweredOn));
                }
                Ok(AdapterEvent::Unavailable) => {
                    self.emit(RadioEvent::StateChanged(AdapterState::PoweredOff));
                }
                Err(e) => {
                    error!("Adapter event stream failed: {}", e);
                    self.emit(RadioEvent::StateChanged(AdapterState::Resetting));
                    break;
                }
            }
        }
        info!("Adapter event stream has ended.");
        Ok(())
    }

    async fn scan_task(&self, adapter: Adapter, services: Vec<Uuid>, cancel: CancellationToken) -> Result<()> {
        info!("Starting bluetooth scan");
        let stream = adapter.scan(&services).await?;
        let mut stream = pin!(stream);
        self.emit(RadioEvent::ScanStateChanged(true));

        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(discovered) => self.on_advertisement(discovered),
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                // stop_scan reports the state change itself
                _ = cancel.cancelled() => return Ok(()),
            }
        }

        self.emit(RadioEvent::ScanStateChanged(false));
        Ok(())
    }

    fn on_advertisement(&self, discovered: AdvertisingDevice) {
        let device = discovered.device;
        let adv_data = discovered.adv_data;
        let rssi = discovered.rssi;
        debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);

        let mut peripheral = self.remember(&device);
        if adv_data.local_name.is_some() {
            peripheral.name.clone_from(&adv_data.local_name);
        }
        let advertisement = Advertisement {
            local_name: adv_data.local_name,
            rssi,
            services: adv_data.services.to_vec(),
            is_connectable: adv_data.is_connectable,
        };
        self.emit(RadioEvent::PeripheralDiscovered {
            peripheral,
            advertisement,
        });
    }

    /// Reports the disconnect of a connected device
    async fn watch_connection(&self, adapter: Adapter, device: Device) -> Result<()> {
        let events = adapter.device_connection_events(&device).await?;
        let mut events = pin!(events);
        while let Some(event) = events.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                self.stop_notifications(&peripheral_id(&device));
                self.emit(RadioEvent::Disconnected {
                    peripheral: handle_for(&device),
                    error: None,
                });
                break;
            }
        }
        Ok(())
    }

    async fn discover_services(
        &self,
        id: PeripheralId,
        device: Device,
        filter: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, bluest::Error> {
        let mut found = Vec::new();
        for uuid in filter {
            for service in device.discover_services_with_uuid(uuid).await? {
                let service_uuid = service.uuid();
                lock(&self.services).insert((id, service_uuid), service);
                found.push(service_uuid);
            }
        }
        Ok(found)
    }

    async fn discover_characteristics(
        &self,
        id: PeripheralId,
        service: Service,
        filter: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, bluest::Error> {
        let service_uuid = service.uuid();
        let mut found = Vec::new();
        for uuid in filter {
            for characteristic in service.discover_characteristics_with_uuid(uuid).await? {
                let characteristic_uuid = characteristic.uuid();
                lock(&self.characteristics).insert(
                    (id, GattRef::new(service_uuid, characteristic_uuid)),
                    characteristic,
                );
                found.push(characteristic_uuid);
            }
        }
        Ok(found)
    }

    async fn notify_task(
        &self,
        peripheral: PeripheralId,
        gatt: GattRef,
        characteristic: Characteristic,
        cancel: CancellationToken,
    ) {
        let stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                lock(&self.notify_cancel).remove(&(peripheral, gatt));
                self.emit(RadioEvent::NotificationStateChanged {
                    peripheral,
                    characteristic: gatt,
                    result: Err(radio_error(e)),
                });
                return;
            }
        };
        let mut stream = pin!(stream);
        self.emit(RadioEvent::NotificationStateChanged {
            peripheral,
            characteristic: gatt,
            result: Ok(true),
        });

        loop {
            tokio::select! {
                item = stream.next() => {
                    let value = match item {
                        Some(Ok(bytes)) => Ok(Some(bytes)),
                        Some(Err(e)) => Err(radio_error(e)),
                        None => break,
                    };
                    self.emit(RadioEvent::ValueUpdated { peripheral, characteristic: gatt, value });
                }
                _ = cancel.cancelled() => break,
            }
        }
        debug!("Notification stream for {} ended", gatt.characteristic);
    }

    fn stop_notifications(&self, peripheral: &PeripheralId) {
        lock(&self.notify_cancel).retain(|(id, _), token| {
            if id == peripheral {
                token.cancel();
                false
            } else {
                true
            }
        });
    }
}

#[async_trait]
impl Radio for BluestRadio {
    fn power_on(&self) {
        if self.inner.adapter.get().is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.watch_adapter().await {
                error!("Bluetooth adapter task failed: {:?}", e);
            }
        });
    }

    fn scan(&self, services: &[Uuid]) {
        let Some(adapter) = self.inner.adapter() else {
            warn!("Scan requested before the adapter is available");
            return;
        };
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.scan_cancel).replace(cancel.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let services = services.to_vec();
        tokio::spawn(async move {
            if let Err(e) = inner.scan_task(adapter, services, cancel).await {
                error!("Scan task finished with an error: {:?}", e);
                inner.emit(RadioEvent::ScanStateChanged(false));
            }
        });
    }

    fn stop_scan(&self) {
        if let Some(cancel) = lock(&self.inner.scan_cancel).take() {
            cancel.cancel();
        }
        self.inner.emit(RadioEvent::ScanStateChanged(false));
    }

    fn connect(&self, peripheral: &PeripheralId) {
        let (Some(adapter), Some(device)) = (self.inner.adapter(), self.inner.device(peripheral)) else {
            warn!("Cannot connect to {}: device not known to the adapter", peripheral);
            return;
        };
        let inner = Arc::clone(&self.inner);
        let id = *peripheral;
        tokio::spawn(async move {
            info!("Initiating connection to {}...", id);
            if let Err(e) = adapter.connect_device(&device).await {
                error!("Connection to {} failed: {}", id, e);
                return;
            }
            inner.emit(RadioEvent::Connected(handle_for(&device)));
            if let Err(e) = inner.watch_connection(adapter, device).await {
                warn!("Lost connection events for {}: {:?}", id, e);
            }
        });
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        self.inner.stop_notifications(peripheral);
        let (Some(adapter), Some(device)) = (self.inner.adapter(), self.inner.device(peripheral)) else {
            return;
        };
        let id = *peripheral;
        tokio::spawn(async move {
            info!("Disconnecting from device {}", id);
            if let Err(e) = adapter.disconnect_device(&device).await {
                error!("Failed to disconnect {}: {}", id, e);
            }
        });
    }

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        let id = *peripheral;
        let Some(device) = self.inner.device(peripheral) else {
            self.inner.emit(RadioEvent::ServicesDiscovered {
                peripheral: id,
                services: Err(RadioError::UnknownPeripheral(id)),
            });
            return;
        };
        let inner = Arc::clone(&self.inner);
        let filter = services.to_vec();
        tokio::spawn(async move {
            let services = inner
                .discover_services(id, device, filter)
                .await
                .map_err(radio_error);
            inner.emit(RadioEvent::ServicesDiscovered {
                peripheral: id,
                services,
            });
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let id = *peripheral;
        let Some(found) = lock(&self.inner.services).get(&(id, service)).cloned() else {
            self.inner.emit(RadioEvent::CharacteristicsDiscovered {
                peripheral: id,
                service,
                characteristics: Err(RadioError::UnknownAttribute(service)),
            });
            return;
        };
        let inner = Arc::clone(&self.inner);
        let filter = characteristics.to_vec();
        tokio::spawn(async move {
            let characteristics = inner
                .discover_characteristics(id, found, filter)
                .await
                .map_err(radio_error);
            inner.emit(RadioEvent::CharacteristicsDiscovered {
                peripheral: id,
                service,
                characteristics,
            });
        });
    }

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: GattRef, enabled: bool) {
        let id = *peripheral;
        if !enabled {
            if let Some(cancel) = lock(&self.inner.notify_cancel).remove(&(id, characteristic)) {
                cancel.cancel();
            }
            self.inner.emit(RadioEvent::NotificationStateChanged {
                peripheral: id,
                characteristic,
                result: Ok(false),
            });
            return;
        }

        let Some(found) = lock(&self.inner.characteristics).get(&(id, characteristic)).cloned() else {
            self.inner.emit(RadioEvent::NotificationStateChanged {
                peripheral: id,
                characteristic,
                result: Err(RadioError::UnknownAttribute(characteristic.characteristic)),
            });
            return;
        };
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.notify_cancel).insert((id, characteristic), cancel.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.notify_task(id, characteristic, found, cancel).await;
        });
    }

    fn read_value(&self, peripheral: &PeripheralId, characteristic: GattRef) {
        let id = *peripheral;
        let Some(found) = lock(&self.inner.characteristics).get(&(id, characteristic)).cloned() else {
            self.inner.emit(RadioEvent::ValueUpdated {
                peripheral: id,
                characteristic,
                value: Err(RadioError::UnknownAttribute(characteristic.characteristic)),
            });
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let value = found.read().await.map(Some).map_err(radio_error);
            inner.emit(RadioEvent::ValueUpdated {
                peripheral: id,
                characteristic,
                value,
            });
        });
    }

    /// Resolves ids against devices seen this run, then against devices the
    /// system currently has connected. Platform ids that are not UUIDs are
    /// hashed into a `PeripheralId` and cannot be turned back into a
    /// `bluest::DeviceId`, so a bonded peripheral that is neither cached nor
    /// connected is not found after a restart; it has to be scanned for again.
    async fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralHandle> {
        let mut found: Vec<PeripheralHandle> = {
            let devices = lock(&self.inner.devices);
            identifiers
                .iter()
                .filter_map(|id| devices.get(id).map(handle_for))
                .collect()
        };
        if found.len() == identifiers.len() {
            return found;
        }
        let Some(adapter) = self.inner.adapter() else {
            return found;
        };
        match adapter.connected_devices().await {
            Ok(devices) => {
                for device in devices {
                    let id = peripheral_id(&device);
                    if identifiers.contains(&id) && !found.iter().any(|p| p.id == id) {
                        found.push(self.inner.remember(&device));
                    }
                }
            }
            Err(e) => error!("Failed to list connected devices: {}", e),
        }
        found
    }

    async fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralHandle> {
        let Some(adapter) = self.inner.adapter() else {
            return Vec::new();
        };
        info!("Checking for connected devices");
        match adapter.connected_devices_with_services(services).await {
            Ok(devices) => devices.iter().map(|d| self.inner.remember(d)).collect(),
            Err(e) => {
                error!("Failed to list connected devices: {}", e);
                Vec::new()
            }
        }
    }

    async fn peripheral_state(&self, peripheral: &PeripheralId) -> PeripheralState {
        let Some(device) = self.inner.device(peripheral) else {
            return PeripheralState::Disconnected;
        };
        if device.is_connected().await {
            PeripheralState::Connected
        } else {
            PeripheralState::Disconnected
        }
    }
}
