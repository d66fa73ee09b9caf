//! In-memory radio that records every request.
//! Tests drive the manager by feeding it `RadioEvent`s and then inspect the
//! requests it issued.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{GattRef, PeripheralHandle, PeripheralId, PeripheralState};

/// A request issued to the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    PowerOn,
    Scan(Vec<Uuid>),
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices(PeripheralId, Vec<Uuid>),
    DiscoverCharacteristics(PeripheralId, Uuid, Vec<Uuid>),
    SetNotify(PeripheralId, GattRef, bool),
    ReadValue(PeripheralId, GattRef),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RadioCall>,
    /// Peripherals `retrieve_peripherals` can resolve
    known: HashMap<PeripheralId, PeripheralHandle>,
    /// Peripherals connected to the system, with the services they expose
    system_connected: Vec<(PeripheralHandle, Vec<Uuid>)>,
    states: HashMap<PeripheralId, PeripheralState>,
}

#[derive(Debug, Default)]
pub struct MockRadio {
    state: Mutex<MockState>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: RadioCall) {
        self.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    /// Returns and forgets the recorded calls
    pub fn take_calls(&self) -> Vec<RadioCall> {
        std::mem::take(&mut self.lock().calls)
    }

    pub fn add_known(&self, handle: PeripheralHandle) {
        self.lock().known.insert(handle.id, handle);
    }

    pub fn add_system_connected(&self, handle: PeripheralHandle, services: Vec<Uuid>) {
        self.lock().system_connected.push((handle, services));
    }

    pub fn set_state(&self, peripheral: PeripheralId, state: PeripheralState) {
        self.lock().states.insert(peripheral, state);
    }
}

#[async_trait]
impl Radio for MockRadio {
    fn power_on(&self) {
        self.record(RadioCall::PowerOn);
    }

    fn scan(&self, services: &[Uuid]) {
        self.record(RadioCall::Scan(services.to_vec()));
    }

    fn stop_scan(&self) {
        self.record(RadioCall::StopScan);
    }

    fn connect(&self, peripheral: &PeripheralId) {
        self.record(RadioCall::Connect(*peripheral));
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        self.record(RadioCall::Disconnect(*peripheral));
    }

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        self.record(RadioCall::DiscoverServices(*peripheral, services.to_vec()));
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        self.record(RadioCall::DiscoverCharacteristics(
            *peripheral,
            service,
            characteristics.to_vec(),
        ));
    }

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: GattRef, enabled: bool) {
        self.record(RadioCall::SetNotify(*peripheral, characteristic, enabled));
    }

    fn read_value(&self, peripheral: &PeripheralId, characteristic: GattRef) {
        self.record(RadioCall::ReadValue(*peripheral, characteristic));
    }

    async fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralHandle> {
        let state = self.lock();
        identifiers
            .iter()
            .filter_map(|id| state.known.get(id).cloned())
            .collect()
    }

    async fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralHandle> {
        self.lock()
            .system_connected
            .iter()
            .filter(|(_, exposed)| exposed.iter().any(|uuid| services.contains(uuid)))
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    async fn peripheral_state(&self, peripheral: &PeripheralId) -> PeripheralState {
        self.lock()
            .states
            .get(peripheral)
            .copied()
            .unwrap_or_default()
    }
}
