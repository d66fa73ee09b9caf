//! Interface to the platform Bluetooth stack.
//!
//! Request methods only enqueue work and return immediately; their outcome
//! arrives later as a [`RadioEvent`](crate::core::bluetooth::RadioEvent) on
//! the channel the radio was created with. The retrieval queries answer
//! directly.

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::types::{GattRef, PeripheralHandle, PeripheralId, PeripheralState};

#[async_trait]
pub trait Radio: Send + Sync {
    /// Brings up the adapter; it starts emitting `StateChanged` events
    fn power_on(&self);

    fn scan(&self, services: &[Uuid]);

    fn stop_scan(&self);

    fn connect(&self, peripheral: &PeripheralId);

    fn disconnect(&self, peripheral: &PeripheralId);

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]);

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    );

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: GattRef, enabled: bool);

    fn read_value(&self, peripheral: &PeripheralId, characteristic: GattRef);

    /// Peripherals the stack can hand out directly (bonded or already known)
    async fn retrieve_peripherals(&self, identifiers: &[PeripheralId]) -> Vec<PeripheralHandle>;

    /// Peripherals connected to the system that expose one of `services`
    async fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<PeripheralHandle>;

    async fn peripheral_state(&self, peripheral: &PeripheralId) -> PeripheralState;
}
