//! Bluetooth central functionality
//! This module handles adapter state, scanning, selection of a single
//! peripheral, GATT discovery and delivery of characteristic values.

#[cfg(feature = "bluest")]
mod bluest_radio;
mod catalog;
mod commands;
mod connection;
mod constants;
mod device;
mod manager;
#[cfg(any(test, feature = "mock-radio"))]
pub mod mock;
mod notification;
mod policy;
mod radio;
mod types;

#[cfg(test)]
mod tests;

// Re-export types that should be publicly accessible
#[cfg(feature = "bluest")]
pub use bluest_radio::BluestRadio;
pub use catalog::{CharacteristicCatalog, DecodeError, ServiceCatalog};
pub use commands::{ManagerClosed, ManagerCommand, ManagerHandle};
pub use connection::{DeviceSession, SessionHandle, SessionPhase};
pub use constants::*;
pub use device::DiscoveredPeripheral;
pub use manager::{DiscoveryManager, ManagerObserver};
pub use notification::{CharacteristicSubscription, CharacteristicValue, CharacteristicValueCache};
pub use policy::{ReadAction, ReadPolicy};
pub use radio::Radio;
pub use types::{
    AdapterState, Advertisement, GattRef, PeripheralHandle, PeripheralId, PeripheralState,
    RadioError, RadioEvent,
};
