//! GATT central library
//! Discovers BLE peripherals, keeps one selected device session, walks its
//! services and characteristics and republishes decoded characteristic values
//! to any number of subscribers. The last selected peripheral is persisted and
//! reconnected to when the adapter becomes ready again.
//!
//! The radio itself sits behind the [`Radio`](crate::core::bluetooth::Radio) trait;
//! enable the `bluest` feature for the platform backend.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod store;
pub mod utils;

pub use config::{CentralConfig, ConfigError};
pub use crate::core::bluetooth::{
    AdapterState, CharacteristicCatalog, DiscoveryManager, ManagerCommand, ManagerHandle,
    PeripheralId, ReadPolicy, ServiceCatalog,
};
pub use logging::init_logging;
pub use store::{IdentityStore, JsonFileStore, MemoryStore, StoreError};
