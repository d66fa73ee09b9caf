//! Core functionality of the GATT central
//! The generic Bluetooth layer plus a ready-made catalog of standard services.

pub mod bluetooth;
pub mod profile;

// Re-export commonly used types
pub use bluetooth::{DiscoveryManager, ManagerHandle};
pub use profile::{StandardCharacteristic, StandardPolicy, StandardService, StandardValue};
