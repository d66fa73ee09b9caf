//! Defines shared data structures for the Bluetooth module.
//! These are the values exchanged with the radio stack: adapter and
//! peripheral states, peripheral identities and the events the radio emits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Power/authorization state of the local Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    #[default]
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
    Resetting,
}

impl AdapterState {
    /// Scanning and connecting are only legal while powered on.
    pub fn is_ready(self) -> bool {
        self == Self::PoweredOn
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "poweredOff",
            Self::PoweredOn => "poweredOn",
            Self::Resetting => "resetting",
        };
        f.write_str(name)
    }
}

/// Connection state of a peripheral as reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeripheralState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Stable identifier of a physical peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Maps a platform device identifier onto a stable UUID.
    ///
    /// Platforms that already identify devices by UUID (CoreBluetooth) keep
    /// theirs; anything else (BlueZ object paths, WinRT addresses) is hashed
    /// into a name-based UUID so the same device always yields the same id.
    pub fn from_platform_id(platform_id: &str) -> Self {
        match Uuid::parse_str(platform_id) {
            Ok(uuid) => Self(uuid),
            Err(_) => Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, platform_id.as_bytes())),
        }
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for PeripheralId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Radio-owned reference to a physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    /// Name the device advertises, if any
    pub name: Option<String>,
}

impl PeripheralHandle {
    pub fn new(id: PeripheralId, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// Advertised name, or `placeholder` when the device has none
    pub fn title(&self, placeholder: &str) -> String {
        self.name.clone().unwrap_or_else(|| placeholder.to_string())
    }
}

/// The parts of an advertisement the core looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
    pub is_connectable: bool,
}

/// Addresses one characteristic within one service of a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl GattRef {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

/// Failure reported by the radio stack for one request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("Attribute not discovered: {0}")]
    UnknownAttribute(Uuid),
    #[error("GATT operation failed: {0}")]
    Gatt(String),
}

/// Callback delivered by the radio stack.
///
/// The radio emits these in order on a single channel; the manager consumes
/// them one at a time.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    StateChanged(AdapterState),
    ScanStateChanged(bool),
    PeripheralDiscovered {
        peripheral: PeripheralHandle,
        advertisement: Advertisement,
    },
    Connected(PeripheralHandle),
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<RadioError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Result<Vec<Uuid>, RadioError>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Result<Vec<Uuid>, RadioError>,
    },
    NotificationStateChanged {
        peripheral: PeripheralId,
        characteristic: GattRef,
        /// `Ok(is_notifying)` on success
        result: Result<bool, RadioError>,
    },
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: GattRef,
        value: Result<Option<Vec<u8>>, RadioError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_state_display_names() {
        assert_eq!(AdapterState::PoweredOn.to_string(), "poweredOn");
        assert_eq!(AdapterState::Unauthorized.to_string(), "unauthorized");
        assert!(!AdapterState::Resetting.is_ready());
    }

    #[test]
    fn platform_uuid_ids_are_kept() {
        let raw = "5c1a4f2e-8d3b-4e7a-9f10-2b6c7d8e9f01";
        let id = PeripheralId::from_platform_id(raw);
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn non_uuid_platform_ids_hash_stably() {
        let a = PeripheralId::from_platform_id("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
        let b = PeripheralId::from_platform_id("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
        let c = PeripheralId::from_platform_id("/org/bluez/hci0/dev_11_22_33_44_55_66");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn peripheral_id_parses_its_display_form() {
        let id = PeripheralId::from_platform_id("hci0/dev_01");
        let parsed: PeripheralId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<PeripheralId>().is_err());
    }

    #[test]
    fn title_falls_back_to_placeholder() {
        let id = PeripheralId::from_platform_id("x");
        assert_eq!(PeripheralHandle::new(id, None).title("Peripheral"), "Peripheral");
        assert_eq!(
            PeripheralHandle::new(id, Some("HRM".into())).title("Peripheral"),
            "HRM"
        );
    }
}
