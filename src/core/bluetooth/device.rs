//! Application-level record of a discovered peripheral

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::bluetooth::types::{Advertisement, PeripheralHandle, PeripheralId};

/// Represents a discovered Bluetooth device.
///
/// Two records are equal when their identifiers are equal; the other fields
/// are refreshed in place on every sighting.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPeripheral {
    /// Stable identifier of the device
    pub id: String,
    /// The name of the device, or a placeholder when it advertises none
    pub display_name: String,
    /// Whether the radio currently reports the device as connected
    pub is_connected: bool,
    /// The signal strength (RSSI) from the latest advertisement
    pub rssi: Option<i16>,
    /// When the device was last seen advertising or connecting
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    handle: PeripheralHandle,
}

impl DiscoveredPeripheral {
    /// Creates a record from the first sighting of `handle`
    pub fn new(handle: &PeripheralHandle, placeholder: &str) -> Self {
        Self {
            id: handle.id.to_string(),
            display_name: handle.title(placeholder),
            is_connected: false,
            rssi: None,
            last_seen: Utc::now(),
            handle: handle.clone(),
        }
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.handle.id
    }

    /// Radio handle of the record, carrying the latest advertised name
    pub fn handle(&self) -> &PeripheralHandle {
        &self.handle
    }

    /// Refreshes the record from a new advertisement
    pub fn update_from_advertisement(
        &mut self,
        handle: &PeripheralHandle,
        advertisement: &Advertisement,
        placeholder: &str,
    ) {
        let name = advertisement
            .local_name
            .clone()
            .or_else(|| handle.name.clone());
        self.display_name = name.clone().unwrap_or_else(|| placeholder.to_string());
        self.handle.name = name;
        if advertisement.rssi.is_some() {
            self.rssi = advertisement.rssi;
        }
        self.last_seen = Utc::now();
    }

    /// Refreshes the record from a connection event; keeps a known name when
    /// the handle carries none.
    pub fn update_from_handle(&mut self, handle: &PeripheralHandle) {
        if let Some(name) = &handle.name {
            self.display_name = name.clone();
            self.handle.name = Some(name.clone());
        }
        self.last_seen = Utc::now();
    }
}

impl PartialEq for DiscoveredPeripheral {
    fn eq(&self, other: &Self) -> bool {
        self.handle.id == other.handle.id
    }
}

impl Eq for DiscoveredPeripheral {}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: Option<&str>) -> PeripheralHandle {
        PeripheralHandle::new(
            PeripheralId::from_platform_id("dev_01"),
            name.map(str::to_string),
        )
    }

    #[test]
    fn equality_is_by_identifier_only() {
        let mut a = DiscoveredPeripheral::new(&handle(Some("A")), "Peripheral");
        let b = DiscoveredPeripheral::new(&handle(Some("B")), "Peripheral");
        a.is_connected = true;
        assert_eq!(a, b);
    }

    #[test]
    fn advertisement_name_wins_over_handle_name() {
        let h = handle(Some("Cached"));
        let mut record = DiscoveredPeripheral::new(&h, "Peripheral");
        let adv = Advertisement {
            local_name: Some("Advertised".into()),
            rssi: Some(-60),
            ..Advertisement::default()
        };
        record.update_from_advertisement(&h, &adv, "Peripheral");
        assert_eq!(record.display_name, "Advertised");
        assert_eq!(record.rssi, Some(-60));
    }

    #[test]
    fn nameless_sighting_uses_placeholder() {
        let h = handle(None);
        let mut record = DiscoveredPeripheral::new(&h, "Peripheral");
        record.update_from_advertisement(&h, &Advertisement::default(), "Peripheral");
        assert_eq!(record.display_name, "Peripheral");
    }
}
