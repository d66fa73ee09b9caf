//! Data contracts describing which services and characteristics a product
//! exposes and how their raw bytes decode.
//!
//! Implement [`CharacteristicCatalog`] on a closed enum of characteristic
//! kinds and [`ServiceCatalog`] on a closed enum of services; the manager
//! and sessions are generic over the service catalog.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use thiserror::Error;
use uuid::Uuid;

/// Raw characteristic bytes that the decoder could not interpret
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Closed set of characteristic kinds.
pub trait CharacteristicCatalog:
    Copy + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// Decoded application value
    type Value: Clone + Debug + Send + Sync + 'static;

    /// Every member of the catalog
    fn all() -> &'static [Self];

    fn uuid(&self) -> Uuid;

    /// Decodes raw bytes. Must not panic on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, DecodeError>;

    fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.uuid() == uuid)
    }

    /// Construction from the textual UUID; `None` when unrecognized
    fn from_uuid_str(uuid: &str) -> Option<Self> {
        Uuid::parse_str(uuid).ok().and_then(Self::from_uuid)
    }
}

/// Closed set of services, each declaring the characteristics it exposes.
pub trait ServiceCatalog: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {
    type Characteristic: CharacteristicCatalog;

    fn all() -> &'static [Self];

    fn uuid(&self) -> Uuid;

    /// Characteristics this service is expected to expose
    fn characteristics(&self) -> &'static [Self::Characteristic];

    fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.uuid() == uuid)
    }

    fn from_uuid_str(uuid: &str) -> Option<Self> {
        Uuid::parse_str(uuid).ok().and_then(Self::from_uuid)
    }

    /// Service filter used for scanning, service discovery and retrieval
    fn all_uuids() -> Vec<Uuid> {
        Self::all().iter().map(ServiceCatalog::uuid).collect()
    }

    fn characteristic_uuids(&self) -> Vec<Uuid> {
        self.characteristics()
            .iter()
            .map(CharacteristicCatalog::uuid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::{StandardCharacteristic, StandardService};

    #[test]
    fn characteristic_round_trips_through_uuid_string() {
        for c in StandardCharacteristic::all() {
            let text = c.uuid().to_string();
            assert_eq!(StandardCharacteristic::from_uuid_str(&text), Some(*c));
        }
    }

    #[test]
    fn unknown_uuid_is_not_found() {
        assert_eq!(
            StandardCharacteristic::from_uuid_str("0000ffff-0000-1000-8000-00805f9b34fb"),
            None
        );
        assert_eq!(StandardService::from_uuid_str("garbage"), None);
    }

    #[test]
    fn service_filter_lists_every_service() {
        let uuids = StandardService::all_uuids();
        assert_eq!(uuids.len(), StandardService::all().len());
        assert!(uuids.contains(&StandardService::Battery.uuid()));
    }
}
