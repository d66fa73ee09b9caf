//! Per-characteristic read-or-subscribe decision.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::catalog::CharacteristicCatalog;

/// What the discovery walk does with a discovered characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadAction {
    Notify,
    Read,
    Ignore,
}

/// Decides, per characteristic, whether to subscribe, read once or ignore.
///
/// Both methods are required. Implementations must be deterministic and
/// free of side effects.
pub trait ReadPolicy<C: CharacteristicCatalog>: Send + Sync {
    fn should_notify(&self, characteristic: C) -> bool;

    fn should_read(&self, characteristic: C) -> bool;

    /// Combined decision; notify wins when both answers are yes.
    fn action(&self, characteristic: C) -> ReadAction {
        if self.should_notify(characteristic) {
            ReadAction::Notify
        } else if self.should_read(characteristic) {
            ReadAction::Read
        } else {
            ReadAction::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::StandardCharacteristic;

    struct Contradictory;

    impl ReadPolicy<StandardCharacteristic> for Contradictory {
        fn should_notify(&self, _: StandardCharacteristic) -> bool {
            true
        }

        fn should_read(&self, _: StandardCharacteristic) -> bool {
            true
        }
    }

    struct ReadOnly;

    impl ReadPolicy<StandardCharacteristic> for ReadOnly {
        fn should_notify(&self, _: StandardCharacteristic) -> bool {
            false
        }

        fn should_read(&self, c: StandardCharacteristic) -> bool {
            c == StandardCharacteristic::ManufacturerName
        }
    }

    #[test]
    fn notify_takes_precedence() {
        assert_eq!(
            Contradictory.action(StandardCharacteristic::BatteryLevel),
            ReadAction::Notify
        );
    }

    #[test]
    fn read_and_ignore() {
        assert_eq!(
            ReadOnly.action(StandardCharacteristic::ManufacturerName),
            ReadAction::Read
        );
        assert_eq!(
            ReadOnly.action(StandardCharacteristic::BatteryLevel),
            ReadAction::Ignore
        );
    }
}
