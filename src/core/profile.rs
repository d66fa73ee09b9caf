//! Standard GATT profile
//! Battery, Device Information and Heart Rate services with their value
//! decoders and a default read policy. Products with their own services
//! implement the catalog traits the same way.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::{CharacteristicCatalog, DecodeError, ReadPolicy, ServiceCatalog};
use crate::core::bluetooth::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_BODY_SENSOR_LOCATION,
    UUID_DEVICE_INFORMATION_SERVICE, UUID_HEART_RATE_MEASUREMENT, UUID_HEART_RATE_SERVICE,
    UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardService {
    Battery,
    DeviceInformation,
    HeartRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardCharacteristic {
    BatteryLevel,
    ManufacturerName,
    ModelNumber,
    HeartRateMeasurement,
    BodySensorLocation,
}

/// Decoded value of a standard characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StandardValue {
    Percent(u8),
    Text(String),
    HeartRate {
        bpm: u16,
        /// `None` when the sensor does not report skin contact
        contact: Option<bool>,
    },
    SensorLocation(SensorLocation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
    Reserved(u8),
}

impl From<u8> for SensorLocation {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Other,
            1 => Self::Chest,
            2 => Self::Wrist,
            3 => Self::Finger,
            4 => Self::Hand,
            5 => Self::EarLobe,
            6 => Self::Foot,
            other => Self::Reserved(other),
        }
    }
}

impl fmt::Display for StandardService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Battery => "Battery",
            Self::DeviceInformation => "Device Information",
            Self::HeartRate => "Heart Rate",
        };
        f.write_str(name)
    }
}

impl fmt::Display for StandardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(percent) => write!(f, "{}%", percent),
            Self::Text(text) => f.write_str(text),
            Self::HeartRate { bpm, contact: Some(false) } => write!(f, "{} bpm (no contact)", bpm),
            Self::HeartRate { bpm, .. } => write!(f, "{} bpm", bpm),
            Self::SensorLocation(location) => write!(f, "{:?}", location),
        }
    }
}

impl fmt::Display for StandardCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BatteryLevel => "Battery Level",
            Self::ManufacturerName => "Manufacturer Name",
            Self::ModelNumber => "Model Number",
            Self::HeartRateMeasurement => "Heart Rate Measurement",
            Self::BodySensorLocation => "Body Sensor Location",
        };
        f.write_str(name)
    }
}

impl ServiceCatalog for StandardService {
    type Characteristic = StandardCharacteristic;

    fn all() -> &'static [Self] {
        &[Self::Battery, Self::DeviceInformation, Self::HeartRate]
    }

    fn uuid(&self) -> Uuid {
        match self {
            Self::Battery => UUID_BATTERY_SERVICE,
            Self::DeviceInformation => UUID_DEVICE_INFORMATION_SERVICE,
            Self::HeartRate => UUID_HEART_RATE_SERVICE,
        }
    }

    fn characteristics(&self) -> &'static [StandardCharacteristic] {
        match self {
            Self::Battery => &[StandardCharacteristic::BatteryLevel],
            Self::DeviceInformation => &[
                StandardCharacteristic::ManufacturerName,
                StandardCharacteristic::ModelNumber,
            ],
            Self::HeartRate => &[
                StandardCharacteristic::HeartRateMeasurement,
                StandardCharacteristic::BodySensorLocation,
            ],
        }
    }
}

impl CharacteristicCatalog for StandardCharacteristic {
    type Value = StandardValue;

    fn all() -> &'static [Self] {
        &[
            Self::BatteryLevel,
            Self::ManufacturerName,
            Self::ModelNumber,
            Self::HeartRateMeasurement,
            Self::BodySensorLocation,
        ]
    }

    fn uuid(&self) -> Uuid {
        match self {
            Self::BatteryLevel => UUID_BATTERY_LEVEL,
            Self::ManufacturerName => UUID_MANUFACTURER_NAME,
            Self::ModelNumber => UUID_MODEL_NUMBER,
            Self::HeartRateMeasurement => UUID_HEART_RATE_MEASUREMENT,
            Self::BodySensorLocation => UUID_BODY_SENSOR_LOCATION,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<StandardValue, DecodeError> {
        match self {
            Self::BatteryLevel => match bytes.first() {
                Some(level) if *level <= 100 => Ok(StandardValue::Percent(*level)),
                Some(level) => Err(DecodeError::Invalid(format!(
                    "battery level {level} out of range"
                ))),
                None => Err(too_short(1, bytes)),
            },
            Self::ManufacturerName | Self::ModelNumber => Ok(StandardValue::Text(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .to_string(),
            )),
            Self::HeartRateMeasurement => decode_heart_rate(bytes),
            Self::BodySensorLocation => bytes
                .first()
                .map(|raw| StandardValue::SensorLocation((*raw).into()))
                .ok_or_else(|| too_short(1, bytes)),
        }
    }
}

fn too_short(expected: usize, bytes: &[u8]) -> DecodeError {
    DecodeError::TooShort {
        expected,
        actual: bytes.len(),
    }
}

/// Flags byte, then an 8- or 16-bit (little endian) rate depending on bit 0.
/// Bit 2 says whether contact is supported, bit 1 whether it is detected.
fn decode_heart_rate(bytes: &[u8]) -> Result<StandardValue, DecodeError> {
    let (&flags, rest) = bytes.split_first().ok_or_else(|| too_short(2, bytes))?;
    let bpm = if flags & 0x01 == 0 {
        u16::from(*rest.first().ok_or_else(|| too_short(2, bytes))?)
    } else {
        match rest {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return Err(too_short(3, bytes)),
        }
    };
    let contact = (flags & 0x04 != 0).then_some(flags & 0x02 != 0);
    Ok(StandardValue::HeartRate { bpm, contact })
}

/// Subscribes to the changing values and reads the static ones once
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPolicy;

impl ReadPolicy<StandardCharacteristic> for StandardPolicy {
    fn should_notify(&self, characteristic: StandardCharacteristic) -> bool {
        matches!(
            characteristic,
            StandardCharacteristic::BatteryLevel | StandardCharacteristic::HeartRateMeasurement
        )
    }

    fn should_read(&self, characteristic: StandardCharacteristic) -> bool {
        matches!(
            characteristic,
            StandardCharacteristic::ManufacturerName
                | StandardCharacteristic::ModelNumber
                | StandardCharacteristic::BodySensorLocation
        )
    }
}
