use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TEMPERATURE_MIN: u8 = 0;
pub const TEMPERATURE_MAX: u8 = 100;

/// Serialized form of one telemetry reading.
pub type Payload = Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerStatus {
    On,
    Off,
}

impl From<bool> for PowerStatus {
    fn from(powered: bool) -> Self {
        if powered {
            PowerStatus::On
        } else {
            PowerStatus::Off
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerStatus::On => f.write_str("ON"),
            PowerStatus::Off => f.write_str("OFF"),
        }
    }
}

/// Immutable read of the device state at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub status: PowerStatus,
    pub temperature: u8,
}

/// Power and temperature of the simulated thermostat.
///
/// Only user commands mutate it. The temperature is clamped into
/// `[TEMPERATURE_MIN, TEMPERATURE_MAX]` on every write, so a snapshot is
/// always in range.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    powered: bool,
    temperature: u8,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the power flag. Returns `true` if this was a transition.
    pub fn set_power(&mut self, on: bool) -> bool {
        let changed = self.powered != on;
        self.powered = on;
        changed
    }

    /// Stores `value` clamped into range and returns what was stored.
    pub fn set_temperature(&mut self, value: i64) -> u8 {
        let clamped = value.clamp(TEMPERATURE_MIN as i64, TEMPERATURE_MAX as i64);
        self.temperature = clamped as u8;
        self.temperature
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.powered.into(),
            temperature: self.temperature,
        }
    }
}

/// Wire form of a telemetry message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub status: PowerStatus,
    pub temperature: u8,
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<FixedOffset>,
}

impl TelemetryReading {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            temperature: self.temperature,
        }
    }
}

/// Readings submitted to a sink in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    payloads: Vec<Payload>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(payload: Payload) -> Self {
        Self {
            payloads: vec![payload],
        }
    }

    pub fn push(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.payloads.iter().map(Vec::as_slice)
    }
}

pub(crate) mod timestamp_format {
    use chrono::{DateTime, FixedOffset, NaiveDateTime};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::encoder::{telemetry_offset, TIMESTAMP_FORMAT};

    pub fn serialize<S>(timestamp: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(de::Error::custom)?;
        naive
            .and_local_timezone(telemetry_offset())
            .single()
            .ok_or_else(|| de::Error::custom(format!("ambiguous timestamp {}", raw)))
    }
}
