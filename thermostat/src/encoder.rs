use chrono::{DateTime, FixedOffset, Utc};

use crate::errors::Result;
use crate::model::{Payload, Snapshot, TelemetryReading};

/// Readings are stamped in UTC+5 whatever the host timezone is.
pub const UTC_OFFSET_SECS: i32 = 5 * 3600;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn telemetry_offset() -> FixedOffset {
    FixedOffset::east_opt(UTC_OFFSET_SECS).expect("UTC+5 is within chrono's offset range")
}

/// Source of wall-clock time for readings.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Builds the reading for `snapshot` taken at `now`.
pub fn reading_at(snapshot: Snapshot, now: DateTime<Utc>) -> TelemetryReading {
    TelemetryReading {
        status: snapshot.status,
        temperature: snapshot.temperature,
        timestamp: now.with_timezone(&telemetry_offset()),
    }
}

/// Serializes `snapshot` at `now` into the JSON wire payload:
/// `{"status":"ON","temperature":21,"timestamp":"2024-01-01 05:00:00"}`.
pub fn encode(snapshot: Snapshot, now: DateTime<Utc>) -> Result<Payload> {
    encode_reading(&reading_at(snapshot, now))
}

pub fn encode_reading(reading: &TelemetryReading) -> Result<Payload> {
    Ok(serde_json::to_vec(reading)?)
}

pub fn decode(payload: &[u8]) -> Result<TelemetryReading> {
    Ok(serde_json::from_slice(payload)?)
}
