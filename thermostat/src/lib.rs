//! Telemetry core of a simulated IoT thermostat.
//!
//! A [`Thermostat`] holds the device state (power and temperature). Powering
//! it on sends one reading and arms a ticker that sends a reading every
//! interval; powering it off sends one final reading and disarms the ticker.
//! Readings are JSON objects stamped in UTC+5 and are handed, one batch per
//! reading, to whatever [`IngestionSink`] the caller injects. Delivery is
//! ordered, best effort, and a failed send never stops the ticker.

pub mod device;
pub mod encoder;
pub mod errors;
pub mod model;
pub mod scheduler;
pub mod sink;
pub mod transmitter;

pub use device::{Settings, Thermostat};
pub use encoder::{decode, encode, Clock, SystemClock};
pub use errors::{Error, Result, TransmissionError};
pub use model::{Batch, DeviceState, Payload, PowerStatus, Snapshot, TelemetryReading};
pub use scheduler::{SchedulerState, TelemetryScheduler};
pub use sink::IngestionSink;
pub use transmitter::{SendPolicy, Transmitter};
