use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::encoder::{self, Clock};
use crate::model::{DeviceState, Payload, PowerStatus, Snapshot};
use crate::scheduler::{SchedulerState, TelemetryScheduler, DEFAULT_TICK_INTERVAL};
use crate::transmitter::{run_transmitter, Transmitter};

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub tick_interval: Duration,
    /// Readings waiting for the transmitter before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct Inner {
    state: DeviceState,
    last_timestamp: Option<DateTime<Utc>>,
    queue: Option<mpsc::Sender<Payload>>,
}

/// Device state plus the single entry point into the transmit queue.
///
/// Snapshot, timestamp and enqueue happen under one lock, so queued payloads
/// are in snapshot order and their timestamps never go backwards.
struct Outbox {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodes the current reading and queues it. With `only_if_powered`,
    /// nothing is emitted for an unpowered device and `false` is returned.
    fn emit(&self, only_if_powered: bool) -> bool {
        let mut inner = self.lock();
        if only_if_powered && !inner.state.is_powered() {
            return false;
        }

        let snapshot = inner.state.snapshot();
        // Never stamp earlier than the previous reading, even if the host clock steps back
        let now = match inner.last_timestamp {
            Some(last) => self.clock.now().max(last),
            None => self.clock.now(),
        };
        inner.last_timestamp = Some(now);

        let reading = encoder::reading_at(snapshot, now);
        // An enum, a u8 and a formatted timestamp always serialize, so this
        // error means a broken invariant rather than bad input.
        let payload = match encoder::encode_reading(&reading) {
            Ok(p) => p,
            Err(e) => {
                debug_assert!(false, "telemetry reading failed to serialize: {}", e);
                error!("Failed to serialize telemetry: {}", e);
                return true;
            }
        };

        let Some(queue) = inner.queue.as_ref() else {
            warn!("Transmitter is shut down, dropping reading");
            return true;
        };

        info!(
            "Sending telemetry: status={} temperature={} timestamp={}",
            reading.status,
            reading.temperature,
            reading.timestamp.format(encoder::TIMESTAMP_FORMAT)
        );

        // Never block the command path: a full queue loses this reading
        match queue.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Outgoing telemetry queue full, dropping reading");
            }
            Err(TrySendError::Closed(_)) => {
                error!("Transmitter stopped, dropping reading");
            }
        }
        true
    }
}

/// The simulated thermostat.
///
/// Power commands drive the telemetry scheduler: every power transition sends
/// one reading right away, and while powered a reading goes out every tick.
/// Temperature changes are only picked up by the next send.
pub struct Thermostat {
    outbox: Arc<Outbox>,
    scheduler: TelemetryScheduler,
    worker: JoinHandle<()>,
}

impl Thermostat {
    /// Creates a powered-off device at 0 degrees and spawns its transmitter
    /// worker. Must be called from within a tokio runtime.
    pub fn spawn(transmitter: Transmitter, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = tokio::spawn(run_transmitter(rx, transmitter));

        let outbox = Arc::new(Outbox {
            inner: Mutex::new(Inner {
                state: DeviceState::new(),
                last_timestamp: None,
                queue: Some(tx),
            }),
            clock,
        });

        Self {
            outbox,
            scheduler: TelemetryScheduler::new(settings.tick_interval),
            worker,
        }
    }

    /// Returns `false` when the device already was in the requested state;
    /// that is not a transition and sends nothing.
    pub fn set_power(&mut self, on: bool) -> bool {
        if !self.outbox.lock().state.set_power(on) {
            debug!("Device already {}", PowerStatus::from(on));
            return false;
        }

        info!("Device toggled {}", PowerStatus::from(on));
        self.outbox.emit(false);

        if on {
            let outbox = self.outbox.clone();
            self.scheduler.start(move || outbox.emit(true));
        } else {
            self.scheduler.stop();
        }
        true
    }

    /// Flips the power state and returns the new one.
    pub fn toggle(&mut self) -> bool {
        let on = !self.outbox.lock().state.is_powered();
        self.set_power(on);
        on
    }

    /// Clamps into range and returns the stored value. Sends nothing.
    pub fn set_temperature(&self, value: i64) -> u8 {
        let stored = self.outbox.lock().state.set_temperature(value);
        debug!("Temperature set to {}", stored);
        stored
    }

    pub fn snapshot(&self) -> Snapshot {
        self.outbox.lock().state.snapshot()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Sends the current reading now, outside the tick schedule.
    pub fn report(&self) {
        self.outbox.emit(false);
    }

    /// Cancels the ticker, closes the queue and waits for the transmitter to
    /// drain what was already queued.
    pub async fn shutdown(mut self) {
        self.scheduler.stop();
        self.outbox.lock().queue = None;

        if let Err(e) = (&mut self.worker).await {
            error!("Transmitter task failed: {}", e);
        }
        info!("Thermostat shut down");
    }
}
