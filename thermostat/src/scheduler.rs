use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default spacing between ticks while the device is powered.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No ticker armed.
    Idle,
    /// A ticker task is alive and will fire again.
    Running,
}

/// Periodic telemetry timer.
///
/// Ticks are a chain of single-shot sleeps: each fire calls the tick
/// callback and only re-arms if it returns `true`. The ticker goes idle on
/// its own once the callback reports the device is off, and [`stop`] cancels
/// it outright. Sends never happen on the ticker task itself, so cancelling
/// it cannot interrupt an in-flight send.
///
/// [`stop`]: TelemetryScheduler::stop
#[derive(Debug)]
pub struct TelemetryScheduler {
    interval: Duration,
    ticker: Option<JoinHandle<()>>,
}

impl TelemetryScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match &self.ticker {
            Some(handle) if !handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Idle,
        }
    }

    /// IDLE -> RUNNING. Arms the first tick one interval from now; a no-op
    /// while a ticker is still running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.state() == SchedulerState::Running {
            return;
        }

        debug!("Arming telemetry ticker every {:?}", self.interval);
        self.ticker = Some(tokio::spawn(tick_loop(self.interval, tick)));
    }

    /// RUNNING -> IDLE. No further tick fires after this returns.
    pub fn stop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
            debug!("Telemetry ticker cancelled");
        }
    }
}

impl Drop for TelemetryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop<F>(interval: Duration, mut tick: F)
where
    F: FnMut() -> bool,
{
    loop {
        // Single-shot wait, re-armed only after the tick below
        tokio::time::sleep(interval).await;

        // Power went off between ticks: the OFF reading is already out, just stop
        if !tick() {
            debug!("Device powered off, telemetry ticker going idle");
            return;
        }
    }
}
