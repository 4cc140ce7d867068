use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thermostat::{
    decode, Batch, Clock, IngestionSink, PowerStatus, SchedulerState, SendPolicy, Settings, TelemetryReading,
    Thermostat, TransmissionError, Transmitter,
};
use tokio::time::{sleep, Instant};

const TICK: Duration = Duration::from_secs(2);

/// Wall clock driven by tokio's (paused) virtual time.
struct VirtualClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl VirtualClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            start: Instant::now(),
        })
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

/// Clock that hands out a fixed sequence of instants.
struct ScriptedClock {
    times: Mutex<Vec<DateTime<Utc>>>,
}

impl Clock for ScriptedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut times = self.times.lock().unwrap();
        if times.len() > 1 {
            times.remove(0)
        } else {
            times[0]
        }
    }
}

#[derive(Debug, Clone)]
struct Attempt {
    reading: TelemetryReading,
    at: Instant,
    delivered: bool,
}

/// Records every call; calls whose index is in `failing` are rejected.
#[derive(Default)]
struct RecordingSink {
    attempts: Mutex<Vec<Attempt>>,
    failing: HashSet<usize>,
    latency: Duration,
}

impl RecordingSink {
    fn failing_on(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            failing: calls.iter().copied().collect(),
            ..Default::default()
        })
    }

    fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<TelemetryReading> {
        self.attempts()
            .into_iter()
            .filter(|a| a.delivered)
            .map(|a| a.reading)
            .collect()
    }
}

#[async_trait]
impl IngestionSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        assert_eq!(batch.len(), 1, "every reading travels in its own batch");
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let reading = decode(batch.payloads()[0].as_slice()).unwrap();
        let mut attempts = self.attempts.lock().unwrap();
        let delivered = !self.failing.contains(&attempts.len());
        attempts.push(Attempt {
            reading,
            at: Instant::now(),
            delivered,
        });

        if delivered {
            Ok(())
        } else {
            Err(TransmissionError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            })
        }
    }
}

fn device(sink: Arc<RecordingSink>, clock: Arc<dyn Clock>) -> Thermostat {
    device_with(sink, clock, SendPolicy::at_most_once(TICK), 16)
}

fn device_with(
    sink: Arc<RecordingSink>,
    clock: Arc<dyn Clock>,
    policy: SendPolicy,
    queue_capacity: usize,
) -> Thermostat {
    Thermostat::spawn(
        Transmitter::new(sink, policy),
        clock,
        Settings {
            tick_interval: TICK,
            queue_capacity,
        },
    )
}

/// Lets the transmitter worker drain the queue.
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

fn formatted(reading: &TelemetryReading) -> String {
    reading.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[tokio::test(start_paused = true)]
async fn test_power_on_sends_immediately_then_every_tick() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());
    assert_eq!(thermostat.scheduler_state(), SchedulerState::Idle);

    assert!(thermostat.set_power(true));
    settle().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].status, PowerStatus::On);
    assert_eq!(thermostat.scheduler_state(), SchedulerState::Running);

    sleep(Duration::from_millis(6100)).await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 4);
    assert!(delivered.iter().all(|r| r.status == PowerStatus::On));
}

#[tokio::test(start_paused = true)]
async fn test_power_off_sends_once_then_goes_quiet() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    sleep(Duration::from_millis(2100)).await;
    assert_eq!(sink.delivered().len(), 2);

    assert!(thermostat.set_power(false));
    settle().await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[2].status, PowerStatus::Off);
    assert_eq!(thermostat.scheduler_state(), SchedulerState::Idle);

    sleep(TICK * 3 + Duration::from_millis(500)).await;
    assert_eq!(sink.delivered().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_power_on_again_resumes_ticking() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    thermostat.set_power(false);
    thermostat.set_power(true);
    sleep(Duration::from_millis(2100)).await;

    let statuses: Vec<PowerStatus> = sink.delivered().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![PowerStatus::On, PowerStatus::Off, PowerStatus::On, PowerStatus::On]
    );
}

#[tokio::test(start_paused = true)]
async fn test_redundant_power_command_sends_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    assert!(!thermostat.set_power(false));
    settle().await;
    assert!(sink.attempts().is_empty());

    thermostat.set_power(true);
    assert!(!thermostat.set_power(true));
    sleep(Duration::from_millis(2100)).await;
    assert_eq!(sink.delivered().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_flips_power() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    assert!(thermostat.toggle());
    assert_eq!(thermostat.snapshot().status, PowerStatus::On);
    assert!(!thermostat.toggle());
    assert_eq!(thermostat.snapshot().status, PowerStatus::Off);
    settle().await;

    let statuses: Vec<PowerStatus> = sink.delivered().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![PowerStatus::On, PowerStatus::Off]);
}

#[tokio::test(start_paused = true)]
async fn test_temperature_change_waits_for_next_tick() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    settle().await;
    assert_eq!(thermostat.set_temperature(55), 55);
    settle().await;
    assert_eq!(sink.delivered().len(), 1);
    assert_eq!(sink.delivered()[0].temperature, 0);

    sleep(TICK).await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].temperature, 55);
}

#[tokio::test(start_paused = true)]
async fn test_temperature_is_clamped_at_the_command_boundary() {
    let sink = Arc::new(RecordingSink::default());
    let thermostat = device(sink, VirtualClock::new());

    assert_eq!(thermostat.set_temperature(150), 100);
    assert_eq!(thermostat.snapshot().temperature, 100);
    assert_eq!(thermostat.set_temperature(-7), 0);
    assert_eq!(thermostat.snapshot().temperature, 0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_timestamps_never_regress() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    sleep(Duration::from_millis(8100)).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 5);
    for pair in delivered.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test(start_paused = true)]
async fn test_timestamps_hold_when_clock_steps_back() {
    let t = |s| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, s).unwrap();
    let clock = Arc::new(ScriptedClock {
        times: Mutex::new(vec![t(30), t(10), t(40)]),
    });
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), clock);

    thermostat.set_power(true);
    thermostat.set_power(false);
    thermostat.report();
    settle().await;

    let stamps: Vec<String> = sink.delivered().iter().map(formatted).collect();
    assert_eq!(
        stamps,
        vec!["2024-01-01 05:00:30", "2024-01-01 05:00:30", "2024-01-01 05:00:40"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_does_not_halt_ticking() {
    // Call 1 is the first tick.
    let sink = RecordingSink::failing_on(&[1]);
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    sleep(Duration::from_millis(6100)).await;

    let attempts = sink.attempts();
    assert_eq!(attempts.len(), 4);
    assert!(!attempts[1].delivered);
    assert!(attempts[2].delivered && attempts[3].delivered);

    for pair in attempts[1..].windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= TICK && gap < TICK + Duration::from_millis(100), "gap was {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_report_sends_current_state_without_arming() {
    let sink = Arc::new(RecordingSink::default());
    let thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.report();
    sleep(TICK * 2).await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].status, PowerStatus::Off);
    assert_eq!(delivered[0].temperature, 0);
    assert_eq!(thermostat.scheduler_state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_queued_readings() {
    let sink = Arc::new(RecordingSink {
        latency: Duration::from_millis(500),
        ..Default::default()
    });
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.report();
    thermostat.set_power(true);
    thermostat.set_power(false);
    thermostat.shutdown().await;

    let statuses: Vec<PowerStatus> = sink.delivered().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![PowerStatus::Off, PowerStatus::On, PowerStatus::Off]);
}

#[tokio::test(start_paused = true)]
async fn test_on_adjust_off_scenario() {
    let sink = Arc::new(RecordingSink::default());
    let mut thermostat = device(sink.clone(), VirtualClock::new());

    thermostat.set_power(true);
    sleep(Duration::from_secs(1)).await;
    thermostat.set_temperature(42);
    thermostat.set_power(false);
    settle().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);

    assert_eq!(delivered[0].status, PowerStatus::On);
    assert_eq!(delivered[0].temperature, 0);
    assert_eq!(formatted(&delivered[0]), "2024-01-01 05:00:00");

    assert_eq!(delivered[1].status, PowerStatus::Off);
    assert_eq!(delivered[1].temperature, 42);
    assert_eq!(formatted(&delivered[1]), "2024-01-01 05:00:01");
    assert!(delivered[1].timestamp > delivered[0].timestamp);
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_drops_reading_and_keeps_ticking() {
    // Each send outlasts two ticks, so a one-slot queue overflows every other tick
    let sink = Arc::new(RecordingSink {
        latency: Duration::from_millis(4500),
        ..Default::default()
    });
    let mut thermostat = device_with(
        sink.clone(),
        VirtualClock::new(),
        SendPolicy::at_most_once(Duration::from_secs(10)),
        1,
    );

    thermostat.set_power(true);
    sleep(Duration::from_millis(13_600)).await;

    let delivered: Vec<String> = sink.delivered().iter().map(formatted).collect();
    assert_eq!(
        delivered,
        vec!["2024-01-01 05:00:00", "2024-01-01 05:00:02", "2024-01-01 05:00:06"]
    );
    assert_eq!(thermostat.scheduler_state(), SchedulerState::Running);

    thermostat.shutdown().await;

    let delivered: Vec<String> = sink.delivered().iter().map(formatted).collect();
    assert_eq!(delivered.last().map(String::as_str), Some("2024-01-01 05:00:10"));
    assert!(!delivered.iter().any(|t| t == "2024-01-01 05:00:04"));
    assert!(!delivered.iter().any(|t| t == "2024-01-01 05:00:08"));
    assert_eq!(sink.attempts().len(), delivered.len());
    assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]));
}
