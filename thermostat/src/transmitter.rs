use crate::errors::TransmissionError;
use crate::model::{Batch, Payload};
use crate::sink::IngestionSink;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

/// How hard the transmitter tries with one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    /// Upper bound for a single `send_batch` attempt.
    pub timeout: Duration,
    /// Total attempts per batch; 1 means no retry.
    pub max_attempts: u32,
}

impl SendPolicy {
    pub fn at_most_once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
        }
    }
}

/// Wraps a sink with batch construction, timeouts and bounded retry.
pub struct Transmitter {
    sink: Box<dyn IngestionSink>,
    policy: SendPolicy,
}

impl Transmitter {
    pub fn new(sink: impl IngestionSink + 'static, policy: SendPolicy) -> Self {
        Self {
            sink: Box::new(sink),
            policy,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Sends one payload as a one-element batch.
    pub async fn send(&self, payload: Payload) -> Result<(), TransmissionError> {
        let batch = Batch::single(payload);
        self.send_batch(&batch).await
    }

    pub async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        if batch.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            attempt += 1;

            // A sink that never answers counts as a failed attempt
            let outcome = match tokio::time::timeout(self.policy.timeout, self.sink.send_batch(batch)).await {
                Ok(result) => result,
                Err(_) => Err(TransmissionError::Timeout(self.policy.timeout)),
            };

            match outcome {
                Ok(()) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    if attempt > 1 {
                        info!(
                            "Batch of {} sent to {} after {} attempts in {:.3}s",
                            batch.len(),
                            self.sink.name(),
                            attempt,
                            elapsed
                        );
                    } else {
                        debug!("Batch of {} sent to {} in {:.3}s", batch.len(), self.sink.name(), elapsed);
                    }
                    return Ok(());
                }
                Err(e) => {
                    // Out of attempts, or retrying cannot help: report to the caller
                    if attempt >= max_attempts || !e.is_retryable() {
                        return Err(e);
                    }

                    warn!(
                        "Send to {} failed (attempt {}/{}): {}. Retrying in {}ms...",
                        self.sink.name(),
                        attempt,
                        max_attempts,
                        e,
                        backoff_ms
                    );

                    // Exponential backoff: 100ms, 200ms, 400ms ... capped at 2s
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }
    }
}

/// Drains the outgoing queue, one send at a time, until every sender is gone.
///
/// A failed send is logged and dropped; it never stops the loop.
pub async fn run_transmitter(mut rx: mpsc::Receiver<Payload>, transmitter: Transmitter) {
    info!(
        "Starting transmitter for {} with timeout={:?}, max_attempts={}",
        transmitter.sink_name(),
        transmitter.policy.timeout,
        transmitter.policy.max_attempts
    );

    while let Some(payload) = rx.recv().await {
        // Best effort: a failed reading is dropped, the next one goes out as usual
        if let Err(e) = transmitter.send(payload).await {
            error!("Failed to send telemetry to {}: {}", transmitter.sink_name(), e);
        }
    }

    info!("Transmitter stopped");
}
