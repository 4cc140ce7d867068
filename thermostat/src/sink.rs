//! The telemetry ingestion boundary.
//!
//! A sink accepts an ordered batch of opaque payloads. Concrete sinks live in
//! the simulator binary; this crate only depends on the capability.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::TransmissionError;
use crate::model::Batch;

/// Ingestion sink trait
#[async_trait]
pub trait IngestionSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Deliver every payload of `batch`, in order.
    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError>;
}

#[async_trait]
impl<S: IngestionSink + ?Sized> IngestionSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        (**self).send_batch(batch).await
    }
}

#[async_trait]
impl<S: IngestionSink + ?Sized> IngestionSink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        (**self).send_batch(batch).await
    }
}
