use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thermostat::{Batch, IngestionSink, TransmissionError};
use tracing::info;

use crate::connection::EventHubConnection;

const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";

#[derive(Debug, Serialize)]
struct BatchedEvent<'a> {
    #[serde(rename = "Body")]
    body: &'a str,
}

/// Event Hub REST batch body: `[{"Body": "<payload>"}, ...]`.
fn request_body(batch: &Batch) -> Result<Vec<u8>, TransmissionError> {
    let events = batch
        .iter()
        .map(|payload| {
            std::str::from_utf8(payload)
                .map(|body| BatchedEvent { body })
                .map_err(TransmissionError::sink)
        })
        .collect::<Result<Vec<_>, _>>()?;
    serde_json::to_vec(&events).map_err(TransmissionError::sink)
}

/// Event-stream sink: appends each batch to an Event Hub over HTTPS.
pub struct EventHubSink {
    client: reqwest::Client,
    url: String,
    signature: String,
}

impl EventHubSink {
    pub fn new(connection: &EventHubConnection, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        info!(
            "Sending to Event Hub {} in {}",
            connection.event_hub, connection.namespace_host
        );

        Ok(Self {
            client,
            url: connection.messages_url(),
            signature: connection.shared_access_signature.clone(),
        })
    }
}

#[async_trait]
impl IngestionSink for EventHubSink {
    fn name(&self) -> &str {
        "event-hub"
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        let body = request_body(batch)?;

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, &self.signature)
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(TransmissionError::sink)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransmissionError::Unauthorized),
            status => Err(TransmissionError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
