use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use thermostat::{Batch, IngestionSink, TransmissionError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::connection::IotHubConnection;

const IOT_HUB_MQTT_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Connection settings for [`MqttSink`].
#[derive(Clone)]
pub struct MqttSinkOptions {
    pub name: &'static str,
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub credentials: Option<(String, String)>,
    pub tls: bool,
}

impl MqttSinkOptions {
    /// Plain broker, telemetry on `topic` (default `telemetry/<device_id>`).
    pub fn broker(host: &str, port: u16, device_id: &str, topic: Option<&str>) -> Self {
        Self {
            name: "mqtt",
            client_id: device_id.to_string(),
            host: host.to_string(),
            port,
            topic: topic
                .map(str::to_string)
                .unwrap_or_else(|| format!("telemetry/{}", device_id)),
            credentials: None,
            tls: false,
        }
    }

    /// IoT Hub device-to-cloud endpoint, authenticated with the device's SAS.
    pub fn iot_hub(connection: &IotHubConnection) -> Self {
        Self {
            name: "iot-hub",
            client_id: connection.device_id.clone(),
            host: connection.host_name.clone(),
            port: IOT_HUB_MQTT_PORT,
            topic: connection.events_topic(),
            credentials: Some((connection.username(), connection.shared_access_signature.clone())),
            tls: true,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            mqtt_options.set_credentials(username, password);
        }
        if self.tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }
        mqtt_options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Up,
    Down(String),
}

/// What the event loop has seen so far, shared with senders over a watch
/// channel.
#[derive(Debug, Clone)]
struct Link {
    state: LinkState,
    acks: u64,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            state: LinkState::Connecting,
            acks: 0,
        }
    }
}

/// Device-message sink: every payload of a batch is published as its own
/// QoS 1 message and counts as sent once the broker acknowledges it.
pub struct MqttSink {
    name: &'static str,
    client: AsyncClient,
    topic: String,
    link: watch::Receiver<Link>,
    eventloop: JoinHandle<()>,
}

impl MqttSink {
    /// Must be called from within a tokio runtime; the event loop runs on its
    /// own task and reconnects on error.
    pub fn connect(options: MqttSinkOptions) -> Self {
        info!(
            "Connecting {} sink to {}:{} as {}",
            options.name, options.host, options.port, options.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(options.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let (link_tx, link) = watch::channel(Link::default());

        let eventloop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        link_tx.send_modify(|link| link.state = LinkState::Up);
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!("Broker acknowledged message {}", ack.pkid);
                        link_tx.send_modify(|link| link.acks += 1);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT eventloop error: {}", e);
                        // Senders fail fast until the next ConnAck
                        let reason = e.to_string();
                        link_tx.send_modify(|link| link.state = LinkState::Down(reason));
                        // rumqttc reconnects on the next poll
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            name: options.name,
            client,
            topic: options.topic,
            link,
            eventloop,
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.eventloop.abort();
    }
}

fn publish_error(err: ClientError) -> TransmissionError {
    TransmissionError::sink(err)
}

/// Waits out the first connection attempt. Returns the ack count to wait past.
async fn wait_until_up(link: &mut watch::Receiver<Link>) -> Result<u64, TransmissionError> {
    loop {
        {
            let current = link.borrow_and_update();
            match &current.state {
                LinkState::Up => return Ok(current.acks),
                LinkState::Down(reason) => return Err(TransmissionError::Disconnected(reason.clone())),
                LinkState::Connecting => {}
            }
        }
        link.changed().await.map_err(|_| TransmissionError::Closed)?;
    }
}

async fn wait_for_ack(link: &mut watch::Receiver<Link>, after: u64) -> Result<(), TransmissionError> {
    loop {
        {
            let current = link.borrow_and_update();
            if current.acks > after {
                return Ok(());
            }
            if let LinkState::Down(reason) = &current.state {
                return Err(TransmissionError::Disconnected(reason.clone()));
            }
        }
        link.changed().await.map_err(|_| TransmissionError::Closed)?;
    }
}

#[async_trait]
impl IngestionSink for MqttSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), TransmissionError> {
        let mut link = self.link.clone();

        for payload in batch.iter() {
            // Never queue into a dead connection, rumqttc would hold it silently
            let acks = wait_until_up(&mut link).await?;

            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload.to_vec())
                .await
                .map_err(publish_error)?;

            // The caller's timeout bounds this wait
            wait_for_ack(&mut link, acks).await?;
        }
        Ok(())
    }
}
