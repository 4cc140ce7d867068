mod commands;
mod config;
mod connection;
mod credentials;
mod eventhub;
mod mqtt;

use anyhow::Context;
use clap::Parser;
use commands::Command;
use config::{Config, SinkKind};
use connection::{EventHubConnection, IotHubConnection};
use eventhub::EventHubSink;
use mqtt::{MqttSink, MqttSinkOptions};
use std::sync::Arc;
use std::time::Duration;
use thermostat::{IngestionSink, SystemClock, Thermostat, Transmitter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let device_id = config.device_id();
    info!("Starting thermostat simulator");
    info!(
        "Device: {}, Sink: {:?}, Tick: {:?}",
        device_id,
        config.sink,
        config.tick_interval()
    );

    let sink = match build_sink(&config, &device_id).await {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to create ingestion sink: {:#}", e);
            std::process::exit(1);
        }
    };

    let transmitter = Transmitter::new(sink, config.send_policy());
    let mut thermostat = Thermostat::spawn(transmitter, Arc::new(SystemClock), config.settings());

    // Initial state goes out before any user input
    thermostat.report();
    if config.start_on {
        thermostat.set_power(true);
    }

    println!("{}", commands::status_line(&thermostat));
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match Command::parse(&line) {
                        Ok(Some(command)) => {
                            if !commands::apply(&mut thermostat, command) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(msg) => println!("{}", msg),
                    },
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read command: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Shutting down");
    if tokio::time::timeout(SHUTDOWN_GRACE, thermostat.shutdown()).await.is_err() {
        warn!("Pending telemetry not delivered within {:?}", SHUTDOWN_GRACE);
    }
}

async fn build_sink(config: &Config, device_id: &str) -> anyhow::Result<Box<dyn IngestionSink>> {
    match config.sink {
        SinkKind::Mqtt => {
            let options = MqttSinkOptions::broker(
                &config.mqtt_broker,
                config.mqtt_port,
                device_id,
                config.topic.as_deref(),
            );
            Ok(Box::new(MqttSink::connect(options)))
        }
        SinkKind::IotHub => {
            let raw = credentials::resolve(config)
                .await
                .context("failed to resolve IoT Hub connection string")?;
            let connection = IotHubConnection::parse(&raw)?;
            Ok(Box::new(MqttSink::connect(MqttSinkOptions::iot_hub(&connection))))
        }
        SinkKind::EventHub => {
            let raw = credentials::resolve(config)
                .await
                .context("failed to resolve Event Hub connection string")?;
            let connection = EventHubConnection::parse(&raw, config.event_hub_name.as_deref())?;
            let sink = EventHubSink::new(&connection, config.send_policy().timeout)
                .context("failed to create Event Hub client")?;
            Ok(Box::new(sink))
        }
    }
}
