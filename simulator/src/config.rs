use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thermostat::{Error, Result, SendPolicy, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Plain MQTT broker, no TLS and no credentials
    Mqtt,
    /// Azure IoT Hub device-to-cloud messages over MQTT/TLS
    IotHub,
    /// Azure Event Hub batches over HTTPS
    EventHub,
}

/// Simulated IoT thermostat that streams telemetry to a cloud ingestion sink
#[derive(Debug, Clone, Parser)]
#[command(name = "simulator", version, about)]
pub struct Config {
    /// Where telemetry is sent
    #[arg(long, env = "SINK", value_enum, default_value = "mqtt")]
    pub sink: SinkKind,

    /// Device identifier (defaults to thermostat-<random uuid>)
    #[arg(long, env = "DEVICE_ID")]
    pub device_id: Option<String>,

    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic for the plain MQTT sink (defaults to telemetry/<device id>)
    #[arg(long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    /// Connection string for the IoT Hub or Event Hub sink
    #[arg(long, env = "CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// File holding the connection string, e.g. a mounted vault secret
    #[arg(long, env = "SECRET_FILE")]
    pub secret_file: Option<PathBuf>,

    /// Azure Key Vault holding the connection string
    #[arg(long, env = "KEY_VAULT_NAME", requires = "secret_name")]
    pub key_vault_name: Option<String>,

    #[arg(long, env = "SECRET_NAME")]
    pub secret_name: Option<String>,

    /// Bearer token for Key Vault. Environment only, never a flag, so it stays
    /// out of the process list.
    #[arg(skip = std::env::var("AZURE_ACCESS_TOKEN").ok())]
    pub vault_token: Option<String>,

    /// Event Hub name when the connection string has no EntityPath
    #[arg(long, env = "EVENT_HUB_NAME")]
    pub event_hub_name: Option<String>,

    #[arg(long, env = "TICK_INTERVAL_MS", default_value_t = 2000)]
    pub tick_interval_ms: u64,

    /// Per-attempt send timeout (defaults to the tick interval)
    #[arg(long, env = "SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// Attempts per reading; 1 disables retry
    #[arg(long, env = "MAX_SEND_ATTEMPTS", default_value_t = 1)]
    pub max_attempts: u32,

    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 16)]
    pub queue_capacity: usize,

    /// Power the device on right after startup
    #[arg(long)]
    pub start_on: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Configuration("tick interval must be positive".to_string()));
        }
        if self.send_timeout_ms == Some(0) {
            return Err(Error::Configuration("send timeout must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Configuration("max attempts must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Configuration("queue capacity must be at least 1".to_string()));
        }
        if matches!(&self.device_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::Configuration("device id cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn device_id(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| format!("thermostat-{}", uuid::Uuid::new_v4()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            tick_interval: self.tick_interval(),
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn send_policy(&self) -> SendPolicy {
        SendPolicy {
            timeout: self
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.tick_interval()),
            max_attempts: self.max_attempts,
        }
    }
}
