//! Parsing of Azure-style `Key=Value;Key=Value` connection strings.
//!
//! Only pre-issued shared access signatures are accepted; the simulator never
//! mints tokens from a shared access key.

use std::collections::HashMap;
use thermostat::{Error, Result};

const IOT_HUB_API_VERSION: &str = "2021-04-12";
const EVENT_HUB_API_VERSION: &str = "2014-01";

fn parse_pairs(raw: &str) -> Result<HashMap<&str, &str>> {
    let mut pairs = HashMap::new();
    for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| Error::Configuration(format!("malformed connection string segment '{}'", key_hint(segment))))?;
        pairs.insert(key.trim(), value.trim());
    }
    Ok(pairs)
}

// Never echo a segment that might be a secret.
fn key_hint(segment: &str) -> &str {
    segment.get(..segment.len().min(12)).unwrap_or("")
}

fn required<'a>(pairs: &HashMap<&str, &'a str>, key: &str) -> Result<&'a str> {
    match pairs.get(key) {
        Some(value) if !value.is_empty() => Ok(*value),
        _ => Err(Error::Configuration(format!("connection string is missing {}", key))),
    }
}

fn signature(pairs: &HashMap<&str, &str>) -> Result<String> {
    if let Some(sas) = pairs.get("SharedAccessSignature").filter(|v| !v.is_empty()) {
        return Ok(sas.to_string());
    }
    if pairs.contains_key("SharedAccessKey") {
        return Err(Error::Configuration(
            "connection strings with SharedAccessKey are not supported, supply a SharedAccessSignature".to_string(),
        ));
    }
    Err(Error::Configuration("connection string is missing SharedAccessSignature".to_string()))
}

/// Device connection to an IoT Hub.
#[derive(Clone, PartialEq, Eq)]
pub struct IotHubConnection {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_signature: String,
}

impl IotHubConnection {
    /// `HostName=<hub>.azure-devices.net;DeviceId=<id>;SharedAccessSignature=<sas>`
    pub fn parse(raw: &str) -> Result<Self> {
        let pairs = parse_pairs(raw)?;
        Ok(Self {
            host_name: required(&pairs, "HostName")?.to_string(),
            device_id: required(&pairs, "DeviceId")?.to_string(),
            shared_access_signature: signature(&pairs)?,
        })
    }

    pub fn username(&self) -> String {
        format!("{}/{}/?api-version={}", self.host_name, self.device_id, IOT_HUB_API_VERSION)
    }

    pub fn events_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.device_id)
    }
}

impl std::fmt::Debug for IotHubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IotHubConnection")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Sender connection to one Event Hub.
#[derive(Clone, PartialEq, Eq)]
pub struct EventHubConnection {
    pub namespace_host: String,
    pub event_hub: String,
    pub shared_access_signature: String,
}

impl EventHubConnection {
    /// `Endpoint=sb://<ns>.servicebus.windows.net/;SharedAccessSignature=<sas>;EntityPath=<hub>`
    ///
    /// `event_hub` wins over the string's `EntityPath`.
    pub fn parse(raw: &str, event_hub: Option<&str>) -> Result<Self> {
        let pairs = parse_pairs(raw)?;
        let endpoint = required(&pairs, "Endpoint")?;
        let namespace_host = endpoint
            .trim_start_matches("sb://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();
        if namespace_host.is_empty() {
            return Err(Error::Configuration("connection string has an empty Endpoint".to_string()));
        }

        let event_hub = match event_hub.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => required(&pairs, "EntityPath")
                .map_err(|_| Error::Configuration("no Event Hub name: set EntityPath or --event-hub-name".to_string()))?
                .to_string(),
        };

        Ok(Self {
            namespace_host,
            event_hub,
            shared_access_signature: signature(&pairs)?,
        })
    }

    pub fn messages_url(&self) -> String {
        format!(
            "https://{}/{}/messages?timeout=60&api-version={}",
            self.namespace_host, self.event_hub, EVENT_HUB_API_VERSION
        )
    }
}

impl std::fmt::Debug for EventHubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHubConnection")
            .field("namespace_host", &self.namespace_host)
            .field("event_hub", &self.event_hub)
            .finish_non_exhaustive()
    }
}
