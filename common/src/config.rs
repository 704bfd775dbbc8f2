use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    codec::{CommandEncoding, FieldNames},
    store::DEFAULT_CAPACITY,
    topics::{HTTP_COMMAND_PATH, HTTP_DATA_PATH, TOPIC_DEVICE_COMMANDS, TOPIC_DEVICE_DATA},
};

const MIN_TIMEOUT_MS: u64 = 100;
const MIN_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Mqtt,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Mqtt => "mqtt",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub endpoint_url: String,
    pub data_path: String,
    pub command_path: String,
    pub request_timeout_ms: u64,
    #[serde(deserialize_with = "http_fields")]
    pub fields: FieldNames,
    #[serde(deserialize_with = "http_commands")]
    pub commands: CommandEncoding,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://192.168.4.1".to_string(),
            data_path: HTTP_DATA_PATH.to_string(),
            command_path: HTTP_COMMAND_PATH.to_string(),
            request_timeout_ms: 5_000,
            fields: FieldNames::request_response(),
            commands: CommandEncoding::request_response(),
        }
    }
}

impl HttpConfig {
    pub fn data_url(&self) -> String {
        join_url(&self.endpoint_url, &self.data_path)
    }

    pub fn command_url(&self) -> String {
        join_url(&self.endpoint_url, &self.command_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub data_topic: String,
    pub command_topic: String,
    pub keep_alive_secs: u64,
    pub max_payload_bytes: usize,
    #[serde(deserialize_with = "mqtt_fields")]
    pub fields: FieldNames,
    #[serde(deserialize_with = "mqtt_commands")]
    pub commands: CommandEncoding,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "plant-dashboard".to_string(),
            username: String::new(),
            password: String::new(),
            data_topic: TOPIC_DEVICE_DATA.to_string(),
            command_topic: TOPIC_DEVICE_COMMANDS.to_string(),
            keep_alive_secs: 60,
            max_payload_bytes: 512,
            fields: FieldNames::publish_subscribe(),
            commands: CommandEncoding::publish_subscribe(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub poll_interval_ms: u64,
    pub backoff_interval_ms: u64,
    pub capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            backoff_interval_ms: 5_000,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub transport: TransportKind,
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

impl DashboardConfig {
    pub fn sanitize(&mut self) {
        self.ingest.capacity = self.ingest.capacity.max(1);
        self.ingest.backoff_interval_ms = self.ingest.backoff_interval_ms.max(MIN_BACKOFF_MS);
        self.http.request_timeout_ms = self.http.request_timeout_ms.max(MIN_TIMEOUT_MS);
        self.mqtt.keep_alive_secs = self.mqtt.keep_alive_secs.clamp(5, 3_600);
        self.mqtt.max_payload_bytes = self.mqtt.max_payload_bytes.max(64);

        let trimmed = self.http.endpoint_url.trim().trim_end_matches('/');
        self.http.endpoint_url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
    }

    pub fn active_encoding(&self) -> &CommandEncoding {
        match self.transport {
            TransportKind::Http => &self.http.commands,
            TransportKind::Mqtt => &self.mqtt.commands,
        }
    }
}

fn http_fields<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FieldNames, D::Error> {
    FieldNames::overlay(FieldNames::request_response(), deserializer)
}

fn http_commands<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CommandEncoding, D::Error> {
    CommandEncoding::overlay(CommandEncoding::request_response(), deserializer)
}

fn mqtt_fields<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FieldNames, D::Error> {
    FieldNames::overlay(FieldNames::publish_subscribe(), deserializer)
}

fn mqtt_commands<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CommandEncoding, D::Error> {
    CommandEncoding::overlay(CommandEncoding::publish_subscribe(), deserializer)
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
