use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    error::{TransportError, ValidationError},
    types::{Command, CommandKind, EncodedCommand, Reading},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldNames {
    pub temperature: String,
    pub reference_temperature: Option<String>,
    pub voltage: String,
    pub current: String,
    pub power: String,
}

impl FieldNames {
    pub fn request_response() -> Self {
        Self {
            temperature: "temperature".to_string(),
            reference_temperature: None,
            voltage: "voltage".to_string(),
            current: "current".to_string(),
            power: "power".to_string(),
        }
    }

    pub fn publish_subscribe() -> Self {
        Self {
            temperature: "Temp".to_string(),
            reference_temperature: Some("Temp_Ref".to_string()),
            voltage: "Voltage".to_string(),
            current: "Current".to_string(),
            power: "Power".to_string(),
        }
    }

    // An empty reference key means the device never sends one.
    pub fn overlay<'de, D>(base: Self, deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let patch = FieldPatch::deserialize(deserializer)?;
        Ok(Self {
            temperature: patch.temperature.unwrap_or(base.temperature),
            reference_temperature: match patch.reference_temperature {
                Some(key) if key.is_empty() => None,
                Some(key) => Some(key),
                None => base.reference_temperature,
            },
            voltage: patch.voltage.unwrap_or(base.voltage),
            current: patch.current.unwrap_or(base.current),
            power: patch.power.unwrap_or(base.power),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FieldPatch {
    temperature: Option<String>,
    reference_temperature: Option<String>,
    voltage: Option<String>,
    current: Option<String>,
    power: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEncoding {
    pub start: Option<String>,
    pub stop: Option<String>,
    pub close_loop: Option<String>,
    pub open_loop: Option<String>,
    pub set_reference_temp: Option<String>,
    pub set_power: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandPatch {
    start: Option<String>,
    stop: Option<String>,
    close_loop: Option<String>,
    open_loop: Option<String>,
    set_reference_temp: Option<String>,
    set_power: Option<String>,
}

impl CommandEncoding {
    pub fn request_response() -> Self {
        Self {
            start: Some("A".to_string()),
            stop: Some("B".to_string()),
            close_loop: Some("MF".to_string()),
            open_loop: Some("ME".to_string()),
            set_reference_temp: Some("R".to_string()),
            set_power: None,
        }
    }

    pub fn publish_subscribe() -> Self {
        Self {
            start: Some("TURN_ON".to_string()),
            stop: Some("TURN_OFF".to_string()),
            close_loop: Some("CLOSE_LOOP".to_string()),
            open_loop: Some("OPEN_LOOP".to_string()),
            set_reference_temp: Some("SET_REF".to_string()),
            set_power: Some("SET_POWER".to_string()),
        }
    }

    // Kinds missing from the table keep their `base` token; "" disables one.
    pub fn overlay<'de, D>(base: Self, deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let patch = CommandPatch::deserialize(deserializer)?;
        Ok(Self {
            start: patch.start.or(base.start),
            stop: patch.stop.or(base.stop),
            close_loop: patch.close_loop.or(base.close_loop),
            open_loop: patch.open_loop.or(base.open_loop),
            set_reference_temp: patch.set_reference_temp.or(base.set_reference_temp),
            set_power: patch.set_power.or(base.set_power),
        })
    }

    pub fn token(&self, kind: CommandKind) -> Option<&str> {
        let token = match kind {
            CommandKind::Start => &self.start,
            CommandKind::Stop => &self.stop,
            CommandKind::CloseLoop => &self.close_loop,
            CommandKind::OpenLoop => &self.open_loop,
            CommandKind::SetReferenceTemp => &self.set_reference_temp,
            CommandKind::SetPower => &self.set_power,
        };
        token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn kind_for_token(&self, token: &str) -> Option<CommandKind> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| self.token(*kind) == Some(token))
    }

    pub fn encode(&self, command: &Command) -> Result<EncodedCommand, ValidationError> {
        let token = self
            .token(command.kind())
            .ok_or(ValidationError::Unsupported(command.kind()))?;

        Ok(EncodedCommand {
            kind: command.kind(),
            token: token.to_string(),
            value: command.value(),
        })
    }

    pub fn parse_text(&self, text: &str) -> Option<Command> {
        let mut parts = text.split_whitespace();
        let token = parts.next()?;
        let value = match parts.next() {
            Some(raw) => Some(raw.parse::<f64>().ok()?),
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }
        self.parse_token(token, value)
    }

    pub fn parse_token(&self, token: &str, value: Option<f64>) -> Option<Command> {
        let kind = self.kind_for_token(token)?;
        Command::new(kind, value).ok()
    }
}

// Missing or non-numeric fields become 0; only a non-object payload is an error.
pub fn decode_reading(
    payload: &[u8],
    fields: &FieldNames,
    fallback_reference: f64,
    now_ms: i64,
) -> Result<Reading, TransportError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| TransportError::Malformed(err.to_string()))?;
    let Value::Object(map) = value else {
        return Err(TransportError::Malformed(
            "expected a JSON object".to_string(),
        ));
    };

    let field = |name: &str| map.get(name).and_then(numeric).unwrap_or(0.0);
    let reference_temperature = fields
        .reference_temperature
        .as_deref()
        .and_then(|name| map.get(name))
        .and_then(numeric)
        .unwrap_or(fallback_reference);

    let mut reading = Reading {
        seq: 0,
        timestamp_ms: now_ms,
        temperature: field(&fields.temperature),
        reference_temperature,
        voltage: field(&fields.voltage),
        current: field(&fields.current),
        power: field(&fields.power),
    };
    reading.sanitize();
    Ok(reading)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
