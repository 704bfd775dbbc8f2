use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const REFERENCE_TEMP_RANGE_C: (f64, f64) = (0.0, 100.0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub seq: u64,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    pub temperature: f64,
    #[serde(rename = "referenceTemperature")]
    pub reference_temperature: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl Reading {
    pub fn sanitize(&mut self) {
        for field in [
            &mut self.temperature,
            &mut self.reference_temperature,
            &mut self.voltage,
            &mut self.current,
            &mut self.power,
        ] {
            if !field.is_finite() {
                *field = 0.0;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Start,
    Stop,
    CloseLoop,
    OpenLoop,
    SetReferenceTemp,
    SetPower,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        Self::Start,
        Self::Stop,
        Self::CloseLoop,
        Self::OpenLoop,
        Self::SetReferenceTemp,
        Self::SetPower,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::CloseLoop => "CLOSE_LOOP",
            Self::OpenLoop => "OPEN_LOOP",
            Self::SetReferenceTemp => "SET_REFERENCE_TEMP",
            Self::SetPower => "SET_POWER",
        }
    }

    pub fn requires_value(self) -> bool {
        matches!(self, Self::SetReferenceTemp | Self::SetPower)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    kind: CommandKind,
    value: Option<f64>,
}

impl Command {
    pub fn new(kind: CommandKind, value: Option<f64>) -> Result<Self, ValidationError> {
        match (kind.requires_value(), value) {
            (true, None) => return Err(ValidationError::MissingValue(kind)),
            (false, Some(_)) => return Err(ValidationError::UnexpectedValue(kind)),
            _ => {}
        }

        if let Some(value) = value {
            let (min, max) = match kind {
                CommandKind::SetReferenceTemp => REFERENCE_TEMP_RANGE_C,
                _ => (0.0, f64::INFINITY),
            };
            if !value.is_finite() || value < min || value > max {
                return Err(ValidationError::OutOfRange {
                    kind,
                    value,
                    min,
                    max,
                });
            }
        }

        Ok(Self { kind, value })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
            Self::Error(_) => "ERROR",
        }
    }

    pub fn error_reason(&self) -> Option<&str> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Backoff,
    Stopped,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Backoff => "BACKOFF",
            Self::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedCommand {
    #[serde(skip)]
    pub kind: CommandKind,
    #[serde(rename = "command")]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl EncodedCommand {
    pub fn to_text(&self) -> String {
        match self.value {
            Some(value) => format!("{} {}", self.token, value),
            None => self.token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub kind: CommandKind,
    pub wire: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

pub fn wall_clock_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_zeroes_non_finite_fields() {
        let mut reading = Reading {
            temperature: f64::NAN,
            voltage: 12.0,
            power: f64::INFINITY,
            ..Reading::default()
        };
        reading.sanitize();

        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.voltage, 12.0);
        assert_eq!(reading.power, 0.0);
    }

    #[test]
    fn reference_temp_out_of_range_is_rejected() {
        let err = Command::new(CommandKind::SetReferenceTemp, Some(150.0)).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { value, .. } if value == 150.0));

        assert!(Command::new(CommandKind::SetReferenceTemp, Some(-0.1)).is_err());
        assert!(Command::new(CommandKind::SetReferenceTemp, Some(0.0)).is_ok());
        assert!(Command::new(CommandKind::SetReferenceTemp, Some(100.0)).is_ok());
    }

    #[test]
    fn power_must_be_non_negative_and_finite() {
        assert!(Command::new(CommandKind::SetPower, Some(0.0)).is_ok());
        assert!(Command::new(CommandKind::SetPower, Some(250.0)).is_ok());
        assert!(matches!(
            Command::new(CommandKind::SetPower, Some(-1.0)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            Command::new(CommandKind::SetPower, Some(f64::NAN)),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn value_presence_must_match_kind() {
        assert_eq!(
            Command::new(CommandKind::Start, Some(1.0)),
            Err(ValidationError::UnexpectedValue(CommandKind::Start))
        );
        assert_eq!(
            Command::new(CommandKind::SetPower, None),
            Err(ValidationError::MissingValue(CommandKind::SetPower))
        );
        for kind in [
            CommandKind::Start,
            CommandKind::Stop,
            CommandKind::CloseLoop,
            CommandKind::OpenLoop,
        ] {
            assert!(Command::new(kind, None).is_ok());
        }
    }

    #[test]
    fn encoded_command_renders_text_form() {
        let encoded = EncodedCommand {
            kind: CommandKind::SetReferenceTemp,
            token: "R".to_string(),
            value: Some(25.5),
        };
        assert_eq!(encoded.to_text(), "R 25.5");

        let bare = EncodedCommand {
            kind: CommandKind::Start,
            token: "TURN_ON".to_string(),
            value: None,
        };
        assert_eq!(bare.to_text(), "TURN_ON");
    }

    #[test]
    fn encoded_command_json_omits_missing_value() {
        let bare = EncodedCommand {
            kind: CommandKind::Stop,
            token: "B".to_string(),
            value: None,
        };
        assert_eq!(
            serde_json::to_value(&bare).unwrap(),
            serde_json::json!({ "command": "B" })
        );
    }
}
