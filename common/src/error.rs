use thiserror::Error;

use crate::types::CommandKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device answered with status {0}")]
    BadStatus(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{kind} value {value} is outside [{min}, {max}]")]
    OutOfRange {
        kind: CommandKind,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0} requires a value")]
    MissingValue(CommandKind),
    #[error("{0} does not take a value")]
    UnexpectedValue(CommandKind),
    #[error("{0} is not supported by the active transport")]
    Unsupported(CommandKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection error: {reason}")]
pub struct ConnectionError {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<&TransportError> for ConnectionError {
    fn from(err: &TransportError) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}
