pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod store;
pub mod supervisor;
pub mod topics;
pub mod types;

pub use codec::{decode_reading, CommandEncoding, FieldNames};
pub use config::{DashboardConfig, HttpConfig, IngestConfig, MqttConfig, TransportKind};
pub use connection::{ConnectionMonitor, OperatorReference};
pub use error::{ConnectionError, DispatchError, TransportError, ValidationError};
pub use store::{StoreSnapshot, TelemetryStore};
pub use supervisor::IngestSupervisor;
pub use topics::*;
pub use types::{
    wall_clock_ms, Ack, Command, CommandKind, ConnectionState, EncodedCommand, LoopState, Reading,
};
