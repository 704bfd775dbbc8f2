use async_trait::async_trait;

use plant_common::{Ack, EncodedCommand, Reading, TransportError, TransportKind};

pub mod http;
pub mod mqtt;

pub use http::HttpTransport;
pub use mqtt::MqttTransport;

/// Device link used by the ingestion loop and the command dispatcher.
///
/// Request/response transports answer `fetch_latest` with the device's
/// current state. Push transports answer it with the next reading their
/// subscription delivers.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn fetch_latest(&self) -> Result<Reading, TransportError>;

    async fn send(&self, command: &EncodedCommand) -> Result<Ack, TransportError>;

    /// True when the transport maintains `ConnectionState` itself, so the
    /// ingestion loop must not infer link health from fetch results.
    fn tracks_connection(&self) -> bool {
        false
    }

    /// Releases background resources so a pending `fetch_latest` returns.
    fn close(&self) {}
}
