use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use plant_common::{Ack, Command, CommandEncoding, CommandKind, DispatchError, OperatorReference};

use crate::transport::Transport;

/// Validates operator commands and sends them one at a time.
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    encoding: CommandEncoding,
    reference: Arc<OperatorReference>,
    in_flight: Mutex<()>,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        encoding: CommandEncoding,
        reference: Arc<OperatorReference>,
    ) -> Self {
        Self {
            transport,
            encoding,
            reference,
            in_flight: Mutex::new(()),
        }
    }

    /// Invalid commands fail immediately. Valid ones wait for any dispatch
    /// already in flight before reaching the transport.
    pub async fn dispatch(
        &self,
        kind: CommandKind,
        value: Option<f64>,
    ) -> Result<Ack, DispatchError> {
        let command = Command::new(kind, value)?;
        let encoded = self.encoding.encode(&command)?;

        let _guard = self.in_flight.lock().await;
        let ack = match self.transport.send(&encoded).await {
            Ok(ack) => ack,
            Err(err) => {
                warn!("command {} failed: {err}", encoded.to_text());
                return Err(err.into());
            }
        };

        if let (CommandKind::SetReferenceTemp, Some(value)) = (kind, command.value()) {
            self.reference.set(value);
        }
        info!("command {} acknowledged", ack.wire);
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;

    use plant_common::{EncodedCommand, Reading, TransportError, TransportKind, ValidationError};

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        events: SyncMutex<Vec<String>>,
        fail_with: Option<TransportError>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Mqtt
        }

        async fn fetch_latest(&self) -> Result<Reading, TransportError> {
            Ok(Reading::default())
        }

        async fn send(&self, command: &EncodedCommand) -> Result<Ack, TransportError> {
            let wire = command.to_text();
            self.events.lock().push(format!("begin {wire}"));
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.events.lock().push(format!("end {wire}"));

            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(Ack {
                    kind: command.kind,
                    wire,
                    status: None,
                }),
            }
        }
    }

    fn dispatcher(
        transport: Arc<RecordingTransport>,
    ) -> (CommandDispatcher, Arc<OperatorReference>) {
        let reference = Arc::new(OperatorReference::default());
        let dispatcher = CommandDispatcher::new(
            transport,
            CommandEncoding::publish_subscribe(),
            Arc::clone(&reference),
        );
        (dispatcher, reference)
    }

    #[tokio::test(start_paused = true)]
    async fn valid_reference_is_sent_and_remembered() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, reference) = dispatcher(Arc::clone(&transport));

        let ack = dispatcher
            .dispatch(CommandKind::SetReferenceTemp, Some(25.5))
            .await
            .unwrap();

        assert_eq!(ack.wire, "SET_REF 25.5");
        assert_eq!(reference.get(), 25.5);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_commands_never_reach_the_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, reference) = dispatcher(Arc::clone(&transport));

        let out_of_range = dispatcher
            .dispatch(CommandKind::SetReferenceTemp, Some(150.0))
            .await;
        assert!(matches!(
            out_of_range,
            Err(DispatchError::Validation(ValidationError::OutOfRange { .. }))
        ));

        let unexpected = dispatcher.dispatch(CommandKind::Start, Some(1.0)).await;
        assert_eq!(
            unexpected,
            Err(DispatchError::Validation(ValidationError::UnexpectedValue(
                CommandKind::Start
            )))
        );

        assert!(transport.events.lock().is_empty());
        assert_eq!(reference.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_surfaced_and_reference_kept() {
        let transport = Arc::new(RecordingTransport {
            fail_with: Some(TransportError::Unreachable("broker down".to_string())),
            ..RecordingTransport::default()
        });
        let (dispatcher, reference) = dispatcher(Arc::clone(&transport));

        let result = dispatcher
            .dispatch(CommandKind::SetReferenceTemp, Some(40.0))
            .await;

        assert_eq!(
            result,
            Err(DispatchError::Transport(TransportError::Unreachable(
                "broker down".to_string()
            )))
        );
        assert_eq!(reference.get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_dispatches_do_not_interleave() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _) = dispatcher(Arc::clone(&transport));
        let dispatcher = Arc::new(dispatcher);

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(CommandKind::Start, None).await })
        };
        let second = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(CommandKind::CloseLoop, None).await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let events = transport.events.lock().clone();
        assert_eq!(events.len(), 4);
        assert!(events[0].starts_with("begin"));
        assert!(events[1].starts_with("end"));
        assert!(events[2].starts_with("begin"));
        assert!(events[3].starts_with("end"));
        assert_eq!(events[0]["begin ".len()..], events[1]["end ".len()..]);
    }
}
