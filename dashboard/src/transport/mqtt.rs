use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use plant_common::{
    decode_reading, wall_clock_ms, Ack, ConnectionError, ConnectionMonitor, EncodedCommand,
    FieldNames, MqttConfig, OperatorReference, Reading, TransportError, TransportKind,
};

use super::Transport;

const DELIVERY_QUEUE: usize = 64;

type ReadingCallback = Box<dyn Fn(Reading) + Send + Sync>;

/// Decodes publishes arriving on the device data topic.
struct DataSubscription {
    topic: String,
    fields: FieldNames,
    max_payload_bytes: usize,
    reference: Arc<OperatorReference>,
}

impl DataSubscription {
    fn decode(&self, topic: &str, payload: &[u8]) -> Option<Reading> {
        if topic != self.topic {
            return None;
        }
        if payload.len() > self.max_payload_bytes {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                topic,
                payload.len()
            );
            return None;
        }

        match decode_reading(payload, &self.fields, self.reference.get(), wall_clock_ms()) {
            Ok(reading) => Some(reading),
            Err(err) => {
                warn!("undecodable telemetry on {topic}: {err}");
                None
            }
        }
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    command_topic: String,
    connection: Arc<ConnectionMonitor>,
    readings: Mutex<mpsc::Receiver<Reading>>,
    driver: JoinHandle<()>,
}

impl MqttTransport {
    /// Starts the session driver. Connection progress is reported through
    /// `connection`; the driver sleeps `backoff` after every poll error.
    pub fn connect(
        config: &MqttConfig,
        backoff: Duration,
        connection: Arc<ConnectionMonitor>,
        reference: Arc<OperatorReference>,
    ) -> Self {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE);

        let subscription = DataSubscription {
            topic: config.data_topic.clone(),
            fields: config.fields.clone(),
            max_payload_bytes: config.max_payload_bytes,
            reference,
        };
        let on_reading: ReadingCallback = Box::new(move |reading| {
            if let Err(err) = tx.try_send(reading) {
                warn!("telemetry delivery queue rejected reading: {err}");
            }
        });

        let driver = tokio::spawn(drive_session(
            client.clone(),
            eventloop,
            subscription,
            Arc::clone(&connection),
            backoff,
            on_reading,
        ));

        info!(
            "mqtt session starting for {}:{}",
            config.broker_host, config.broker_port
        );

        Self {
            client,
            command_topic: config.command_topic.clone(),
            connection,
            readings: Mutex::new(rx),
            driver,
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    fn tracks_connection(&self) -> bool {
        true
    }

    async fn fetch_latest(&self) -> Result<Reading, TransportError> {
        self.readings
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Unreachable("mqtt session closed".to_string()))
    }

    async fn send(&self, command: &EncodedCommand) -> Result<Ack, TransportError> {
        if !self.connection.is_connected() {
            return Err(TransportError::Unreachable(
                "not connected to broker".to_string(),
            ));
        }

        let wire = command.to_text();
        self.client
            .publish(&self.command_topic, QoS::AtLeastOnce, false, wire.clone())
            .await
            .map_err(|err| TransportError::Unreachable(err.to_string()))?;

        Ok(Ack {
            kind: command.kind,
            wire,
            status: None,
        })
    }

    /// With a live session the driver stops once DISCONNECT is on the wire.
    /// Otherwise there is nothing to flush and the driver is aborted.
    fn close(&self) {
        let graceful = self.connection.is_connected()
            && match self.client.try_disconnect() {
                Ok(()) => true,
                Err(err) => {
                    debug!("mqtt disconnect request not queued: {err}");
                    false
                }
            };
        if !graceful {
            self.driver.abort();
        }
        self.connection.disconnected();
    }
}

async fn drive_session(
    client: AsyncClient,
    mut eventloop: EventLoop,
    subscription: DataSubscription,
    connection: Arc<ConnectionMonitor>,
    backoff: Duration,
    on_reading: ReadingCallback,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                if connection.connected() {
                    info!("mqtt connected");
                }
                // Subscriptions do not survive a clean-session reconnect.
                if let Err(err) = client.try_subscribe(subscription.topic.clone(), QoS::AtMostOnce)
                {
                    warn!("mqtt subscribe to {} failed: {err}", subscription.topic);
                }
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                if let Some(reading) = subscription.decode(&message.topic, &message.payload) {
                    on_reading(reading);
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                if connection.disconnected() {
                    info!("mqtt broker closed the session");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("mqtt session closed");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                if connection.failed(ConnectionError {
                    reason: err.to_string(),
                }) {
                    warn!("mqtt connection lost: {err}");
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use plant_common::{CommandKind, ConnectionState};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::timeout,
    };

    use super::*;

    fn subscription() -> DataSubscription {
        DataSubscription {
            topic: "esp32/data".to_string(),
            fields: FieldNames::publish_subscribe(),
            max_payload_bytes: 128,
            reference: Arc::new(OperatorReference::new(0.0)),
        }
    }

    #[test]
    fn decodes_data_topic_payload() {
        let reading = subscription()
            .decode(
                "esp32/data",
                br#"{"Temp": 41.5, "Temp_Ref": 45, "Voltage": 12.1, "Current": 0.8, "Power": 9.7}"#,
            )
            .unwrap();

        assert_eq!(reading.temperature, 41.5);
        assert_eq!(reading.reference_temperature, 45.0);
        assert_eq!(reading.voltage, 12.1);
        assert_eq!(reading.current, 0.8);
        assert_eq!(reading.power, 9.7);
    }

    #[test]
    fn partial_payload_keeps_the_reading() {
        let reading = subscription()
            .decode("esp32/data", br#"{"Temp": 22}"#)
            .unwrap();

        assert_eq!(reading.temperature, 22.0);
        assert_eq!(reading.power, 0.0);
    }

    #[test]
    fn ignores_other_topics_oversized_and_garbage_payloads() {
        let subscription = subscription();

        assert!(subscription
            .decode("esp32/commands", br#"{"Temp": 22}"#)
            .is_none());
        assert!(subscription.decode("esp32/data", &[b' '; 256]).is_none());
        assert!(subscription.decode("esp32/data", b"TURN_ON").is_none());
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn broker_config(listener: &TcpListener) -> MqttConfig {
        MqttConfig {
            broker_port: listener.local_addr().unwrap().port(),
            ..MqttConfig::default()
        }
    }

    /// Accepts one client, reads its CONNECT and answers with an accepted CONNACK.
    async fn accept_session(listener: &TcpListener) -> TcpStream {
        let (mut socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut connect = [0u8; 256];
        let read = socket.read(&mut connect).await.unwrap();
        assert!(read > 0);
        assert_eq!(connect[0] >> 4, 1);
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        socket
    }

    fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![
            0x30,
            (2 + topic.len() + payload.len()) as u8,
            0x00,
            topic.len() as u8,
        ];
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    async fn wait_for(connection: &ConnectionMonitor, reached: impl Fn(&ConnectionState) -> bool) {
        timeout(WAIT, async {
            while !reached(&connection.get()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    fn start_command() -> EncodedCommand {
        EncodedCommand {
            kind: CommandKind::Start,
            token: "TURN_ON".to_string(),
            value: None,
        }
    }

    #[tokio::test]
    async fn send_is_refused_while_disconnected() {
        let connection = Arc::new(ConnectionMonitor::new());
        let transport = MqttTransport::connect(
            &MqttConfig {
                broker_port: 1,
                ..MqttConfig::default()
            },
            Duration::from_millis(100),
            Arc::clone(&connection),
            Arc::new(OperatorReference::default()),
        );

        let result = transport.send(&start_command()).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));

        wait_for(&connection, |state| matches!(state, ConnectionState::Error(_))).await;
        let result = transport.send(&start_command()).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));

        transport.close();
        assert_eq!(connection.get(), ConnectionState::Disconnected);
        assert_eq!(
            transport.fetch_latest().await,
            Err(TransportError::Unreachable("mqtt session closed".to_string()))
        );
    }

    #[tokio::test]
    async fn session_follows_connack_loss_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connection = Arc::new(ConnectionMonitor::new());
        let transport = MqttTransport::connect(
            &broker_config(&listener),
            Duration::from_millis(50),
            Arc::clone(&connection),
            Arc::new(OperatorReference::default()),
        );

        let mut session = accept_session(&listener).await;
        wait_for(&connection, |state| *state == ConnectionState::Connected).await;

        session
            .write_all(&publish_frame("esp32/data", br#"{"Temp": 30.5, "Power": 12}"#))
            .await
            .unwrap();
        let reading = timeout(WAIT, transport.fetch_latest())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.temperature, 30.5);
        assert_eq!(reading.power, 12.0);

        drop(session);
        wait_for(&connection, |state| matches!(state, ConnectionState::Error(_))).await;
        assert!(matches!(
            transport.send(&start_command()).await,
            Err(TransportError::Unreachable(_))
        ));

        let _session = accept_session(&listener).await;
        wait_for(&connection, |state| *state == ConnectionState::Connected).await;
        let ack = transport.send(&start_command()).await.unwrap();
        assert_eq!(ack.wire, "TURN_ON");
    }

    #[tokio::test]
    async fn close_flushes_disconnect_before_stopping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connection = Arc::new(ConnectionMonitor::new());
        let transport = MqttTransport::connect(
            &broker_config(&listener),
            Duration::from_millis(50),
            Arc::clone(&connection),
            Arc::new(OperatorReference::default()),
        );

        let mut session = accept_session(&listener).await;
        wait_for(&connection, |state| *state == ConnectionState::Connected).await;

        transport.close();

        let mut received = Vec::new();
        timeout(WAIT, session.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert!(received.ends_with(&[0xE0, 0x00]));
        assert_eq!(connection.get(), ConnectionState::Disconnected);
        assert_eq!(
            timeout(WAIT, transport.fetch_latest()).await.unwrap(),
            Err(TransportError::Unreachable("mqtt session closed".to_string()))
        );
    }
}
