use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use plant_common::{
    ConnectionError, ConnectionMonitor, IngestSupervisor, LoopState, TelemetryStore,
};

use crate::transport::Transport;

/// Background task moving readings from the transport into the store.
pub struct IngestLoop {
    transport: Arc<dyn Transport>,
    store: Arc<TelemetryStore>,
    connection: Arc<ConnectionMonitor>,
    supervisor: IngestSupervisor,
    state: watch::Sender<LoopState>,
    shutdown: watch::Receiver<bool>,
}

impl IngestLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<TelemetryStore>,
        connection: Arc<ConnectionMonitor>,
        poll_interval: Duration,
        backoff_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            transport,
            store,
            connection,
            supervisor: IngestSupervisor::new(poll_interval, backoff_interval),
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        self.supervisor.start();
        self.publish_state();
        info!("ingestion loop started ({})", self.transport.kind().as_str());
        let owns_link = !self.transport.tracks_connection();

        while !*self.shutdown.borrow() {
            let delay = match self.transport.fetch_latest().await {
                Ok(reading) => {
                    let stored = self.store.append(reading);
                    debug!(
                        seq = stored.seq,
                        temperature = stored.temperature,
                        power = stored.power,
                        "reading stored"
                    );
                    if owns_link && self.connection.connected() {
                        info!("device link up");
                    }
                    self.supervisor.on_success()
                }
                Err(err) => {
                    if owns_link {
                        self.connection.failed(ConnectionError::from(&err));
                    }
                    let delay = self.supervisor.on_failure(&err);
                    warn!(
                        "telemetry fetch failed ({} in a row), retrying in {:?}: {err}",
                        self.supervisor.consecutive_failures(),
                        delay
                    );
                    delay
                }
            };
            self.publish_state();

            if !self.pause(delay).await {
                break;
            }
            self.supervisor.resume();
            self.publish_state();
        }

        self.supervisor.stop();
        self.publish_state();
        info!("ingestion loop stopped");
    }

    /// Sleeps for `delay`. Returns false when shutdown was requested.
    async fn pause(&mut self, delay: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }

    fn publish_state(&self) {
        let state = self.supervisor.state();
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("ingestion loop {} -> {}", previous.as_str(), state.as_str());
        }
    }
}
