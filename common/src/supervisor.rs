use std::time::Duration;

use crate::{error::TransportError, types::LoopState};

#[derive(Debug, Clone)]
pub struct IngestSupervisor {
    poll_interval: Duration,
    backoff_interval: Duration,
    state: LoopState,
    consecutive_failures: u32,
    last_error: Option<TransportError>,
}

impl IngestSupervisor {
    pub fn new(poll_interval: Duration, backoff_interval: Duration) -> Self {
        Self {
            poll_interval,
            backoff_interval,
            state: LoopState::Idle,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    pub fn start(&mut self) {
        if self.state == LoopState::Idle {
            self.state = LoopState::Running;
        }
    }

    pub fn on_success(&mut self) -> Duration {
        if self.state == LoopState::Stopped {
            return Duration::ZERO;
        }
        self.state = LoopState::Running;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.poll_interval
    }

    pub fn on_failure(&mut self, err: &TransportError) -> Duration {
        if self.state == LoopState::Stopped {
            return Duration::ZERO;
        }
        self.state = LoopState::Backoff;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(err.clone());
        self.backoff_interval
    }

    pub fn resume(&mut self) {
        if self.state == LoopState::Backoff {
            self.state = LoopState::Running;
        }
    }

    pub fn stop(&mut self) {
        self.state = LoopState::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        self.state == LoopState::Stopped
    }
}
