use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::{error::ConnectionError, types::ConnectionState};

#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    state: RwLock<ConnectionState>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionState {
        self.state.read().clone()
    }

    // true when the state changed
    pub fn set(&self, next: ConnectionState) -> bool {
        if *self.state.read() == next {
            return false;
        }
        let mut state = self.state.write();
        if *state == next {
            return false;
        }
        *state = next;
        true
    }

    pub fn connected(&self) -> bool {
        self.set(ConnectionState::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.set(ConnectionState::Disconnected)
    }

    pub fn failed(&self, err: ConnectionError) -> bool {
        self.set(ConnectionState::Error(err.reason))
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.read(), ConnectionState::Connected)
    }
}

// f64 bits of the last acknowledged operator reference.
#[derive(Debug, Default)]
pub struct OperatorReference(AtomicU64);

impl OperatorReference {
    pub fn new(initial: f64) -> Self {
        Self(AtomicU64::new(initial.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_real_transitions() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(monitor.get(), ConnectionState::Disconnected);

        assert!(monitor.connected());
        assert!(!monitor.connected());
        assert!(monitor.is_connected());

        assert!(monitor.failed(ConnectionError {
            reason: "refused".to_string()
        }));
        assert!(!monitor.failed(ConnectionError {
            reason: "refused".to_string()
        }));
        assert!(monitor.failed(ConnectionError {
            reason: "timed out".to_string()
        }));
        assert_eq!(monitor.get().error_reason(), Some("timed out"));

        assert!(monitor.disconnected());
        assert!(!monitor.is_connected());
    }

    #[test]
    fn operator_reference_round_trips_value() {
        let reference = OperatorReference::default();
        assert_eq!(reference.get(), 0.0);
        reference.set(25.5);
        assert_eq!(reference.get(), 25.5);
    }
}
