use parking_lot::RwLock;
use serde::Serialize;

use crate::types::Reading;

pub const DEFAULT_CAPACITY: usize = 3_600;

#[derive(Debug)]
struct Series {
    slots: Vec<Reading>,
    head: usize,
    len: usize,
    next_seq: u64,
    last_timestamp_ms: Option<i64>,
}

impl Series {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Reading::default(); capacity.max(1)],
            head: 0,
            len: 0,
            next_seq: 1,
            last_timestamp_ms: None,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, mut reading: Reading) -> Reading {
        reading.sanitize();
        reading.seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);

        if let Some(last) = self.last_timestamp_ms {
            reading.timestamp_ms = reading.timestamp_ms.max(last);
        }
        self.last_timestamp_ms = Some(reading.timestamp_ms);

        let capacity = self.capacity();
        self.slots[self.head] = reading;
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
        reading
    }

    fn latest(&self) -> Option<Reading> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.capacity();
        Some(self.slots[(self.head + capacity - 1) % capacity])
    }

    fn window(&self, n: usize) -> Vec<Reading> {
        let count = n.min(self.len);
        let capacity = self.capacity();
        let start = (self.head + capacity - count) % capacity;
        (0..count)
            .map(|offset| self.slots[(start + offset) % capacity])
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub latest: Option<Reading>,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct TelemetryStore {
    series: RwLock<Series>,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(Series::with_capacity(capacity)),
        }
    }

    pub fn append(&self, reading: Reading) -> Reading {
        self.series.write().push(reading)
    }

    pub fn latest(&self) -> Option<Reading> {
        self.series.read().latest()
    }

    pub fn window(&self, n: usize) -> Vec<Reading> {
        self.series.read().window(n)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let series = self.series.read();
        StoreSnapshot {
            latest: series.latest(),
            len: series.len,
            capacity: series.capacity(),
        }
    }

    pub fn len(&self) -> usize {
        self.series.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.series.read().capacity()
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
