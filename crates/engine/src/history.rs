use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tapeflow_core::Signal;

/// Bounded per-instrument ring of recently emitted signals, shared between
/// the workers (writers) and the dashboard API (reader).
#[derive(Clone)]
pub struct SignalHistory {
    capacity: usize,
    inner: Arc<Mutex<HashMap<String, VecDeque<Signal>>>>,
}

impl SignalHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn push(&self, signal: Signal) {
        let mut map = self.inner.lock().expect("signal history lock poisoned");
        let ring = map.entry(signal.instrument.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(signal);
    }

    /// Most recent signals for an instrument, newest last.
    pub fn recent(&self, instrument: &str, limit: usize) -> Vec<Signal> {
        let map = self.inner.lock().expect("signal history lock poisoned");
        match map.get(instrument) {
            Some(ring) => ring
                .iter()
                .skip(ring.len().saturating_sub(limit))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
