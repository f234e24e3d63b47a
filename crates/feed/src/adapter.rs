use std::collections::HashMap;
use tapeflow_core::{Fault, RawTick, Tick};
use tracing::debug;

/// Normalizes raw tape events into the canonical tick stream.
///
/// Enforces monotonic sequence numbers per instrument: out-of-order and
/// duplicate events are dropped and counted, never re-ordered. Instruments
/// outside the configured set are rejected outright.
#[derive(Debug)]
pub struct FeedAdapter {
    instruments: Vec<String>,
    last_sequence: HashMap<String, u64>,
    dropped: u64,
    rejected_unknown: u64,
}

impl FeedAdapter {
    pub fn new(instruments: Vec<String>) -> Self {
        Self {
            instruments,
            last_sequence: HashMap::new(),
            dropped: 0,
            rejected_unknown: 0,
        }
    }

    /// Validate one raw event. `Err` carries a typed [`Fault`] for the
    /// diagnostics feed; the event itself is discarded either way.
    pub fn ingest(&mut self, raw: RawTick) -> Result<Tick, Fault> {
        if !self.instruments.iter().any(|i| *i == raw.instrument) {
            self.rejected_unknown += 1;
            debug!(instrument = %raw.instrument, "tick for unconfigured instrument dropped");
            return Err(Fault::UnknownInstrument {
                instrument: raw.instrument,
            });
        }

        let last = self.last_sequence.get(&raw.instrument).copied();
        if let Some(last) = last {
            if raw.sequence <= last {
                self.dropped += 1;
                debug!(
                    instrument = %raw.instrument,
                    last_sequence = last,
                    got = raw.sequence,
                    "out-of-order tick dropped"
                );
                return Err(Fault::FeedGap {
                    instrument: raw.instrument,
                    expected: last + 1,
                    got: raw.sequence,
                });
            }
        }

        self.last_sequence
            .insert(raw.instrument.clone(), raw.sequence);
        Ok(Tick {
            instrument: raw.instrument,
            timestamp: raw.timestamp,
            price: raw.price,
            volume: raw.volume,
            side: raw.side,
            sequence: raw.sequence,
        })
    }

    /// Events dropped for sequence violations.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Events rejected for unknown instruments.
    pub fn rejected_unknown(&self) -> u64 {
        self.rejected_unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tapeflow_core::TickSide;

    fn raw(instrument: &str, seq: u64) -> RawTick {
        RawTick {
            instrument: instrument.to_string(),
            timestamp: Utc::now(),
            price: dec!(1.1),
            volume: dec!(1),
            side: TickSide::Trade,
            sequence: seq,
        }
    }

    #[test]
    fn test_monotonic_sequence_accepted() {
        let mut adapter = FeedAdapter::new(vec!["EURUSD".to_string()]);
        assert!(adapter.ingest(raw("EURUSD", 1)).is_ok());
        assert!(adapter.ingest(raw("EURUSD", 2)).is_ok());
        // Gaps are allowed; only regressions are dropped.
        assert!(adapter.ingest(raw("EURUSD", 10)).is_ok());
        assert_eq!(adapter.dropped(), 0);
    }

    #[test]
    fn test_duplicate_and_out_of_order_dropped() {
        let mut adapter = FeedAdapter::new(vec!["EURUSD".to_string()]);
        adapter.ingest(raw("EURUSD", 5)).unwrap();

        let dup = adapter.ingest(raw("EURUSD", 5));
        assert!(matches!(dup, Err(Fault::FeedGap { expected: 6, got: 5, .. })));

        let stale = adapter.ingest(raw("EURUSD", 3));
        assert!(stale.is_err());
        assert_eq!(adapter.dropped(), 2);

        // The stream continues normally afterwards.
        assert!(adapter.ingest(raw("EURUSD", 6)).is_ok());
    }

    #[test]
    fn test_sequences_tracked_per_instrument() {
        let mut adapter =
            FeedAdapter::new(vec!["EURUSD".to_string(), "GBPUSD".to_string()]);
        adapter.ingest(raw("EURUSD", 100)).unwrap();
        // A lower sequence on a different instrument is fine.
        assert!(adapter.ingest(raw("GBPUSD", 1)).is_ok());
    }

    #[test]
    fn test_unknown_instrument_rejected() {
        let mut adapter = FeedAdapter::new(vec!["EURUSD".to_string()]);
        // Not a gap: the rejection carries its own fault shape so gap
        // diagnostics stay clean.
        assert!(matches!(
            adapter.ingest(raw("XAUUSD", 1)),
            Err(Fault::UnknownInstrument { .. })
        ));
        assert_eq!(adapter.rejected_unknown(), 1);
        assert_eq!(adapter.dropped(), 0);
    }
}
