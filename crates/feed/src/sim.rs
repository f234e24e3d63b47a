use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tapeflow_core::{FeedError, FeedSource, RawTick, TickSide};

/// Deterministic synthetic tape generator.
///
/// A seeded random walk per instrument with occasional one-sided bursts so
/// the detectors have something to find. The same seed always replays the
/// same tape, which is what makes simulation-mode runs reproducible.
pub struct SimulatedFeed {
    rng: StdRng,
    instruments: Vec<InstrumentState>,
    /// Round-robin cursor across instruments.
    cursor: usize,
    base_time: DateTime<Utc>,
    elapsed_ms: i64,
    /// Inter-tick delay; zero in tests for a full-speed tape.
    tick_interval_ms: u64,
}

struct InstrumentState {
    name: String,
    price: Decimal,
    sequence: u64,
    /// Remaining ticks of a directional burst, with its bias side.
    burst: Option<(u32, TickSide)>,
}

impl SimulatedFeed {
    pub fn new(instruments: &[String], seed: u64) -> Self {
        Self::with_tick_interval(instruments, seed, 5)
    }

    pub fn with_tick_interval(instruments: &[String], seed: u64, tick_interval_ms: u64) -> Self {
        let states = instruments
            .iter()
            .map(|name| InstrumentState {
                name: name.clone(),
                price: Decimal::new(11_000, 4), // 1.1000
                sequence: 0,
                burst: None,
            })
            .collect();
        Self {
            rng: StdRng::seed_from_u64(seed),
            instruments: states,
            cursor: 0,
            base_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            elapsed_ms: 0,
            tick_interval_ms,
        }
    }

    fn generate(&mut self) -> RawTick {
        let idx = self.cursor;
        self.cursor = (idx + 1) % self.instruments.len();
        let state = &mut self.instruments[idx];

        // Start or continue a burst: bursts skew the flow hard to one side
        // so sustained imbalances actually occur.
        if state.burst.is_none() && self.rng.gen_ratio(1, 200) {
            let side = if self.rng.gen_bool(0.5) {
                TickSide::Bid
            } else {
                TickSide::Ask
            };
            let len = self.rng.gen_range(30..80);
            state.burst = Some((len, side));
        }

        let side = match &mut state.burst {
            Some((remaining, side)) => {
                let side = *side;
                *remaining -= 1;
                if *remaining == 0 {
                    state.burst = None;
                }
                // Bursts still leak a few opposing prints.
                if self.rng.gen_ratio(1, 10) {
                    match side {
                        TickSide::Bid => TickSide::Ask,
                        _ => TickSide::Bid,
                    }
                } else {
                    side
                }
            }
            None => match self.rng.gen_range(0..3u8) {
                0 => TickSide::Bid,
                1 => TickSide::Ask,
                _ => TickSide::Trade,
            },
        };

        // Random walk in tenths of a pip, drifting with the flow.
        let step = self.rng.gen_range(-5i64..=5);
        let bias = match side {
            TickSide::Bid => 1,
            TickSide::Ask => -1,
            TickSide::Trade => 0,
        };
        state.price += Decimal::new(step + bias, 5);
        if state.price <= Decimal::ZERO {
            state.price = Decimal::new(1, 4);
        }

        let volume = Decimal::from(self.rng.gen_range(1u32..=20));
        state.sequence += 1;
        self.elapsed_ms += 1;

        RawTick {
            instrument: state.name.clone(),
            timestamp: self.base_time + ChronoDuration::milliseconds(self.elapsed_ms),
            price: state.price,
            volume,
            side,
            sequence: state.sequence,
        }
    }
}

#[async_trait]
impl FeedSource for SimulatedFeed {
    async fn next_tick(&mut self) -> Result<RawTick, FeedError> {
        if self.instruments.is_empty() {
            return Err(FeedError::Closed);
        }
        if self.tick_interval_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.tick_interval_ms)).await;
        }
        Ok(self.generate())
    }
}
