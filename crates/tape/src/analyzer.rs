use crate::window::OrderFlowWindow;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tapeflow_core::{Side, Signal, SignalKind, TapeConfig, Tick};
use tracing::debug;

/// Per-instrument detector state. Each detector re-arms only after its
/// condition clears, so one sustained run emits exactly one signal.
#[derive(Debug)]
struct DetectorState {
    window: OrderFlowWindow,
    absorption_run: usize,
    absorption_armed: bool,
    momentum_armed: bool,
    exhaustion_armed: bool,
}

impl DetectorState {
    fn new(instrument: &str, horizon: usize) -> Self {
        Self {
            window: OrderFlowWindow::new(instrument, horizon),
            absorption_run: 0,
            absorption_armed: true,
            momentum_armed: true,
            exhaustion_armed: true,
        }
    }
}

/// The tape analysis engine: one rolling window per instrument plus
/// threshold detectors for absorption, momentum, and exhaustion.
///
/// Given an identical tick sequence and configuration the emitted signals
/// are identical; nothing here reads the wall clock or random state.
pub struct TapeAnalyzer {
    config: TapeConfig,
    instruments: HashMap<String, DetectorState>,
}

impl TapeAnalyzer {
    pub fn new(config: TapeConfig) -> Self {
        Self {
            config,
            instruments: HashMap::new(),
        }
    }

    /// Read access to an instrument's window (for diagnostics/tests).
    pub fn window(&self, instrument: &str) -> Option<&OrderFlowWindow> {
        self.instruments.get(instrument).map(|s| &s.window)
    }

    /// Apply one tick and return any signals it triggered.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Signal> {
        let config = self.config.clone();
        let state = self
            .instruments
            .entry(tick.instrument.clone())
            .or_insert_with(|| DetectorState::new(&tick.instrument, config.horizon_ticks));

        state.window.apply(tick);

        let mut signals = Vec::new();
        if let Some(signal) = Self::check_absorption(state, &config, tick) {
            signals.push(signal);
        }
        if let Some(signal) = Self::check_momentum(state, &config, tick) {
            signals.push(signal);
        }
        if let Some(signal) = Self::check_exhaustion(state, &config, tick) {
            signals.push(signal);
        }

        for signal in &signals {
            debug!(
                instrument = %signal.instrument,
                kind = ?signal.kind,
                side = ?signal.side,
                strength = %signal.strength,
                sequence = signal.sequence,
                "signal emitted"
            );
        }
        signals
    }

    fn emit(
        state: &DetectorState,
        config: &TapeConfig,
        tick: &Tick,
        kind: SignalKind,
        side: Side,
        strength: Decimal,
    ) -> Signal {
        Signal {
            instrument: tick.instrument.clone(),
            kind,
            side,
            strength,
            sequence: tick.sequence,
            timestamp: tick.timestamp,
            window: state.window.snapshot(config.heat_levels),
        }
    }

    /// Absorption: the imbalance ratio stays beyond the configured bound
    /// for `sustain_ticks` consecutive ticks. Emits once per run; re-arms
    /// when the ratio returns inside the bounds.
    fn check_absorption(
        state: &mut DetectorState,
        config: &TapeConfig,
        tick: &Tick,
    ) -> Option<Signal> {
        let ratio = state.window.imbalance_ratio();
        let upper = config.imbalance_threshold;
        let lower = Decimal::ONE - config.imbalance_threshold;

        let beyond = if ratio > upper {
            Some(Side::Buy)
        } else if ratio < lower {
            Some(Side::Sell)
        } else {
            None
        };

        match beyond {
            Some(side) => {
                state.absorption_run += 1;
                if state.absorption_armed && state.absorption_run >= config.sustain_ticks {
                    state.absorption_armed = false;
                    let edge = match side {
                        Side::Buy => ratio,
                        Side::Sell => Decimal::ONE - ratio,
                    };
                    // 1.0 exactly at threshold, rising toward saturation.
                    let strength = edge / upper;
                    return Some(Self::emit(
                        state,
                        config,
                        tick,
                        SignalKind::Absorption,
                        side,
                        strength,
                    ));
                }
                None
            }
            None => {
                state.absorption_run = 0;
                state.absorption_armed = true;
                None
            }
        }
    }

    /// Momentum: the net move across the window covers most of the window
    /// range, in the direction of the dominant flow.
    fn check_momentum(
        state: &mut DetectorState,
        config: &TapeConfig,
        tick: &Tick,
    ) -> Option<Signal> {
        if !state.window.is_full() {
            return None;
        }
        let range = state.window.price_range();
        if range.is_zero() {
            return None;
        }
        let net = state.window.net_change();
        let flow_up = state.window.buy_dominant();
        let aligned = (net > Decimal::ZERO && flow_up) || (net < Decimal::ZERO && !flow_up);
        let magnitude = net.abs() / range;

        if aligned && magnitude >= config.momentum_strength {
            if state.momentum_armed {
                state.momentum_armed = false;
                let side = if flow_up { Side::Buy } else { Side::Sell };
                let strength = magnitude / config.momentum_strength;
                return Some(Self::emit(
                    state,
                    config,
                    tick,
                    SignalKind::Momentum,
                    side,
                    strength,
                ));
            }
        } else {
            state.momentum_armed = true;
        }
        None
    }

    /// Exhaustion: dominant-side volume in the recent quarter of the
    /// window dries up relative to the window average while price stalls.
    /// Fades the dominant side.
    fn check_exhaustion(
        state: &mut DetectorState,
        config: &TapeConfig,
        tick: &Tick,
    ) -> Option<Signal> {
        if !state.window.is_full() {
            return None;
        }
        let window_dominant = state.window.dominant_volume();
        if window_dominant.is_zero() {
            return None;
        }
        let window_len = Decimal::from(state.window.len());
        let recent_len = Decimal::from(state.window.recent_len().max(1));
        let window_rate = window_dominant / window_len;
        let recent_rate = state.window.recent_dominant_volume() / recent_len;
        if window_rate.is_zero() {
            return None;
        }
        let decay = recent_rate / window_rate;

        // Price stall: the quarter's move, scaled to the full window, would
        // not qualify as momentum.
        let range = state.window.price_range();
        let stalled = range.is_zero()
            || (state.window.recent_net_change().abs() * Decimal::from(4u8)) / range
                < config.momentum_strength;

        if decay < config.exhaustion_volume_decay && stalled {
            if state.exhaustion_armed {
                state.exhaustion_armed = false;
                let side = if state.window.buy_dominant() {
                    Side::Sell
                } else {
                    Side::Buy
                };
                let strength = if decay.is_zero() {
                    Decimal::from(3u8)
                } else {
                    // Capped so a near-zero decay cannot blow up the score.
                    (config.exhaustion_volume_decay / decay).min(Decimal::from(3u8))
                };
                return Some(Self::emit(
                    state,
                    config,
                    tick,
                    SignalKind::Exhaustion,
                    side,
                    strength,
                ));
            }
        } else {
            state.exhaustion_armed = true;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tapeflow_core::TickSide;

    fn tick(seq: u64, price: Decimal, volume: Decimal, side: TickSide) -> Tick {
        Tick {
            instrument: "EURUSD".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap(),
            price,
            volume,
            side,
            sequence: seq,
        }
    }

    fn small_config() -> TapeConfig {
        TapeConfig {
            horizon_ticks: 40,
            imbalance_threshold: dec!(0.8),
            sustain_ticks: 20,
            momentum_strength: dec!(0.6),
            exhaustion_volume_decay: dec!(0.35),
            heat_levels: 3,
        }
    }

    // A sustained buy-imbalance ratio above 0.8 for 20 consecutive ticks
    // must emit exactly one absorption signal.
    #[test]
    fn test_sustained_buy_imbalance_emits_one_absorption() {
        let mut analyzer = TapeAnalyzer::new(small_config());
        let mut absorption = Vec::new();
        for seq in 1..=60u64 {
            let signals = analyzer.on_tick(&tick(seq, dec!(1.1000), dec!(10), TickSide::Bid));
            absorption.extend(
                signals
                    .into_iter()
                    .filter(|s| s.kind == SignalKind::Absorption),
            );
        }
        assert_eq!(absorption.len(), 1);
        let signal = &absorption[0];
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.sequence, 20);
        assert!(signal.strength >= Decimal::ONE);
        assert!(signal.window.imbalance_ratio > dec!(0.8));
    }

    #[test]
    fn test_absorption_rearms_after_ratio_recovers() {
        let mut analyzer = TapeAnalyzer::new(small_config());
        let mut count = 0;
        let mut seq = 0u64;
        let mut step = |analyzer: &mut TapeAnalyzer, side, n: usize, count: &mut i32| {
            for _ in 0..n {
                seq += 1;
                *count += analyzer
                    .on_tick(&tick(seq, dec!(1.1), dec!(10), side))
                    .iter()
                    .filter(|s| s.kind == SignalKind::Absorption)
                    .count() as i32;
            }
        };
        step(&mut analyzer, TickSide::Bid, 25, &mut count);
        assert_eq!(count, 1);
        // Balance the window back toward 50/50, then push again.
        step(&mut analyzer, TickSide::Ask, 30, &mut count);
        step(&mut analyzer, TickSide::Bid, 40, &mut count);
        assert!(count >= 2, "detector should re-arm after the ratio recovers");
    }

    #[test]
    fn test_sell_imbalance_emits_sell_absorption() {
        let mut analyzer = TapeAnalyzer::new(small_config());
        let mut signals = Vec::new();
        for seq in 1..=30u64 {
            signals.extend(analyzer.on_tick(&tick(seq, dec!(1.1), dec!(10), TickSide::Ask)));
        }
        let absorption: Vec<_> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::Absorption)
            .collect();
        assert_eq!(absorption.len(), 1);
        assert_eq!(absorption[0].side, Side::Sell);
    }

    #[test]
    fn test_momentum_fires_on_directional_run() {
        let config = TapeConfig {
            horizon_ticks: 10,
            sustain_ticks: 50, // keep absorption quiet
            ..small_config()
        };
        let mut analyzer = TapeAnalyzer::new(config);
        let mut signals = Vec::new();
        for seq in 1..=12u64 {
            let price = dec!(1.1000) + Decimal::new(seq as i64, 4);
            signals.extend(analyzer.on_tick(&tick(seq, price, dec!(5), TickSide::Bid)));
        }
        let momentum: Vec<_> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::Momentum)
            .collect();
        assert!(!momentum.is_empty());
        assert_eq!(momentum[0].side, Side::Buy);
        // One emission per run: no duplicates while the move persists.
        assert_eq!(momentum.len(), 1);
    }

    #[test]
    fn test_exhaustion_fires_when_dominant_volume_decays() {
        let config = TapeConfig {
            horizon_ticks: 20,
            sustain_ticks: 100,
            momentum_strength: dec!(0.9),
            ..small_config()
        };
        let mut analyzer = TapeAnalyzer::new(config);
        let mut signals = Vec::new();
        // Heavy buy volume to fill most of the window...
        for seq in 1..=15u64 {
            signals.extend(analyzer.on_tick(&tick(seq, dec!(1.1000), dec!(20), TickSide::Bid)));
        }
        // ...then the buying dries up while price goes nowhere.
        for seq in 16..=25u64 {
            signals.extend(analyzer.on_tick(&tick(
                seq,
                dec!(1.1000),
                dec!(0.5),
                TickSide::Bid,
            )));
        }
        let exhaustion: Vec<_> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::Exhaustion)
            .collect();
        assert!(!exhaustion.is_empty());
        // Buyer exhaustion fades the buyers.
        assert_eq!(exhaustion[0].side, Side::Sell);
    }

    /// Determinism: identical tick sequences and config produce identical
    /// signals, field for field.
    #[test]
    fn test_analyzer_is_deterministic() {
        let ticks: Vec<Tick> = (1..=200u64)
            .map(|seq| {
                let side = match seq % 3 {
                    0 => TickSide::Ask,
                    1 => TickSide::Bid,
                    _ => TickSide::Trade,
                };
                let price = dec!(1.1000) + Decimal::new((seq % 7) as i64, 4);
                tick(seq, price, Decimal::from(1 + seq % 5), side)
            })
            .collect();

        let run = || {
            let mut analyzer = TapeAnalyzer::new(small_config());
            ticks
                .iter()
                .flat_map(|t| analyzer.on_tick(t))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
