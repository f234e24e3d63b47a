use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether the engine trades against the simulator or the remote terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simulation,
    Live,
}

/// Tape-analysis parameters. All detectors are threshold-driven from here;
/// nothing is hard-coded in the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// Rolling window length in ticks.
    pub horizon_ticks: usize,
    /// Absorption fires when buy (or sell) volume exceeds this fraction of
    /// total window volume, in (0.5, 1.0).
    pub imbalance_threshold: Decimal,
    /// Consecutive ticks the imbalance must hold before absorption fires.
    pub sustain_ticks: usize,
    /// Momentum fires when the directional move exceeds this fraction of
    /// the window price range.
    pub momentum_strength: Decimal,
    /// Exhaustion fires when recent dominant-side volume falls below this
    /// fraction of its window average.
    pub exhaustion_volume_decay: Decimal,
    /// Number of hottest price levels kept in window snapshots.
    pub heat_levels: usize,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            horizon_ticks: 1000,
            imbalance_threshold: Decimal::new(8, 1), // 0.8
            sustain_ticks: 20,
            momentum_strength: Decimal::new(6, 1),        // 0.6
            exhaustion_volume_decay: Decimal::new(35, 2), // 0.35
            heat_levels: 5,
        }
    }
}

/// Risk-gate parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum total open size per instrument.
    pub max_position_size: Decimal,
    /// Absolute currency loss for the day that halts trading.
    pub max_daily_loss: Decimal,
    /// Fraction of equity risked per entry, used for sizing.
    pub risk_per_trade: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::new(5, 0),
            max_daily_loss: Decimal::new(1000, 0),
            risk_per_trade: Decimal::new(1, 2), // 1%
        }
    }
}

/// Remote proxy bridge parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Terminal proxy address, e.g. "10.0.0.5:5556". Required in live mode.
    pub addr: Option<String>,
    pub heartbeat_interval_ms: u64,
    /// Consecutive missed heartbeats before the bridge is considered down.
    pub heartbeat_miss_limit: u32,
    /// Timeout for correlated request/response pairs.
    pub timeout_ms: u64,
    /// When the bridge is down, run feed and gateway against the simulator
    /// instead of stalling.
    pub fallback_to_simulation: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: None,
            heartbeat_interval_ms: 5_000,
            heartbeat_miss_limit: 3,
            timeout_ms: 5_000,
            fallback_to_simulation: true,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

/// Full engine configuration, loaded from TOML and validated at startup.
/// Validation failure is the only fatal configuration path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: Mode,
    pub instruments: Vec<String>,
    pub initial_balance: Decimal,
    /// Slippage applied by the simulated gateway, in price units.
    pub slippage: Decimal,
    /// Seed for the simulation feed; identical seeds replay identical tape.
    pub sim_seed: u64,
    pub api_bind: String,
    pub tape: TapeConfig,
    pub risk: RiskConfig,
    pub bridge: BridgeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Simulation,
            instruments: vec!["EURUSD".to_string()],
            initial_balance: Decimal::new(10_000, 0),
            slippage: Decimal::new(1, 4), // 0.0001
            sim_seed: 42,
            api_bind: "127.0.0.1:8080".to_string(),
            tape: TapeConfig::default(),
            risk: RiskConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.instruments.is_empty() {
            return invalid("at least one instrument is required");
        }
        if self.tape.horizon_ticks == 0 {
            return invalid("tape.horizon_ticks must be > 0");
        }
        if self.tape.sustain_ticks == 0 {
            return invalid("tape.sustain_ticks must be > 0");
        }
        let half = Decimal::new(5, 1);
        if self.tape.imbalance_threshold <= half || self.tape.imbalance_threshold >= Decimal::ONE {
            return invalid("tape.imbalance_threshold must be in (0.5, 1.0)");
        }
        if self.tape.momentum_strength <= Decimal::ZERO {
            return invalid("tape.momentum_strength must be > 0");
        }
        if self.tape.exhaustion_volume_decay <= Decimal::ZERO
            || self.tape.exhaustion_volume_decay >= Decimal::ONE
        {
            return invalid("tape.exhaustion_volume_decay must be in (0, 1)");
        }
        if self.risk.max_position_size <= Decimal::ZERO {
            return invalid("risk.max_position_size must be > 0");
        }
        if self.risk.max_daily_loss <= Decimal::ZERO {
            return invalid("risk.max_daily_loss must be > 0");
        }
        if self.risk.risk_per_trade <= Decimal::ZERO || self.risk.risk_per_trade >= Decimal::ONE {
            return invalid("risk.risk_per_trade must be in (0, 1)");
        }
        if self.initial_balance <= Decimal::ZERO {
            return invalid("initial_balance must be > 0");
        }
        if self.bridge.heartbeat_interval_ms == 0 || self.bridge.timeout_ms == 0 {
            return invalid("bridge intervals must be > 0");
        }
        if self.bridge.heartbeat_miss_limit == 0 {
            return invalid("bridge.heartbeat_miss_limit must be > 0");
        }
        if self.mode == Mode::Live && self.bridge.addr.is_none() {
            return invalid("bridge.addr is required in live mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_live_mode_requires_bridge_addr() {
        let config = EngineConfig {
            mode: Mode::Live,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            mode: Mode::Live,
            bridge: BridgeConfig {
                addr: Some("127.0.0.1:5556".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_imbalance_threshold_bounds() {
        for bad in [dec!(0.5), dec!(1.0), dec!(0.2)] {
            let config = EngineConfig {
                tape: TapeConfig {
                    imbalance_threshold: bad,
                    ..Default::default()
                },
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            mode = "simulation"
            instruments = ["GBPUSD"]

            [tape]
            horizon_ticks = 200
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.instruments, vec!["GBPUSD".to_string()]);
        assert_eq!(config.tape.horizon_ticks, 200);
        assert_eq!(config.tape.sustain_ticks, TapeConfig::default().sustain_ticks);
        config.validate().unwrap();
    }
}
