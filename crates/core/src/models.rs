use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Tape / tick data
// ---------------------------------------------------------------------------

/// Which side of the book a tape event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSide {
    Bid,
    Ask,
    Trade,
}

/// An unvalidated tape event as produced by a feed source.
///
/// The feed adapter promotes a `RawTick` to a [`Tick`] after checking the
/// per-instrument sequence; downstream components only ever see `Tick`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTick {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: TickSide,
    pub sequence: u64,
}

/// A validated tape event. Immutable once emitted; `sequence` is strictly
/// increasing per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: TickSide,
    pub sequence: u64,
}

impl Tick {
    /// Whether this event adds to buy-side pressure (bid quotes and
    /// upticking trades) as opposed to sell-side pressure.
    pub fn is_buy_flow(&self, prev_price: Option<Decimal>) -> bool {
        match self.side {
            TickSide::Bid => true,
            TickSide::Ask => false,
            TickSide::Trade => match prev_price {
                Some(prev) => self.price >= prev,
                None => true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Position side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// The kind of tape-reading pattern a signal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Directional flow pushing price through the window range.
    Momentum,
    /// One side of the book absorbing sustained opposing pressure.
    Absorption,
    /// Dominant-side volume drying up while price stalls.
    Exhaustion,
}

/// Volume accumulated at a single price level within the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevelHeat {
    pub price: Decimal,
    pub volume: Decimal,
}

/// A defensive, immutable copy of the order-flow window state at the
/// moment a signal was emitted. Nothing here aliases analyzer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub instrument: String,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    /// Buy volume as a fraction of total volume, in [0, 1].
    pub imbalance_ratio: Decimal,
    pub tick_count: usize,
    /// Ticks elapsed since the imbalance last crossed the 50% line.
    pub ticks_since_flip: usize,
    pub last_price: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// Hottest price levels by traded volume, descending.
    pub heat: Vec<PriceLevelHeat>,
}

/// A trading signal emitted by the tape analyzer.
///
/// Signals carry no random identity: they are keyed by the sequence number
/// of the triggering tick, so identical tick sequences produce identical
/// signals (required for determinism).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub kind: SignalKind,
    pub side: Side,
    /// Detector-specific strength, normalized so 1.0 means "at threshold".
    pub strength: Decimal,
    /// Sequence number of the tick that triggered the signal.
    pub sequence: u64,
    /// Timestamp of the triggering tick, not wall clock.
    pub timestamp: DateTime<Utc>,
    pub window: WindowSnapshot,
}

// ---------------------------------------------------------------------------
// Intents & orders
// ---------------------------------------------------------------------------

/// What a trading intent asks the gateway to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    Enter(Side),
    Exit,
    Flatten,
}

/// A risk-gated instruction produced by the decision core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: Uuid,
    pub instrument: String,
    pub action: IntentAction,
    pub size: Decimal,
    /// Worst acceptable price; `None` means market.
    pub limit_price: Option<Decimal>,
    /// Sequence of the signal that originated this intent, if any.
    /// Control commands (stop / flatten) carry `None`.
    pub signal_seq: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle state of an order as tracked by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Acked,
    Filled,
    Rejected,
    Cancelled,
    /// No terminal response arrived within the bridge timeout. The order
    /// may or may not exist at the terminal; the instrument is blocked
    /// until explicit reconciliation.
    Unknown,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }
}

/// Handle returned by `ExecutionGateway::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
}

impl OrderHandle {
    pub fn from_intent(intent: &Intent, side: Side) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_id: intent.id,
            instrument: intent.instrument.clone(),
            side,
            size: intent.size,
            state: OrderState::Pending,
            created_at: intent.timestamp,
        }
    }
}

/// A confirmed execution reported by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: Uuid,
    pub intent_id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Positions & account
// ---------------------------------------------------------------------------

/// An open position. One authoritative instance per instrument, owned by
/// the state aggregator and mutated only on fill confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Re-mark unrealized PnL against the latest price.
    pub fn mark(&mut self, price: Decimal) {
        let diff = match self.side {
            Side::Buy => price - self.avg_entry_price,
            Side::Sell => self.avg_entry_price - price,
        };
        self.unrealized_pnl = diff * self.size;
    }
}

/// Counters surfaced to the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub ticks_processed: u64,
    pub feed_gaps: u64,
    pub signals_emitted: u64,
    pub intents_accepted: u64,
    pub intents_rejected: u64,
    pub fills: u64,
    pub bridge_timeouts: u64,
}

/// Engine health as exposed to the hosting layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Running,
    /// Bridge disconnected; running against the simulation fallback.
    Degraded,
    /// Risk breach; no new entries accepted.
    Halted,
}

/// A typed fault record. The dashboard only ever sees these, never raw
/// errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    FeedGap {
        instrument: String,
        expected: u64,
        got: u64,
    },
    UnknownInstrument {
        instrument: String,
    },
    RiskBreach {
        instrument: String,
        reason: String,
    },
    ExecutionTimeout {
        instrument: String,
        order_id: Uuid,
    },
    BridgeDisconnected {
        missed_heartbeats: u32,
    },
}

/// Immutable read model of the whole trading state. Rebuilt from scratch
/// by the aggregator on every state-changing event and published by
/// replacing the previous `Arc`, never by in-place mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions: Vec<Position>,
    pub pending_orders: Vec<OrderHandle>,
    pub stats: FlowStats,
    pub diagnostics: Vec<Fault>,
    pub health: HealthState,
    pub timestamp: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn initial(balance: Decimal) -> Self {
        Self {
            balance,
            equity: balance,
            daily_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            positions: Vec::new(),
            pending_orders: Vec::new(),
            stats: FlowStats::default(),
            diagnostics: Vec::new(),
            health: HealthState::Running,
            timestamp: Utc::now(),
        }
    }

    /// Total absolute open exposure for an instrument.
    pub fn exposure(&self, instrument: &str) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.instrument == instrument)
            .map(|p| p.size)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Price book
// ---------------------------------------------------------------------------

/// Last known tick price per instrument, shared between the engine workers
/// (writers) and the simulated gateway (reader).
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    inner: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, instrument: &str, price: Decimal) {
        let mut map = self.inner.write().expect("price book lock poisoned");
        map.insert(instrument.to_string(), price);
    }

    pub fn last_price(&self, instrument: &str) -> Option<Decimal> {
        let map = self.inner.read().expect("price book lock poisoned");
        map.get(instrument).copied()
    }
}
