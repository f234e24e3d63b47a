use crate::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution confirmations delivered asynchronously by a gateway to the
/// worker that submitted the intent. The tick-processing path never blocks
/// waiting for these; they arrive on the worker's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Acked(OrderHandle),
    Filled(FillReport),
    Rejected { handle: OrderHandle, reason: String },
    Cancelled(OrderHandle),
    /// No terminal response within the bridge timeout; order state is
    /// `Unknown` and the instrument requires reconciliation.
    TimedOut(OrderHandle),
}

/// Dashboard-originated control commands. They are converted into intents
/// and routed through the decision core's risk gate like any other intent;
/// the dashboard has no direct write path to trading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    FlattenAll,
}

/// Events consumed by the state aggregator, the sole owner of positions
/// and account state.
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    Fill(FillReport),
    /// Latest price for an instrument; re-marks unrealized PnL.
    Mark {
        instrument: String,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    Fault(Fault),
    SignalEmitted,
    IntentAccepted,
    IntentRejected,
    TicksProcessed(u64),
    OrderPending(OrderHandle),
    OrderResolved {
        order_id: Uuid,
        state: OrderState,
    },
    Health(HealthState),
    /// Authoritative terminal state after a reconnect; replaces the
    /// locally tracked positions and working orders wholesale.
    Resync {
        positions: Vec<Position>,
        pending_orders: Vec<OrderHandle>,
    },
}
