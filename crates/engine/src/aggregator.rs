use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tapeflow_core::{
    AccountSnapshot, AggregatorEvent, Fault, FillReport, FlowStats, HealthState, OrderHandle,
    OrderState, Position, Side,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Diagnostics kept in the snapshot; older faults roll off.
const MAX_DIAGNOSTICS: usize = 64;

/// Sole owner of positions and account state.
///
/// Consumes events from workers and the bridge monitor, rebuilds the
/// snapshot, and publishes it as a fresh `Arc` on the watch channel.
/// Readers never lock: they clone the latest `Arc` and drop it when done.
pub struct StateAggregator {
    balance: Decimal,
    realized_pnl: Decimal,
    daily_pnl: Decimal,
    /// Trading day the daily loss counter belongs to.
    current_day: NaiveDate,
    positions: HashMap<String, Position>,
    pending_orders: Vec<OrderHandle>,
    stats: FlowStats,
    diagnostics: Vec<Fault>,
    health: HealthState,
    snapshot_tx: watch::Sender<Arc<AccountSnapshot>>,
}

impl StateAggregator {
    /// Spawn the aggregator task. Returns the event sender and the
    /// snapshot watch receiver.
    pub fn spawn(
        initial_balance: Decimal,
    ) -> (
        mpsc::Sender<AggregatorEvent>,
        watch::Receiver<Arc<AccountSnapshot>>,
    ) {
        let (event_tx, mut event_rx) = mpsc::channel::<AggregatorEvent>(1024);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(AccountSnapshot::initial(initial_balance)));

        let mut aggregator = Self::new(initial_balance, snapshot_tx);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                aggregator.handle(event);
                aggregator.publish();
            }
        });

        (event_tx, snapshot_rx)
    }

    fn new(initial_balance: Decimal, snapshot_tx: watch::Sender<Arc<AccountSnapshot>>) -> Self {
        Self {
            balance: initial_balance,
            realized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            current_day: Utc::now().date_naive(),
            positions: HashMap::new(),
            pending_orders: Vec::new(),
            stats: FlowStats::default(),
            diagnostics: Vec::new(),
            health: HealthState::Running,
            snapshot_tx,
        }
    }

    fn handle(&mut self, event: AggregatorEvent) {
        let today = Utc::now().date_naive();
        if today != self.current_day {
            self.roll_day(today);
        }
        match event {
            AggregatorEvent::Fill(fill) => {
                self.stats.fills += 1;
                self.apply_fill(&fill);
            }
            AggregatorEvent::Mark {
                instrument, price, ..
            } => {
                if let Some(position) = self.positions.get_mut(&instrument) {
                    position.mark(price);
                }
            }
            AggregatorEvent::Fault(fault) => {
                match &fault {
                    Fault::FeedGap { .. } => self.stats.feed_gaps += 1,
                    Fault::ExecutionTimeout { .. } => self.stats.bridge_timeouts += 1,
                    Fault::UnknownInstrument { .. }
                    | Fault::RiskBreach { .. }
                    | Fault::BridgeDisconnected { .. } => {}
                }
                self.push_fault(fault);
            }
            AggregatorEvent::SignalEmitted => self.stats.signals_emitted += 1,
            AggregatorEvent::IntentAccepted => self.stats.intents_accepted += 1,
            AggregatorEvent::IntentRejected => self.stats.intents_rejected += 1,
            AggregatorEvent::TicksProcessed(n) => self.stats.ticks_processed += n,
            AggregatorEvent::OrderPending(handle) => self.pending_orders.push(handle),
            AggregatorEvent::OrderResolved { order_id, state } => {
                if state.is_terminal() || state == OrderState::Unknown {
                    self.pending_orders.retain(|o| o.id != order_id);
                } else if let Some(order) =
                    self.pending_orders.iter_mut().find(|o| o.id == order_id)
                {
                    order.state = state;
                }
            }
            AggregatorEvent::Health(health) => {
                // A halt is sticky: bridge recovery never clears it.
                if self.health == HealthState::Halted && health != HealthState::Halted {
                    return;
                }
                if self.health != health {
                    info!(from = ?self.health, to = ?health, "health transition");
                    self.health = health;
                }
            }
            AggregatorEvent::Resync {
                positions,
                pending_orders,
            } => {
                info!(
                    positions = positions.len(),
                    pending = pending_orders.len(),
                    "replacing local state with terminal resync"
                );
                self.positions = positions
                    .into_iter()
                    .map(|p| (p.instrument.clone(), p))
                    .collect();
                self.pending_orders = pending_orders;
            }
        }
    }

    /// New trading day: the loss counter starts over and a risk halt from
    /// the previous day is lifted. Realized PnL and balance carry over.
    fn roll_day(&mut self, today: NaiveDate) {
        info!(day = %today, "daily rollover, loss counter reset");
        self.current_day = today;
        self.daily_pnl = Decimal::ZERO;
        if self.health == HealthState::Halted {
            self.health = HealthState::Running;
        }
    }

    /// Fold a confirmed fill into the position book. An opposing fill
    /// closes (or partially closes) first; any excess opens a fresh
    /// position on the fill's side.
    fn apply_fill(&mut self, fill: &FillReport) {
        match self.positions.get_mut(&fill.instrument) {
            Some(position) if position.side != fill.side => {
                let close_size = fill.size.min(position.size);
                let remaining = fill.size - close_size;

                let per_unit = match position.side {
                    Side::Buy => fill.price - position.avg_entry_price,
                    Side::Sell => position.avg_entry_price - fill.price,
                };
                let pnl = per_unit * close_size;
                self.balance += pnl;
                self.realized_pnl += pnl;
                self.daily_pnl += pnl;

                if close_size >= position.size {
                    self.positions.remove(&fill.instrument);
                } else {
                    position.size -= close_size;
                    position.mark(fill.price);
                }

                if remaining > Decimal::ZERO {
                    self.positions
                        .insert(fill.instrument.clone(), Self::open(fill, remaining));
                }
            }
            Some(position) => {
                let total_cost =
                    position.avg_entry_price * position.size + fill.price * fill.size;
                position.size += fill.size;
                position.avg_entry_price = total_cost / position.size;
                position.mark(fill.price);
            }
            None => {
                self.positions
                    .insert(fill.instrument.clone(), Self::open(fill, fill.size));
            }
        }
    }

    fn open(fill: &FillReport, size: Decimal) -> Position {
        Position {
            instrument: fill.instrument.clone(),
            side: fill.side,
            size,
            avg_entry_price: fill.price,
            unrealized_pnl: Decimal::ZERO,
            opened_at: fill.timestamp,
        }
    }

    fn push_fault(&mut self, fault: Fault) {
        warn!(?fault, "fault recorded");
        self.diagnostics.push(fault);
        if self.diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = self.diagnostics.len() - MAX_DIAGNOSTICS;
            self.diagnostics.drain(..excess);
        }
    }

    fn publish(&self) {
        let unrealized: Decimal = self.positions.values().map(|p| p.unrealized_pnl).sum();
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        let snapshot = AccountSnapshot {
            balance: self.balance,
            equity: self.balance + unrealized,
            daily_pnl: self.daily_pnl + unrealized,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: unrealized,
            positions,
            pending_orders: self.pending_orders.clone(),
            stats: self.stats.clone(),
            diagnostics: self.diagnostics.clone(),
            health: self.health,
            timestamp: Utc::now(),
        };
        // Receivers may all be gone during shutdown.
        let _ = self.snapshot_tx.send(Arc::new(snapshot));
    }
}
