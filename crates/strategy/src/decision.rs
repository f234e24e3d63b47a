use crate::risk::{RiskDecision, RiskGate};
use crate::state_machine::{TradeInput, TradeMachine, TradeState};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tapeflow_core::{
    AccountSnapshot, ControlCommand, ExecutionEvent, Fault, Intent, IntentAction, OrderState,
    RiskConfig, Side, Signal, SignalKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the decision core wants done with one signal or control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Submit this intent to the gateway on the given side.
    Submit { intent: Intent, side: Side },
    /// The risk gate refused; surface the fault, never retry.
    Rejected(Fault),
    /// Nothing to do (wrong state, inactive, same-side signal).
    Ignored,
}

#[derive(Default)]
struct InstrumentBook {
    machine: TradeMachine,
    /// Side of the open (or pending-entry) position.
    position_side: Option<Side>,
}

/// Per-instrument trading decisions: signals in, risk-gated intents out.
///
/// Execution confirmations are the only thing that moves a machine out of
/// a pending state. A timed-out order freezes its instrument until
/// [`reconcile`] delivers the authoritative outcome.
///
/// [`reconcile`]: DecisionCore::reconcile
pub struct DecisionCore {
    risk: RiskGate,
    active: bool,
    books: HashMap<String, InstrumentBook>,
}

impl DecisionCore {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            risk: RiskGate::new(config),
            active: true,
            books: HashMap::new(),
        }
    }

    pub fn state(&self, instrument: &str) -> TradeState {
        self.books
            .get(instrument)
            .map(|b| b.machine.state())
            .unwrap_or(TradeState::Flat)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_halted(&self) -> bool {
        self.risk.should_halt()
    }

    /// Instruments currently blocked on a timed-out order.
    pub fn reconciling_instruments(&self) -> Vec<String> {
        self.books
            .iter()
            .filter(|(_, b)| b.machine.reconciling())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The order id awaiting confirmation for an instrument, if any.
    pub fn pending_order(&self, instrument: &str) -> Option<Uuid> {
        self.books
            .get(instrument)
            .and_then(|b| b.machine.pending_order())
    }

    /// Record the gateway-assigned order id for an instrument's in-flight
    /// intent. Reconciliation matches resync pending orders against this
    /// id, so it must be the one the terminal was given.
    pub fn order_routed(&mut self, instrument: &str, order_id: Uuid) {
        if let Some(book) = self.books.get_mut(instrument) {
            book.machine.order_routed(order_id);
        }
    }

    /// Refresh risk counters from the latest published snapshot.
    pub fn update_account(&mut self, snapshot: &AccountSnapshot) {
        self.risk.update_account(snapshot);
    }

    /// Decide on a tape signal against the current account state.
    pub fn on_signal(&mut self, signal: &Signal, snapshot: &AccountSnapshot) -> Verdict {
        if !self.active {
            return Verdict::Ignored;
        }

        let book = self.books.entry(signal.instrument.clone()).or_default();
        if book.machine.reconciling() {
            return Verdict::Rejected(Fault::RiskBreach {
                instrument: signal.instrument.clone(),
                reason: "awaiting order reconciliation".to_string(),
            });
        }

        match book.machine.state() {
            TradeState::Flat => Self::try_entry(&self.risk, book, signal, snapshot),
            TradeState::InPosition => Self::try_exit(book, signal, snapshot),
            // An order is already in flight for this instrument.
            TradeState::PendingEntry | TradeState::PendingExit => Verdict::Ignored,
        }
    }

    fn try_entry(
        risk: &RiskGate,
        book: &mut InstrumentBook,
        signal: &Signal,
        snapshot: &AccountSnapshot,
    ) -> Verdict {
        let price = signal.window.last_price;
        let exposure = snapshot.exposure(&signal.instrument);
        let size = risk.entry_size(snapshot.equity, price, exposure);

        let intent = Intent {
            id: Uuid::new_v4(),
            instrument: signal.instrument.clone(),
            action: IntentAction::Enter(signal.side),
            size,
            limit_price: None,
            signal_seq: Some(signal.sequence),
            timestamp: signal.timestamp,
        };

        match risk.evaluate(&intent, snapshot) {
            RiskDecision::Approved => {
                // The worker always submits an approved intent, so the
                // transition happens here, not on the gateway ack.
                if let Err(e) = book
                    .machine
                    .order_submitted(TradeInput::EntrySubmitted, intent.id)
                {
                    warn!(error = %e, instrument = %signal.instrument, "entry transition failed");
                    return Verdict::Ignored;
                }
                book.position_side = Some(signal.side);
                info!(
                    instrument = %signal.instrument,
                    kind = ?signal.kind,
                    side = ?signal.side,
                    size = %size,
                    "entry intent approved"
                );
                Verdict::Submit {
                    intent,
                    side: signal.side,
                }
            }
            RiskDecision::Rejected(reason) => {
                warn!(instrument = %signal.instrument, %reason, "entry intent rejected");
                Verdict::Rejected(Fault::RiskBreach {
                    instrument: signal.instrument.clone(),
                    reason,
                })
            }
        }
    }

    fn try_exit(book: &mut InstrumentBook, signal: &Signal, snapshot: &AccountSnapshot) -> Verdict {
        let Some(position_side) = book.position_side else {
            return Verdict::Ignored;
        };
        // Only a signal against the open position closes it. Exhaustion of
        // the position's own flow counts as against it.
        let against = signal.side == position_side.opposite()
            || (signal.kind == SignalKind::Exhaustion && signal.side != position_side);
        if !against {
            return Verdict::Ignored;
        }

        let size = snapshot.exposure(&signal.instrument);
        if size <= Decimal::ZERO {
            return Verdict::Ignored;
        }

        let intent = Intent {
            id: Uuid::new_v4(),
            instrument: signal.instrument.clone(),
            action: IntentAction::Exit,
            size,
            limit_price: None,
            signal_seq: Some(signal.sequence),
            timestamp: signal.timestamp,
        };

        if let Err(e) = book
            .machine
            .order_submitted(TradeInput::ExitSubmitted, intent.id)
        {
            warn!(error = %e, instrument = %signal.instrument, "exit transition failed");
            return Verdict::Ignored;
        }
        info!(
            instrument = %signal.instrument,
            kind = ?signal.kind,
            size = %size,
            "exit intent approved"
        );
        Verdict::Submit {
            intent,
            side: position_side.opposite(),
        }
    }

    /// Apply an execution confirmation. Returns a fault for timeouts.
    pub fn on_execution(&mut self, event: &ExecutionEvent) -> Option<Fault> {
        match event {
            ExecutionEvent::Acked(_) => None,
            ExecutionEvent::Filled(fill) => {
                self.resolve(&fill.instrument, TradeInput::Filled);
                None
            }
            ExecutionEvent::Rejected { handle, reason } => {
                debug!(instrument = %handle.instrument, %reason, "order rejected");
                self.resolve(&handle.instrument, TradeInput::Rejected);
                None
            }
            ExecutionEvent::Cancelled(handle) => {
                self.resolve(&handle.instrument, TradeInput::Cancelled);
                None
            }
            ExecutionEvent::TimedOut(handle) => {
                if let Some(book) = self.books.get_mut(&handle.instrument) {
                    book.machine.mark_unknown();
                }
                warn!(
                    instrument = %handle.instrument,
                    order_id = %handle.id,
                    "order timed out, instrument blocked pending reconciliation"
                );
                Some(Fault::ExecutionTimeout {
                    instrument: handle.instrument.clone(),
                    order_id: handle.id,
                })
            }
        }
    }

    fn resolve(&mut self, instrument: &str, input: TradeInput) {
        let Some(book) = self.books.get_mut(instrument) else {
            warn!(%instrument, "confirmation for unknown instrument");
            return;
        };
        match book.machine.apply(input) {
            Ok(TradeState::Flat) => book.position_side = None,
            Ok(_) => {}
            Err(e) => warn!(%instrument, error = %e, "dropped stale confirmation"),
        }
    }

    /// Clear a reconciliation block with the authoritative order state
    /// reported by the terminal.
    pub fn reconcile(&mut self, instrument: &str, resolved: OrderState) {
        let Some(book) = self.books.get_mut(instrument) else {
            return;
        };
        if !book.machine.reconciling() {
            return;
        }
        let input = match resolved {
            OrderState::Filled => TradeInput::Filled,
            OrderState::Rejected => TradeInput::Rejected,
            OrderState::Cancelled => TradeInput::Cancelled,
            other => {
                warn!(%instrument, state = ?other, "reconciliation needs a terminal order state");
                return;
            }
        };
        match book.machine.reconcile(input) {
            Ok(next) => {
                info!(%instrument, state = ?next, "instrument reconciled");
                if next == TradeState::Flat {
                    book.position_side = None;
                }
            }
            Err(e) => warn!(%instrument, error = %e, "reconciliation resolution invalid"),
        }
    }

    /// Route a dashboard control command through the same gate as signals.
    pub fn on_control(&mut self, command: ControlCommand, snapshot: &AccountSnapshot) -> Vec<Verdict> {
        match command {
            ControlCommand::Start => {
                self.active = true;
                info!("trading started");
                Vec::new()
            }
            ControlCommand::Stop => {
                self.active = false;
                info!("trading stopped");
                Vec::new()
            }
            ControlCommand::FlattenAll => snapshot
                .positions
                .iter()
                .filter_map(|position| self.flatten_one(position.instrument.clone(), position.side, position.size, snapshot))
                .collect(),
        }
    }

    fn flatten_one(
        &mut self,
        instrument: String,
        side: Side,
        size: Decimal,
        snapshot: &AccountSnapshot,
    ) -> Option<Verdict> {
        let book = self.books.entry(instrument.clone()).or_default();
        if book.machine.reconciling() || book.machine.state() != TradeState::InPosition {
            return None;
        }

        let intent = Intent {
            id: Uuid::new_v4(),
            instrument,
            action: IntentAction::Flatten,
            size,
            limit_price: None,
            signal_seq: None,
            timestamp: Utc::now(),
        };
        if !matches!(self.risk.evaluate(&intent, snapshot), RiskDecision::Approved) {
            return None;
        }
        book.machine
            .order_submitted(TradeInput::ExitSubmitted, intent.id)
            .ok()?;
        Some(Verdict::Submit {
            intent,
            side: side.opposite(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tapeflow_core::{FillReport, OrderHandle, Position, PriceLevelHeat, WindowSnapshot};

    fn signal(kind: SignalKind, side: Side) -> Signal {
        Signal {
            instrument: "EURUSD".to_string(),
            kind,
            side,
            strength: dec!(1.2),
            sequence: 20,
            timestamp: Utc::now(),
            window: WindowSnapshot {
                instrument: "EURUSD".to_string(),
                buy_volume: dec!(90),
                sell_volume: dec!(10),
                imbalance_ratio: dec!(0.9),
                tick_count: 100,
                ticks_since_flip: 40,
                last_price: dec!(1.1000),
                high: dec!(1.1010),
                low: dec!(1.0990),
                heat: vec![PriceLevelHeat {
                    price: dec!(1.1000),
                    volume: dec!(30),
                }],
            },
        }
    }

    fn core() -> DecisionCore {
        DecisionCore::new(RiskConfig {
            max_position_size: dec!(5),
            max_daily_loss: dec!(1000),
            risk_per_trade: dec!(0.0001),
        })
    }

    fn fill_for(intent: &Intent, side: Side) -> ExecutionEvent {
        ExecutionEvent::Filled(FillReport {
            order_id: Uuid::new_v4(),
            intent_id: intent.id,
            instrument: intent.instrument.clone(),
            side,
            size: intent.size,
            price: dec!(1.1001),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_absorption_signal_enters_from_flat() {
        let mut core = core();
        let snapshot = AccountSnapshot::initial(dec!(10000));

        let verdict = core.on_signal(&signal(SignalKind::Absorption, Side::Buy), &snapshot);
        let Verdict::Submit { intent, side } = verdict else {
            panic!("expected submit, got {verdict:?}");
        };
        assert_eq!(side, Side::Buy);
        assert_eq!(intent.signal_seq, Some(20));
        assert!(intent.size > Decimal::ZERO);
        assert_eq!(core.state("EURUSD"), TradeState::PendingEntry);

        // A second signal while pending is ignored.
        assert_eq!(
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot),
            Verdict::Ignored
        );

        core.on_execution(&fill_for(&intent, Side::Buy));
        assert_eq!(core.state("EURUSD"), TradeState::InPosition);
    }

    #[test]
    fn test_opposing_signal_exits_position() {
        let mut core = core();
        let mut snapshot = AccountSnapshot::initial(dec!(10000));

        let Verdict::Submit { intent, .. } =
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot)
        else {
            panic!("expected entry");
        };
        core.on_execution(&fill_for(&intent, Side::Buy));
        snapshot.positions.push(Position {
            instrument: "EURUSD".to_string(),
            side: Side::Buy,
            size: intent.size,
            avg_entry_price: dec!(1.1001),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        });

        // Same-side signal does not pyramid.
        assert_eq!(
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot),
            Verdict::Ignored
        );

        let verdict = core.on_signal(&signal(SignalKind::Exhaustion, Side::Sell), &snapshot);
        let Verdict::Submit { intent: exit, side } = verdict else {
            panic!("expected exit, got {verdict:?}");
        };
        assert_eq!(exit.action, IntentAction::Exit);
        assert_eq!(side, Side::Sell);
        assert_eq!(exit.size, intent.size);
        assert_eq!(core.state("EURUSD"), TradeState::PendingExit);

        core.on_execution(&fill_for(&exit, Side::Sell));
        assert_eq!(core.state("EURUSD"), TradeState::Flat);
    }

    #[test]
    fn test_timeout_blocks_instrument_until_reconciled() {
        let mut core = core();
        let snapshot = AccountSnapshot::initial(dec!(10000));

        let Verdict::Submit { intent, side } =
            core.on_signal(&signal(SignalKind::Absorption, Side::Buy), &snapshot)
        else {
            panic!("expected entry");
        };
        let handle = OrderHandle::from_intent(&intent, side);
        let fault = core.on_execution(&ExecutionEvent::TimedOut(handle.clone()));
        assert!(matches!(fault, Some(Fault::ExecutionTimeout { .. })));

        // New signals are refused while reconciling.
        assert!(matches!(
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot),
            Verdict::Rejected(Fault::RiskBreach { .. })
        ));

        core.reconcile("EURUSD", OrderState::Filled);
        assert_eq!(core.state("EURUSD"), TradeState::InPosition);

        // And flow resumes afterwards.
        assert_eq!(
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot),
            Verdict::Ignored
        );
    }

    #[test]
    fn test_routed_order_id_replaces_intent_id() {
        let mut core = core();
        let snapshot = AccountSnapshot::initial(dec!(10000));

        let Verdict::Submit { intent, side } =
            core.on_signal(&signal(SignalKind::Absorption, Side::Buy), &snapshot)
        else {
            panic!("expected entry");
        };
        assert_eq!(core.pending_order("EURUSD"), Some(intent.id));

        // The gateway assigns its own id on submit; that is the id the
        // terminal reports in resyncs, so it replaces the placeholder.
        let handle = OrderHandle::from_intent(&intent, side);
        core.order_routed("EURUSD", handle.id);
        assert_eq!(core.pending_order("EURUSD"), Some(handle.id));
    }

    #[test]
    fn test_stop_suppresses_signals() {
        let mut core = core();
        let snapshot = AccountSnapshot::initial(dec!(10000));

        core.on_control(ControlCommand::Stop, &snapshot);
        assert_eq!(
            core.on_signal(&signal(SignalKind::Absorption, Side::Buy), &snapshot),
            Verdict::Ignored
        );

        core.on_control(ControlCommand::Start, &snapshot);
        assert!(matches!(
            core.on_signal(&signal(SignalKind::Absorption, Side::Buy), &snapshot),
            Verdict::Submit { .. }
        ));
    }

    #[test]
    fn test_flatten_all_exits_open_positions() {
        let mut core = core();
        let mut snapshot = AccountSnapshot::initial(dec!(10000));

        let Verdict::Submit { intent, .. } =
            core.on_signal(&signal(SignalKind::Momentum, Side::Buy), &snapshot)
        else {
            panic!("expected entry");
        };
        core.on_execution(&fill_for(&intent, Side::Buy));
        snapshot.positions.push(Position {
            instrument: "EURUSD".to_string(),
            side: Side::Buy,
            size: intent.size,
            avg_entry_price: dec!(1.1001),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        });

        let verdicts = core.on_control(ControlCommand::FlattenAll, &snapshot);
        assert_eq!(verdicts.len(), 1);
        let Verdict::Submit { intent: flatten, side } = &verdicts[0] else {
            panic!("expected flatten submit");
        };
        assert_eq!(flatten.action, IntentAction::Flatten);
        assert_eq!(*side, Side::Sell);
        assert_eq!(core.state("EURUSD"), TradeState::PendingExit);
    }
}
