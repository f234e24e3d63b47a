use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Per-instrument trade lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Flat,
    PendingEntry,
    InPosition,
    PendingExit,
}

/// Inputs that drive the trade state machine. Only intent submissions and
/// execution confirmations appear here; the dashboard has no input of its
/// own (control commands become intents first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeInput {
    EntrySubmitted,
    ExitSubmitted,
    Filled,
    Rejected,
    Cancelled,
}

/// The complete transition table. Anything not listed here is an invalid
/// transition and is rejected rather than silently absorbed.
const TRANSITIONS: &[(TradeState, TradeInput, TradeState)] = &[
    (TradeState::Flat, TradeInput::EntrySubmitted, TradeState::PendingEntry),
    (TradeState::PendingEntry, TradeInput::Filled, TradeState::InPosition),
    (TradeState::PendingEntry, TradeInput::Rejected, TradeState::Flat),
    (TradeState::PendingEntry, TradeInput::Cancelled, TradeState::Flat),
    (TradeState::InPosition, TradeInput::ExitSubmitted, TradeState::PendingExit),
    (TradeState::PendingExit, TradeInput::Filled, TradeState::Flat),
    (TradeState::PendingExit, TradeInput::Rejected, TradeState::InPosition),
    (TradeState::PendingExit, TradeInput::Cancelled, TradeState::InPosition),
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: {input:?} in state {state:?}")]
pub struct InvalidTransition {
    pub state: TradeState,
    pub input: TradeInput,
}

/// Tagged state plus the order currently awaiting confirmation.
///
/// `reconciling` is orthogonal to the state: a timed-out order leaves the
/// machine where it was but blocks all new inputs except the explicit
/// resolution delivered by [`TradeMachine::reconcile`].
#[derive(Debug)]
pub struct TradeMachine {
    state: TradeState,
    pending_order: Option<Uuid>,
    reconciling: bool,
}

impl Default for TradeMachine {
    fn default() -> Self {
        Self {
            state: TradeState::Flat,
            pending_order: None,
            reconciling: false,
        }
    }
}

impl TradeMachine {
    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn reconciling(&self) -> bool {
        self.reconciling
    }

    pub fn pending_order(&self) -> Option<Uuid> {
        self.pending_order
    }

    /// Apply one input, looking the transition up in the table.
    pub fn apply(&mut self, input: TradeInput) -> Result<TradeState, InvalidTransition> {
        let next = TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self.state && *on == input)
            .map(|(_, _, to)| *to)
            .ok_or(InvalidTransition {
                state: self.state,
                input,
            })?;
        self.state = next;
        if matches!(
            input,
            TradeInput::Filled | TradeInput::Rejected | TradeInput::Cancelled
        ) {
            self.pending_order = None;
        }
        Ok(next)
    }

    pub fn order_submitted(&mut self, input: TradeInput, order_id: Uuid) -> Result<TradeState, InvalidTransition> {
        let next = self.apply(input)?;
        self.pending_order = Some(order_id);
        Ok(next)
    }

    /// Replace the tracked order id with the one the gateway actually
    /// routed. The intent id is only a placeholder until the gateway
    /// assigns its own id, which is the one the terminal knows.
    pub fn order_routed(&mut self, order_id: Uuid) {
        if self.pending_order.is_some() {
            self.pending_order = Some(order_id);
        }
    }

    /// Mark the pending order as timed out. The state is left untouched;
    /// the machine refuses further inputs until [`reconcile`] resolves the
    /// true order state.
    ///
    /// [`reconcile`]: TradeMachine::reconcile
    pub fn mark_unknown(&mut self) {
        self.reconciling = true;
    }

    /// Resolve a timed-out order with its authoritative outcome.
    pub fn reconcile(&mut self, resolution: TradeInput) -> Result<TradeState, InvalidTransition> {
        let next = self.apply(resolution)?;
        self.reconciling = false;
        Ok(next)
    }
}
