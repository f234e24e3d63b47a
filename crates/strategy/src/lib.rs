pub mod decision;
pub mod risk;
pub mod state_machine;

pub use decision::{DecisionCore, Verdict};
pub use risk::{RiskDecision, RiskGate};
pub use state_machine::{TradeInput, TradeMachine, TradeState};
