pub mod aggregator;
pub mod history;
pub mod runtime;

pub use aggregator::StateAggregator;
pub use history::SignalHistory;
pub use runtime::{start, EngineError, EngineHandle};
