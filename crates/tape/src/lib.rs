pub mod analyzer;
pub mod window;

pub use analyzer::TapeAnalyzer;
pub use window::OrderFlowWindow;
