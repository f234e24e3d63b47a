pub mod bridge;
pub mod simulated;

pub use bridge::BridgeGateway;
pub use simulated::SimulatedGateway;
