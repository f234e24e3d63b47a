pub mod adapter;
pub mod bridge;
pub mod sim;

pub use adapter::FeedAdapter;
pub use bridge::BridgeFeed;
pub use sim::SimulatedFeed;
