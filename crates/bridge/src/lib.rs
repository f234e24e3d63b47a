pub mod client;
pub mod protocol;

pub use client::{BridgeClient, BridgeError, BridgeStatus, ResyncState};
pub use protocol::{frame_message, read_frame, BridgeMessage, BridgePayload};
