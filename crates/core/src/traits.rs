use crate::events::ExecutionEvent;
use crate::models::*;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Feed source
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed closed")]
    Closed,
    #[error("bridge feed error: {0}")]
    Bridge(String),
}

/// A source of raw tape events. Both the simulation generator and the
/// bridge-backed source yield the identical `RawTick` shape so everything
/// downstream is source-agnostic.
#[async_trait]
pub trait FeedSource: Send {
    /// Await the next raw tape event.
    async fn next_tick(&mut self) -> Result<RawTick, FeedError>;
}

// ---------------------------------------------------------------------------
// Execution gateway
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway has no price for {0}")]
    NoPrice(String),
    #[error("bridge unavailable: {0}")]
    BridgeUnavailable(String),
    #[error("gateway error: {0}")]
    Other(String),
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    Cancelled,
    NotFound,
}

/// Places and cancels orders against either the simulated fill engine or
/// the remote terminal via the bridge.
///
/// `submit` is fire-and-await-callback: it returns an [`OrderHandle`]
/// immediately and delivers fills / rejects / timeouts on `confirm` so the
/// caller's tick path never blocks on gateway I/O.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(
        &self,
        intent: Intent,
        side: Side,
        confirm: mpsc::Sender<ExecutionEvent>,
    ) -> Result<OrderHandle, GatewayError>;

    async fn cancel(&self, order_id: Uuid) -> Result<CancelAck, GatewayError>;
}
