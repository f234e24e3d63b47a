use async_trait::async_trait;
use tapeflow_bridge::BridgeClient;
use tapeflow_core::{FeedError, FeedSource, RawTick};
use tokio::sync::broadcast;
use tracing::warn;

/// Feed source backed by the remote terminal via the proxy bridge.
///
/// Ticks stream unsolicited from the terminal; this source just subscribes
/// to the client's broadcast and surfaces the raw events. Validation stays
/// in the [`FeedAdapter`](crate::FeedAdapter) so bridge and simulation
/// ticks go through the identical path.
pub struct BridgeFeed {
    ticks: broadcast::Receiver<RawTick>,
    lagged: u64,
}

impl BridgeFeed {
    pub fn new(client: &BridgeClient) -> Self {
        Self {
            ticks: client.subscribe_ticks(),
            lagged: 0,
        }
    }

    /// Ticks missed because the consumer fell behind the broadcast buffer.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[async_trait]
impl FeedSource for BridgeFeed {
    async fn next_tick(&mut self) -> Result<RawTick, FeedError> {
        loop {
            match self.ticks.recv().await {
                Ok(raw) => return Ok(raw),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // The adapter will see the sequence jump; nothing to
                    // re-order here.
                    self.lagged += n;
                    warn!(missed = n, "bridge feed lagged behind tick stream");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }
}
