use async_trait::async_trait;
use tapeflow_core::{
    CancelAck, ExecutionEvent, ExecutionGateway, FillReport, GatewayError, Intent, OrderHandle,
    OrderState, Side,
};
use tapeflow_bridge::{BridgeClient, BridgeError, BridgePayload};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Execution gateway backed by the remote terminal.
///
/// Each submit becomes one correlated `order_submit` request. The await
/// happens on a spawned task so the caller's tick path never blocks; the
/// single terminal response (or the bridge timeout) is delivered as an
/// [`ExecutionEvent`] on the caller's channel. A timeout leaves the order
/// in `Unknown` state: it is reported as a fault, never assumed filled or
/// cancelled.
pub struct BridgeGateway {
    client: BridgeClient,
}

impl BridgeGateway {
    pub fn new(client: BridgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionGateway for BridgeGateway {
    async fn submit(
        &self,
        intent: Intent,
        side: Side,
        confirm: mpsc::Sender<ExecutionEvent>,
    ) -> Result<OrderHandle, GatewayError> {
        let handle = OrderHandle::from_intent(&intent, side);
        let client = self.client.clone();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            let request = BridgePayload::OrderSubmit {
                order_id: task_handle.id,
                instrument: task_handle.instrument.clone(),
                side,
                size: task_handle.size,
                limit_price: intent.limit_price,
            };

            let event = match client.request(request).await {
                Ok(BridgePayload::OrderFill {
                    order_id,
                    size,
                    price,
                    timestamp,
                }) => ExecutionEvent::Filled(FillReport {
                    order_id,
                    intent_id: task_handle.intent_id,
                    instrument: task_handle.instrument.clone(),
                    side,
                    size,
                    price,
                    timestamp,
                }),
                Ok(BridgePayload::OrderReject { reason, .. }) => {
                    let mut rejected = task_handle.clone();
                    rejected.state = OrderState::Rejected;
                    ExecutionEvent::Rejected {
                        handle: rejected,
                        reason,
                    }
                }
                Ok(other) => {
                    warn!(?other, "unexpected order response from terminal");
                    let mut rejected = task_handle.clone();
                    rejected.state = OrderState::Rejected;
                    ExecutionEvent::Rejected {
                        handle: rejected,
                        reason: "unexpected terminal response".to_string(),
                    }
                }
                // Timeout and disconnect both leave the true order state
                // unknowable from here.
                Err(BridgeError::Timeout) | Err(BridgeError::Disconnected) => {
                    let mut unknown = task_handle.clone();
                    unknown.state = OrderState::Unknown;
                    ExecutionEvent::TimedOut(unknown)
                }
                Err(e) => {
                    warn!(error = %e, "order submit failed");
                    let mut unknown = task_handle.clone();
                    unknown.state = OrderState::Unknown;
                    ExecutionEvent::TimedOut(unknown)
                }
            };

            let _ = confirm.send(event).await;
        });

        Ok(handle)
    }

    async fn cancel(&self, order_id: Uuid) -> Result<CancelAck, GatewayError> {
        match self
            .client
            .request(BridgePayload::OrderCancel { order_id })
            .await
        {
            Ok(BridgePayload::OrderCancelled { .. }) => Ok(CancelAck::Cancelled),
            Ok(BridgePayload::Error { .. }) => Ok(CancelAck::NotFound),
            Ok(other) => Err(GatewayError::Other(format!(
                "unexpected cancel response: {other:?}"
            ))),
            Err(e) => Err(GatewayError::BridgeUnavailable(e.to_string())),
        }
    }
}
