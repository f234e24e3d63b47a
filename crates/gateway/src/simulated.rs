use async_trait::async_trait;
use rust_decimal::Decimal;
use tapeflow_core::{
    CancelAck, ExecutionEvent, ExecutionGateway, FillReport, GatewayError, Intent, OrderHandle,
    OrderState, PriceBook, Side,
};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Simulated fill engine.
///
/// Fills at the last known tick price adjusted by configured slippage:
/// buys pay up, sells give up. Confirmation events are delivered on the
/// caller's channel from a spawned task so the submit path mirrors the
/// bridge gateway's fire-and-await-callback shape.
pub struct SimulatedGateway {
    prices: PriceBook,
    slippage: Decimal,
}

impl SimulatedGateway {
    pub fn new(prices: PriceBook, slippage: Decimal) -> Self {
        Self { prices, slippage }
    }

    fn fill_price(&self, side: Side, last: Decimal) -> Decimal {
        match side {
            Side::Buy => last + self.slippage,
            Side::Sell => last - self.slippage,
        }
    }
}

#[async_trait]
impl ExecutionGateway for SimulatedGateway {
    async fn submit(
        &self,
        intent: Intent,
        side: Side,
        confirm: mpsc::Sender<ExecutionEvent>,
    ) -> Result<OrderHandle, GatewayError> {
        let last = self
            .prices
            .last_price(&intent.instrument)
            .ok_or_else(|| GatewayError::NoPrice(intent.instrument.clone()))?;

        let handle = OrderHandle::from_intent(&intent, side);
        let fill_price = self.fill_price(side, last);

        // Limit constraint: reject when the simulated fill would be worse
        // than the stated worst acceptable price.
        let violates_limit = match (intent.limit_price, side) {
            (Some(limit), Side::Buy) => fill_price > limit,
            (Some(limit), Side::Sell) => fill_price < limit,
            (None, _) => false,
        };

        let mut returned = handle.clone();
        returned.state = OrderState::Pending;

        tokio::spawn(async move {
            let mut acked = handle.clone();
            acked.state = OrderState::Acked;
            let _ = confirm.send(ExecutionEvent::Acked(acked)).await;

            if violates_limit {
                let mut rejected = handle.clone();
                rejected.state = OrderState::Rejected;
                let _ = confirm
                    .send(ExecutionEvent::Rejected {
                        handle: rejected,
                        reason: format!(
                            "limit {} not satisfiable at {}",
                            intent.limit_price.unwrap_or_default(),
                            fill_price
                        ),
                    })
                    .await;
                return;
            }

            debug!(
                instrument = %handle.instrument,
                order_id = %handle.id,
                price = %fill_price,
                "simulated fill"
            );
            let _ = confirm
                .send(ExecutionEvent::Filled(FillReport {
                    order_id: handle.id,
                    intent_id: handle.intent_id,
                    instrument: handle.instrument.clone(),
                    side,
                    size: handle.size,
                    price: fill_price,
                    timestamp: intent.timestamp,
                }))
                .await;
        });

        Ok(returned)
    }

    async fn cancel(&self, _order_id: Uuid) -> Result<CancelAck, GatewayError> {
        // Everything resolves instantly in simulation, so there is never a
        // working order left to cancel.
        Ok(CancelAck::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tapeflow_core::IntentAction;

    fn intent(instrument: &str, side: Side, size: Decimal, limit: Option<Decimal>) -> Intent {
        Intent {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            action: IntentAction::Enter(side),
            size,
            limit_price: limit,
            signal_seq: Some(1),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fill_applies_slippage_both_ways() {
        let prices = PriceBook::new();
        prices.update("EURUSD", dec!(1.1000));
        let gateway = SimulatedGateway::new(prices, dec!(0.0002));
        let (tx, mut rx) = mpsc::channel(8);

        gateway
            .submit(intent("EURUSD", Side::Buy, dec!(1), None), Side::Buy, tx.clone())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ExecutionEvent::Acked(_))));
        match rx.recv().await {
            Some(ExecutionEvent::Filled(fill)) => assert_eq!(fill.price, dec!(1.1002)),
            other => panic!("expected fill, got {other:?}"),
        }

        gateway
            .submit(intent("EURUSD", Side::Sell, dec!(1), None), Side::Sell, tx)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ExecutionEvent::Acked(_))));
        match rx.recv().await {
            Some(ExecutionEvent::Filled(fill)) => assert_eq!(fill.price, dec!(1.0998)),
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsatisfiable_limit_rejected() {
        let prices = PriceBook::new();
        prices.update("EURUSD", dec!(1.1000));
        let gateway = SimulatedGateway::new(prices, dec!(0.0002));
        let (tx, mut rx) = mpsc::channel(8);

        // Buy limit below the achievable fill price.
        gateway
            .submit(
                intent("EURUSD", Side::Buy, dec!(1), Some(dec!(1.1001))),
                Side::Buy,
                tx,
            )
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ExecutionEvent::Acked(_))));
        assert!(matches!(
            rx.recv().await,
            Some(ExecutionEvent::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_without_price_fails() {
        let gateway = SimulatedGateway::new(PriceBook::new(), dec!(0.0001));
        let (tx, _rx) = mpsc::channel(8);
        let result = gateway
            .submit(intent("EURUSD", Side::Buy, dec!(1), None), Side::Buy, tx)
            .await;
        assert!(matches!(result, Err(GatewayError::NoPrice(_))));
    }

    #[tokio::test]
    async fn test_cancel_reports_not_found() {
        let gateway = SimulatedGateway::new(PriceBook::new(), dec!(0.0001));
        let ack = gateway.cancel(Uuid::new_v4()).await.unwrap();
        assert_eq!(ack, CancelAck::NotFound);
    }
}
