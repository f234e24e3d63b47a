use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tapeflow_core::{OrderHandle, Position, RawTick, Side, TickSide};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Envelope exchanged with the terminal proxy. Every outbound non-heartbeat
/// request expects exactly one correlated terminal response (or a timeout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub correlation_id: Uuid,
    #[serde(flatten)]
    pub payload: BridgePayload,
}

impl BridgeMessage {
    pub fn new(payload: BridgePayload) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            payload,
        }
    }

    pub fn reply(correlation_id: Uuid, payload: BridgePayload) -> Self {
        Self {
            correlation_id,
            payload,
        }
    }
}

/// Message kinds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgePayload {
    /// Unsolicited tape event streamed by the terminal.
    Tick {
        instrument: String,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        side: TickSide,
        sequence: u64,
    },
    /// Submit a new order at the terminal.
    OrderSubmit {
        order_id: Uuid,
        instrument: String,
        side: Side,
        size: Decimal,
        limit_price: Option<Decimal>,
    },
    /// Terminal accepted the order (non-terminal acknowledgement).
    OrderAck { order_id: Uuid },
    /// Terminal filled the order.
    OrderFill {
        order_id: Uuid,
        size: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// Terminal rejected the order.
    OrderReject { order_id: Uuid, reason: String },
    /// Cancel an order at the terminal.
    OrderCancel { order_id: Uuid },
    /// Cancel confirmed.
    OrderCancelled { order_id: Uuid },
    Heartbeat { timestamp: DateTime<Utc> },
    HeartbeatAck { timestamp: DateTime<Utc> },
    /// Full state resynchronization request, issued on every reconnect.
    ResyncRequest,
    /// Authoritative terminal state: open positions and working orders.
    ResyncState {
        positions: Vec<Position>,
        pending_orders: Vec<OrderHandle>,
    },
    Error { message: String },
}

impl BridgePayload {
    /// Whether this payload is a terminal response that resolves a pending
    /// correlated request.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            BridgePayload::OrderFill { .. }
                | BridgePayload::OrderReject { .. }
                | BridgePayload::OrderCancelled { .. }
                | BridgePayload::ResyncState { .. }
                | BridgePayload::Error { .. }
        )
    }

    /// Convert a streamed tick payload into the feed's raw shape.
    pub fn into_raw_tick(self) -> Option<RawTick> {
        match self {
            BridgePayload::Tick {
                instrument,
                timestamp,
                price,
                volume,
                side,
                sequence,
            } => Some(RawTick {
                instrument,
                timestamp,
                price,
                volume,
                side,
                sequence,
            }),
            _ => None,
        }
    }
}

/// Frame a serialized message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &BridgeMessage) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(msg)?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Maximum accepted frame body; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Read one length-prefixed frame from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<BridgeMessage, crate::client::BridgeError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(crate::client::BridgeError::Protocol(format!(
            "frame of {len} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let msg = serde_json::from_slice(&body)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_envelope_round_trip() {
        let msg = BridgeMessage::new(BridgePayload::OrderSubmit {
            order_id: Uuid::new_v4(),
            instrument: "EURUSD".to_string(),
            side: Side::Buy,
            size: dec!(1.5),
            limit_price: Some(dec!(1.1000)),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: BridgeMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_wire_type_tag() {
        let msg = BridgeMessage::new(BridgePayload::Heartbeat {
            timestamp: Utc::now(),
        });
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert!(value["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let msg = BridgeMessage::new(BridgePayload::Tick {
            instrument: "EURUSD".to_string(),
            timestamp: Utc::now(),
            price: dec!(1.1000),
            volume: dec!(3),
            side: TickSide::Trade,
            sequence: 7,
        });
        let framed = frame_message(&msg).unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut framed = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(b"junk");
        let mut cursor = std::io::Cursor::new(framed);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(crate::client::BridgeError::Protocol(_))
        ));
    }

    #[test]
    fn test_tick_payload_to_raw() {
        let payload = BridgePayload::Tick {
            instrument: "GBPUSD".to_string(),
            timestamp: Utc::now(),
            price: dec!(1.25),
            volume: dec!(2),
            side: TickSide::Bid,
            sequence: 99,
        };
        let raw = payload.into_raw_tick().unwrap();
        assert_eq!(raw.instrument, "GBPUSD");
        assert_eq!(raw.sequence, 99);
        assert!(BridgePayload::ResyncRequest.into_raw_tick().is_none());
    }
}
