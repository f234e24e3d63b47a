use crate::protocol::{frame_message, read_frame, BridgeMessage, BridgePayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tapeflow_core::{BridgeConfig, OrderHandle, Position, RawTick};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("bridge protocol violation: {0}")]
    Protocol(String),
    #[error("bridge request timed out")]
    Timeout,
    #[error("bridge disconnected")]
    Disconnected,
    #[error("bridge address not configured")]
    NoAddress,
}

/// Connection state published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Connecting,
    Connected,
    Disconnected { missed_heartbeats: u32 },
}

/// Authoritative terminal state delivered after each reconnect resync.
#[derive(Debug, Clone)]
pub struct ResyncState {
    pub positions: Vec<Position>,
    pub pending_orders: Vec<OrderHandle>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<BridgePayload>>>>;

/// Client side of the proxy bridge: a persistent framed TCP channel to the
/// terminal process with correlated request/response, heartbeat
/// supervision, and automatic exponential-backoff reconnection.
#[derive(Clone)]
pub struct BridgeClient {
    outbound_tx: mpsc::Sender<BridgeMessage>,
    pending: PendingMap,
    tick_tx: broadcast::Sender<RawTick>,
    status_rx: watch::Receiver<BridgeStatus>,
    timeout: Duration,
}

impl BridgeClient {
    /// Start the client and its supervisor task. Returns the client plus a
    /// receiver for resync states delivered after each (re)connect.
    pub fn start(config: BridgeConfig) -> Result<(Self, mpsc::Receiver<ResyncState>), BridgeError> {
        let addr = config.addr.clone().ok_or(BridgeError::NoAddress)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (tick_tx, _) = broadcast::channel(4096);
        let (status_tx, status_rx) = watch::channel(BridgeStatus::Connecting);
        let (resync_tx, resync_rx) = mpsc::channel(4);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let client = Self {
            outbound_tx,
            pending: pending.clone(),
            tick_tx: tick_tx.clone(),
            status_rx,
            timeout: Duration::from_millis(config.timeout_ms),
        };

        tokio::spawn(supervise(
            addr,
            config,
            outbound_rx,
            pending,
            tick_tx,
            status_tx,
            resync_tx,
            client.clone(),
        ));

        Ok((client, resync_rx))
    }

    /// Subscribe to the unsolicited tick stream.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<RawTick> {
        self.tick_tx.subscribe()
    }

    /// Watch the connection status.
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.status_rx.borrow() == BridgeStatus::Connected
    }

    /// Send a correlated request and await its single terminal response
    /// within the configured timeout. On expiry the pending entry is
    /// dropped and the caller decides how to surface the fault; the
    /// request is never silently retried.
    pub async fn request(&self, payload: BridgePayload) -> Result<BridgePayload, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::Disconnected);
        }

        let msg = BridgeMessage::new(payload);
        let correlation_id = msg.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(correlation_id, tx);

        if self.outbound_tx.send(msg).await.is_err() {
            self.drop_pending(correlation_id);
            return Err(BridgeError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            // Sender dropped: the connection died while we waited.
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                self.drop_pending(correlation_id);
                Err(BridgeError::Timeout)
            }
        }
    }

    fn drop_pending(&self, correlation_id: Uuid) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&correlation_id);
    }
}

/// Reconnect loop: connect, run the connection until it fails, resolve all
/// pending requests as dead, back off exponentially, repeat.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    addr: String,
    config: BridgeConfig,
    mut outbound_rx: mpsc::Receiver<BridgeMessage>,
    pending: PendingMap,
    tick_tx: broadcast::Sender<RawTick>,
    status_tx: watch::Sender<BridgeStatus>,
    resync_tx: mpsc::Sender<ResyncState>,
    client: BridgeClient,
) {
    let base = Duration::from_millis(config.reconnect_base_ms.max(1));
    let max = Duration::from_millis(config.reconnect_max_ms.max(1));
    let mut backoff = base;

    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "bridge connected");
                backoff = base;
                let _ = status_tx.send(BridgeStatus::Connected);

                // Positions and pending orders are never assumed
                // consistent across a reconnect: ask for everything.
                let resync_client = client.clone();
                let resync_out = resync_tx.clone();
                tokio::spawn(async move {
                    match resync_client.request(BridgePayload::ResyncRequest).await {
                        Ok(BridgePayload::ResyncState {
                            positions,
                            pending_orders,
                        }) => {
                            let _ = resync_out
                                .send(ResyncState {
                                    positions,
                                    pending_orders,
                                })
                                .await;
                        }
                        Ok(other) => {
                            warn!(?other, "unexpected resync response");
                        }
                        Err(e) => warn!(error = %e, "resync request failed"),
                    }
                });

                let missed = run_connection(
                    stream,
                    &config,
                    &mut outbound_rx,
                    &pending,
                    &tick_tx,
                )
                .await;
                let _ = status_tx.send(BridgeStatus::Disconnected {
                    missed_heartbeats: missed,
                });
                // Dropping the senders resolves every pending waiter.
                pending.lock().expect("pending map lock poisoned").clear();
                warn!(%addr, missed_heartbeats = missed, "bridge connection lost");
            }
            Err(e) => {
                warn!(%addr, error = %e, backoff_ms = backoff.as_millis() as u64, "bridge connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max);
    }
}

/// Drive one live connection. Returns the missed-heartbeat count that
/// ended it (0 for transport errors).
async fn run_connection(
    stream: TcpStream,
    config: &BridgeConfig,
    outbound_rx: &mut mpsc::Receiver<BridgeMessage>,
    pending: &PendingMap,
    tick_tx: &broadcast::Sender<RawTick>,
) -> u32 {
    let (mut reader, mut writer) = stream.into_split();
    let mut heartbeat = tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    // Frames are read on a dedicated task: `read_frame` is not cancel-safe
    // inside select, a dropped partial read would desync the stream.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Result<BridgeMessage, BridgeError>>(256);
    let reader_task = tokio::spawn(async move {
        loop {
            let frame = read_frame(&mut reader).await;
            let failed = frame.is_err();
            if frame_tx.send(frame).await.is_err() || failed {
                return;
            }
        }
    });

    let missed_at_exit = loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                match frame {
                    None => {
                        break missed;
                    }
                    Some(Ok(msg)) => {
                        match msg.payload {
                            BridgePayload::HeartbeatAck { .. } => {
                                missed = 0;
                            }
                            payload @ BridgePayload::Tick { .. } => {
                                if let Some(raw) = payload.into_raw_tick() {
                                    let _ = tick_tx.send(raw);
                                }
                            }
                            payload if payload.is_response() => {
                                let waiter = pending
                                    .lock()
                                    .expect("pending map lock poisoned")
                                    .remove(&msg.correlation_id);
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(payload);
                                    }
                                    None => {
                                        // Late response for a request that
                                        // already timed out.
                                        warn!(correlation_id = %msg.correlation_id, "uncorrelated response dropped");
                                    }
                                }
                            }
                            payload => {
                                warn!(?payload, "unexpected bridge payload");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "bridge read failed");
                        break missed;
                    }
                }
            }
            Some(msg) = outbound_rx.recv() => {
                match frame_message(&msg) {
                    Ok(framed) => {
                        if let Err(e) = writer.write_all(&framed).await {
                            warn!(error = %e, "bridge write failed");
                            break missed;
                        }
                    }
                    Err(e) => warn!(error = %e, "outbound message serialization failed"),
                }
            }
            _ = heartbeat.tick() => {
                if missed >= config.heartbeat_miss_limit {
                    break missed;
                }
                let beat = BridgeMessage::new(BridgePayload::Heartbeat {
                    timestamp: chrono::Utc::now(),
                });
                match frame_message(&beat) {
                    Ok(framed) => {
                        if let Err(e) = writer.write_all(&framed).await {
                            warn!(error = %e, "heartbeat write failed");
                            break missed;
                        }
                        missed += 1;
                    }
                    Err(e) => warn!(error = %e, "heartbeat serialization failed"),
                }
            }
        }
    };

    reader_task.abort();
    missed_at_exit
}
