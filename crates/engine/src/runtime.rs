use crate::aggregator::StateAggregator;
use crate::history::SignalHistory;
use std::collections::HashMap;
use std::sync::Arc;
use tapeflow_bridge::{BridgeClient, BridgeError, BridgeStatus, ResyncState};
use tapeflow_core::{
    AccountSnapshot, AggregatorEvent, ControlCommand, EngineConfig, ExecutionEvent,
    ExecutionGateway, Fault, FeedError, FeedSource, HealthState, Mode, OrderHandle, OrderState,
    PriceBook, Signal, Tick,
};
use tapeflow_feed::{BridgeFeed, FeedAdapter, SimulatedFeed};
use tapeflow_gateway::{BridgeGateway, SimulatedGateway};
use tapeflow_strategy::{DecisionCore, Verdict};
use tapeflow_tape::TapeAnalyzer;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

const SIGNAL_HISTORY_CAPACITY: usize = 256;
const TICK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("engine is shutting down")]
    Closed,
}

/// Read-side handle given to the API layer: latest snapshot, signal
/// history, and the control-command channel. Controls go through the
/// decision core's gate like everything else; there is no direct write
/// path into trading state.
#[derive(Clone)]
pub struct EngineHandle {
    control_tx: mpsc::Sender<ControlCommand>,
    snapshot_rx: watch::Receiver<Arc<AccountSnapshot>>,
    history: SignalHistory,
}

impl EngineHandle {
    pub fn snapshot(&self) -> Arc<AccountSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn signals(&self, instrument: &str, limit: usize) -> Vec<Signal> {
        self.history.recent(instrument, limit)
    }

    pub async fn control(&self, command: ControlCommand) -> Result<(), EngineError> {
        self.control_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }
}

/// Gateway pair with live/simulation selection. In live mode every submit
/// re-checks the bridge status so a disconnect degrades to the simulated
/// gateway (when the fallback is enabled) instead of queuing doomed
/// requests.
#[derive(Clone)]
struct Gateways {
    sim: Arc<SimulatedGateway>,
    bridge: Option<Arc<BridgeGateway>>,
    status: Option<watch::Receiver<BridgeStatus>>,
    fallback: bool,
}

impl Gateways {
    fn active(&self) -> Arc<dyn ExecutionGateway> {
        match (&self.bridge, &self.status) {
            (Some(bridge), Some(status)) => {
                if matches!(*status.borrow(), BridgeStatus::Connected) || !self.fallback {
                    bridge.clone()
                } else {
                    self.sim.clone()
                }
            }
            _ => self.sim.clone(),
        }
    }
}

/// Start every engine task and return the handle for the API layer.
pub fn start(config: EngineConfig) -> Result<EngineHandle, EngineError> {
    let (agg_tx, snapshot_rx) = StateAggregator::spawn(config.initial_balance);
    let history = SignalHistory::new(SIGNAL_HISTORY_CAPACITY);
    let prices = PriceBook::new();
    let decision = Arc::new(Mutex::new(DecisionCore::new(config.risk.clone())));

    let mut gateways = Gateways {
        sim: Arc::new(SimulatedGateway::new(prices.clone(), config.slippage)),
        bridge: None,
        status: None,
        fallback: config.bridge.fallback_to_simulation,
    };

    let mut bridge_client = None;
    if config.mode == Mode::Live {
        let (client, resync_rx) = BridgeClient::start(config.bridge.clone())?;
        gateways.bridge = Some(Arc::new(BridgeGateway::new(client.clone())));
        gateways.status = Some(client.status());

        tokio::spawn(monitor_bridge(client.status(), agg_tx.clone()));
        tokio::spawn(apply_resyncs(resync_rx, decision.clone(), agg_tx.clone()));
        bridge_client = Some(client);
    }

    let mut tick_txs = HashMap::new();
    let mut exec_txs = HashMap::new();
    for instrument in &config.instruments {
        let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);
        let (exec_tx, exec_rx) = mpsc::channel::<ExecutionEvent>(64);
        tick_txs.insert(instrument.clone(), tick_tx);
        exec_txs.insert(instrument.clone(), exec_tx.clone());

        tokio::spawn(instrument_worker(WorkerContext {
            instrument: instrument.clone(),
            tick_rx,
            exec_rx,
            exec_tx,
            analyzer: TapeAnalyzer::new(config.tape.clone()),
            decision: decision.clone(),
            gateways: gateways.clone(),
            agg_tx: agg_tx.clone(),
            snapshot_rx: snapshot_rx.clone(),
            history: history.clone(),
            prices: prices.clone(),
        }));
    }

    tokio::spawn(run_feed(
        config.clone(),
        bridge_client,
        tick_txs,
        agg_tx.clone(),
    ));

    let (control_tx, control_rx) = mpsc::channel(16);
    tokio::spawn(dispatch_controls(
        control_rx,
        decision,
        gateways,
        snapshot_rx.clone(),
        agg_tx,
        exec_txs,
    ));

    info!(mode = ?config.mode, instruments = ?config.instruments, "engine started");

    Ok(EngineHandle {
        control_tx,
        snapshot_rx,
        history,
    })
}

struct WorkerContext {
    instrument: String,
    tick_rx: mpsc::Receiver<Tick>,
    exec_rx: mpsc::Receiver<ExecutionEvent>,
    exec_tx: mpsc::Sender<ExecutionEvent>,
    analyzer: TapeAnalyzer,
    decision: Arc<Mutex<DecisionCore>>,
    gateways: Gateways,
    agg_tx: mpsc::Sender<AggregatorEvent>,
    snapshot_rx: watch::Receiver<Arc<AccountSnapshot>>,
    history: SignalHistory,
    prices: PriceBook,
}

/// The single event-processing path for one instrument: ticks are applied
/// to the window strictly in channel order, confirmations interleave
/// between ticks. Nothing here awaits a gateway response inline.
async fn instrument_worker(mut ctx: WorkerContext) {
    enum WorkerEvent {
        Tick(Tick),
        Execution(ExecutionEvent),
    }

    let mut halt_reported = false;
    loop {
        let next = tokio::select! {
            maybe = ctx.tick_rx.recv() => maybe.map(WorkerEvent::Tick),
            maybe = ctx.exec_rx.recv() => maybe.map(WorkerEvent::Execution),
        };
        match next {
            Some(WorkerEvent::Tick(tick)) => on_tick(&mut ctx, tick, &mut halt_reported).await,
            Some(WorkerEvent::Execution(event)) => on_execution(&mut ctx, event).await,
            None => break,
        }
    }
    info!(instrument = %ctx.instrument, "worker stopped");
}

async fn on_tick(ctx: &mut WorkerContext, tick: Tick, halt_reported: &mut bool) {
    ctx.prices.update(&tick.instrument, tick.price);
    let _ = ctx.agg_tx.send(AggregatorEvent::TicksProcessed(1)).await;
    let _ = ctx
        .agg_tx
        .send(AggregatorEvent::Mark {
            instrument: tick.instrument.clone(),
            price: tick.price,
            timestamp: tick.timestamp,
        })
        .await;

    for signal in ctx.analyzer.on_tick(&tick) {
        ctx.history.push(signal.clone());
        let _ = ctx.agg_tx.send(AggregatorEvent::SignalEmitted).await;

        let snapshot = ctx.snapshot_rx.borrow().clone();
        let (verdict, halted) = {
            let mut core = ctx.decision.lock().await;
            core.update_account(&snapshot);
            (core.on_signal(&signal, &snapshot), core.is_halted())
        };

        // Report on the rising edge only; the flag tracks the gate so a
        // halt on a later trading day is reported again.
        if halted && !*halt_reported {
            let _ = ctx.agg_tx.send(AggregatorEvent::Health(HealthState::Halted)).await;
            let _ = ctx
                .agg_tx
                .send(AggregatorEvent::Fault(Fault::RiskBreach {
                    instrument: ctx.instrument.clone(),
                    reason: "daily loss limit breached".to_string(),
                }))
                .await;
        }
        *halt_reported = halted;

        match verdict {
            Verdict::Submit { intent, side } => {
                let _ = ctx.agg_tx.send(AggregatorEvent::IntentAccepted).await;
                submit(
                    &ctx.gateways,
                    &ctx.decision,
                    &ctx.agg_tx,
                    intent,
                    side,
                    ctx.exec_tx.clone(),
                )
                .await;
            }
            Verdict::Rejected(fault) => {
                let _ = ctx.agg_tx.send(AggregatorEvent::IntentRejected).await;
                let _ = ctx.agg_tx.send(AggregatorEvent::Fault(fault)).await;
            }
            Verdict::Ignored => {}
        }
    }
}

/// Submit an approved intent; a gateway-level failure is folded back into
/// the decision core as a synthetic rejection so the state machine does
/// not stay pending forever.
async fn submit(
    gateways: &Gateways,
    decision: &Arc<Mutex<DecisionCore>>,
    agg_tx: &mpsc::Sender<AggregatorEvent>,
    intent: tapeflow_core::Intent,
    side: tapeflow_core::Side,
    confirm: mpsc::Sender<ExecutionEvent>,
) {
    match gateways.active().submit(intent.clone(), side, confirm).await {
        Ok(handle) => {
            // The terminal only knows the gateway's order id; track that
            // one so a resync can be matched against it.
            decision
                .lock()
                .await
                .order_routed(&handle.instrument, handle.id);
            let _ = agg_tx.send(AggregatorEvent::OrderPending(handle)).await;
        }
        Err(e) => {
            warn!(instrument = %intent.instrument, error = %e, "gateway refused intent");
            let mut handle = OrderHandle::from_intent(&intent, side);
            handle.state = OrderState::Rejected;
            decision
                .lock()
                .await
                .on_execution(&ExecutionEvent::Rejected {
                    handle,
                    reason: e.to_string(),
                });
            let _ = agg_tx.send(AggregatorEvent::IntentRejected).await;
        }
    }
}

async fn on_execution(ctx: &mut WorkerContext, event: ExecutionEvent) {
    let fault = ctx.decision.lock().await.on_execution(&event);

    let resolution = match &event {
        ExecutionEvent::Acked(handle) => Some((handle.id, OrderState::Acked)),
        ExecutionEvent::Filled(fill) => Some((fill.order_id, OrderState::Filled)),
        ExecutionEvent::Rejected { handle, .. } => Some((handle.id, OrderState::Rejected)),
        ExecutionEvent::Cancelled(handle) => Some((handle.id, OrderState::Cancelled)),
        ExecutionEvent::TimedOut(handle) => Some((handle.id, OrderState::Unknown)),
    };
    if let Some((order_id, state)) = resolution {
        let _ = ctx
            .agg_tx
            .send(AggregatorEvent::OrderResolved { order_id, state })
            .await;
    }
    if let ExecutionEvent::Filled(fill) = event {
        let _ = ctx.agg_tx.send(AggregatorEvent::Fill(fill)).await;
    }
    if let Some(fault) = fault {
        let _ = ctx.agg_tx.send(AggregatorEvent::Fault(fault)).await;
    }
}

/// Pump the configured feed source, promoting raw ticks through the
/// adapter and routing them to the per-instrument workers. In live mode
/// the source follows the bridge status: terminal ticks while connected,
/// the deterministic simulation while disconnected (if enabled).
async fn run_feed(
    config: EngineConfig,
    client: Option<BridgeClient>,
    tick_txs: HashMap<String, mpsc::Sender<Tick>>,
    agg_tx: mpsc::Sender<AggregatorEvent>,
) {
    let instruments = config.instruments.clone();
    let Some(client) = client else {
        let mut feed = SimulatedFeed::new(&instruments, config.sim_seed);
        drive_feed(&mut feed, &instruments, &tick_txs, &agg_tx, None).await;
        return;
    };

    let mut status = client.status();
    loop {
        let connected = matches!(*status.borrow_and_update(), BridgeStatus::Connected);
        if connected {
            let mut feed = BridgeFeed::new(&client);
            drive_feed(&mut feed, &instruments, &tick_txs, &agg_tx, Some(&mut status)).await;
        } else if config.bridge.fallback_to_simulation {
            let mut feed = SimulatedFeed::new(&instruments, config.sim_seed);
            drive_feed(&mut feed, &instruments, &tick_txs, &agg_tx, Some(&mut status)).await;
        } else if status.changed().await.is_err() {
            return;
        }
    }
}

/// Drive one feed source until it closes or the bridge status changes.
/// Each source session gets a fresh adapter: sequence spaces are
/// per-source, not carried across a failover.
async fn drive_feed(
    feed: &mut dyn FeedSource,
    instruments: &[String],
    tick_txs: &HashMap<String, mpsc::Sender<Tick>>,
    agg_tx: &mpsc::Sender<AggregatorEvent>,
    mut status: Option<&mut watch::Receiver<BridgeStatus>>,
) {
    let mut adapter = FeedAdapter::new(instruments.to_vec());
    loop {
        let next = match status.as_deref_mut() {
            Some(status) => {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_ok() {
                            info!("bridge status changed, switching feed source");
                        }
                        return;
                    }
                    next = feed.next_tick() => next,
                }
            }
            None => feed.next_tick().await,
        };

        match next {
            Ok(raw) => match adapter.ingest(raw) {
                Ok(tick) => {
                    if let Some(tx) = tick_txs.get(&tick.instrument) {
                        if tx.send(tick).await.is_err() {
                            return;
                        }
                    }
                }
                Err(fault) => {
                    let _ = agg_tx.send(AggregatorEvent::Fault(fault)).await;
                }
            },
            Err(FeedError::Closed) => {
                info!("feed source closed");
                return;
            }
            Err(e) => {
                error!(error = %e, "feed source failed");
                return;
            }
        }
    }
}

/// Track bridge health for the snapshot. A disconnect degrades the
/// engine; reconnecting restores it (unless a risk halt is in force,
/// which the aggregator keeps sticky).
async fn monitor_bridge(
    mut status: watch::Receiver<BridgeStatus>,
    agg_tx: mpsc::Sender<AggregatorEvent>,
) {
    loop {
        let current = *status.borrow_and_update();
        match current {
            BridgeStatus::Connected => {
                let _ = agg_tx.send(AggregatorEvent::Health(HealthState::Running)).await;
            }
            BridgeStatus::Disconnected { missed_heartbeats } => {
                let _ = agg_tx
                    .send(AggregatorEvent::Fault(Fault::BridgeDisconnected {
                        missed_heartbeats,
                    }))
                    .await;
                let _ = agg_tx.send(AggregatorEvent::Health(HealthState::Degraded)).await;
            }
            BridgeStatus::Connecting => {}
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}

/// Fold each post-reconnect resync into local state: the aggregator takes
/// the terminal's positions and working orders wholesale, and instruments
/// blocked on a timed-out order are resolved against what the terminal
/// actually reports.
async fn apply_resyncs(
    mut resync_rx: mpsc::Receiver<ResyncState>,
    decision: Arc<Mutex<DecisionCore>>,
    agg_tx: mpsc::Sender<AggregatorEvent>,
) {
    while let Some(resync) = resync_rx.recv().await {
        let _ = agg_tx
            .send(AggregatorEvent::Resync {
                positions: resync.positions.clone(),
                pending_orders: resync.pending_orders.clone(),
            })
            .await;

        let mut core = decision.lock().await;
        for instrument in core.reconciling_instruments() {
            let still_working = core.pending_order(&instrument).is_some_and(|id| {
                resync.pending_orders.iter().any(|o| o.id == id)
            });
            if still_working {
                // The order exists at the terminal; keep waiting for its
                // confirmation rather than guessing.
                continue;
            }
            let resolved = if resync.positions.iter().any(|p| p.instrument == instrument) {
                OrderState::Filled
            } else {
                OrderState::Cancelled
            };
            info!(%instrument, ?resolved, "resolving timed-out order from resync");
            core.reconcile(&instrument, resolved);
        }
    }
}

/// Route dashboard control commands through the decision core and submit
/// any resulting flatten intents on the owning instrument's confirmation
/// channel.
async fn dispatch_controls(
    mut control_rx: mpsc::Receiver<ControlCommand>,
    decision: Arc<Mutex<DecisionCore>>,
    gateways: Gateways,
    snapshot_rx: watch::Receiver<Arc<AccountSnapshot>>,
    agg_tx: mpsc::Sender<AggregatorEvent>,
    exec_txs: HashMap<String, mpsc::Sender<ExecutionEvent>>,
) {
    while let Some(command) = control_rx.recv().await {
        let snapshot = snapshot_rx.borrow().clone();
        let verdicts = decision.lock().await.on_control(command, &snapshot);
        for verdict in verdicts {
            let Verdict::Submit { intent, side } = verdict else {
                continue;
            };
            let Some(exec_tx) = exec_txs.get(&intent.instrument) else {
                warn!(instrument = %intent.instrument, "no worker for flatten intent");
                continue;
            };
            let _ = agg_tx.send(AggregatorEvent::IntentAccepted).await;
            submit(&gateways, &decision, &agg_tx, intent, side, exec_tx.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tapeflow_core::{
        BridgeConfig, Position, RiskConfig, Side, SignalKind, TapeConfig, WindowSnapshot,
    };
    use tapeflow_strategy::TradeState;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_simulation_engine_processes_ticks() {
        let config = EngineConfig {
            instruments: vec!["EURUSD".to_string()],
            ..EngineConfig::default()
        };
        let handle = start(config).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = handle.snapshot();
            if snapshot.stats.ticks_processed >= 50 {
                assert_eq!(snapshot.health, HealthState::Running);
                assert!(snapshot.equity > rust_decimal::Decimal::ZERO);
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "engine never processed ticks"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// When the terminal stops acking heartbeats the engine must degrade
    /// and keep trading on the simulated feed.
    #[tokio::test]
    async fn test_heartbeat_loss_degrades_and_falls_back_to_simulation() {
        // A terminal that accepts the connection but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let _keep = stream;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });

        let config = EngineConfig {
            mode: Mode::Live,
            instruments: vec!["EURUSD".to_string()],
            bridge: BridgeConfig {
                addr: Some(addr),
                heartbeat_interval_ms: 50,
                heartbeat_miss_limit: 2,
                timeout_ms: 200,
                fallback_to_simulation: true,
                // Long enough that the first disconnect lasts the test.
                reconnect_base_ms: 60_000,
                reconnect_max_ms: 60_000,
            },
            ..EngineConfig::default()
        };
        let handle = start(config).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = handle.snapshot();
            if snapshot.health == HealthState::Degraded && snapshot.stats.ticks_processed >= 20 {
                assert!(snapshot
                    .diagnostics
                    .iter()
                    .any(|f| matches!(f, Fault::BridgeDisconnected { .. })));
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "engine never degraded onto the simulated feed"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_control_commands_accepted() {
        let handle = start(EngineConfig::default()).unwrap();
        handle.control(ControlCommand::Stop).await.unwrap();
        handle.control(ControlCommand::FlattenAll).await.unwrap();
        handle.control(ControlCommand::Start).await.unwrap();
    }

    fn entry_signal() -> Signal {
        Signal {
            instrument: "EURUSD".to_string(),
            kind: SignalKind::Absorption,
            side: Side::Buy,
            strength: dec!(1.1),
            sequence: 42,
            timestamp: chrono::Utc::now(),
            window: WindowSnapshot {
                instrument: "EURUSD".to_string(),
                buy_volume: dec!(90),
                sell_volume: dec!(10),
                imbalance_ratio: dec!(0.9),
                tick_count: 100,
                ticks_since_flip: 30,
                last_price: dec!(1.1000),
                high: dec!(1.1010),
                low: dec!(1.0990),
                heat: vec![],
            },
        }
    }

    /// Drive a decision core into a timed-out order and return the
    /// gateway-side handle the terminal would know it by.
    async fn timed_out_order(decision: &Arc<Mutex<DecisionCore>>) -> OrderHandle {
        let snapshot = AccountSnapshot::initial(dec!(10000));
        let mut core = decision.lock().await;
        let Verdict::Submit { intent, side } = core.on_signal(&entry_signal(), &snapshot) else {
            panic!("expected an entry submit");
        };
        // The gateway assigns its own order id; the terminal never sees
        // the intent id.
        let handle = OrderHandle::from_intent(&intent, side);
        core.order_routed("EURUSD", handle.id);
        core.on_execution(&ExecutionEvent::TimedOut(handle.clone()));
        assert!(core.reconciling_instruments().contains(&"EURUSD".to_string()));
        handle
    }

    async fn resync(decision: &Arc<Mutex<DecisionCore>>, state: ResyncState) {
        let (agg_tx, _agg_rx) = mpsc::channel(16);
        let (tx, rx) = mpsc::channel(1);
        tx.send(state).await.unwrap();
        drop(tx);
        apply_resyncs(rx, decision.clone(), agg_tx).await;
    }

    /// An order the terminal still reports as working must stay blocked
    /// through a resync, not be guessed Filled or Cancelled.
    #[tokio::test]
    async fn test_resync_keeps_working_order_blocked() {
        let decision = Arc::new(Mutex::new(DecisionCore::new(RiskConfig::default())));
        let handle = timed_out_order(&decision).await;

        // The terminal echoes the order under its gateway id with no
        // knowledge of the local intent id.
        let mut at_terminal = handle.clone();
        at_terminal.intent_id = Uuid::new_v4();
        resync(
            &decision,
            ResyncState {
                positions: vec![],
                pending_orders: vec![at_terminal],
            },
        )
        .await;

        let core = decision.lock().await;
        assert!(
            core.reconciling_instruments().contains(&"EURUSD".to_string()),
            "order still working at the terminal must stay blocked"
        );
        assert_eq!(core.state("EURUSD"), TradeState::PendingEntry);
    }

    #[tokio::test]
    async fn test_resync_resolves_vanished_order_from_positions() {
        let decision = Arc::new(Mutex::new(DecisionCore::new(RiskConfig::default())));
        let handle = timed_out_order(&decision).await;

        // The order is gone from the terminal's book but a position
        // exists: it filled while we were disconnected.
        resync(
            &decision,
            ResyncState {
                positions: vec![Position {
                    instrument: "EURUSD".to_string(),
                    side: handle.side,
                    size: handle.size,
                    avg_entry_price: dec!(1.1000),
                    unrealized_pnl: rust_decimal::Decimal::ZERO,
                    opened_at: chrono::Utc::now(),
                }],
                pending_orders: vec![],
            },
        )
        .await;

        let core = decision.lock().await;
        assert!(core.reconciling_instruments().is_empty());
        assert_eq!(core.state("EURUSD"), TradeState::InPosition);
    }

    /// Same seed and config through the whole feed/adapter/analyzer path
    /// must emit identical signals.
    #[tokio::test]
    async fn test_pipeline_determinism() {
        async fn collect(seed: u64) -> Vec<Signal> {
            let instruments = vec!["EURUSD".to_string()];
            let mut feed = SimulatedFeed::with_tick_interval(&instruments, seed, 0);
            let mut adapter = FeedAdapter::new(instruments.clone());
            let mut analyzer = TapeAnalyzer::new(TapeConfig::default());
            let mut signals = Vec::new();
            for _ in 0..5000 {
                let raw = feed.next_tick().await.unwrap();
                if let Ok(tick) = adapter.ingest(raw) {
                    signals.extend(analyzer.on_tick(&tick));
                }
            }
            signals
        }

        let first = collect(9).await;
        let second = collect(9).await;
        assert_eq!(first, second);
    }
}
