//! Decision pipeline
//!
//! Wires the components into concurrent tasks:
//!
//! ```text
//!  ObservationBus ──► router ──┬──► worker(XYZ) ─┐  one task per instrument,
//!                              ├──► worker(ABC) ─┤  sole owner of its window
//!                              │                 │ candidate
//!   price bars ──► ledger ─────┘ stop hit        ▼
//!                    │                     decision task ──► RiskGate ──► ledger reservation
//!                    ▼                           │ approved
//!              dispatch_close                    ▼
//!                                         ExecutionDispatcher ──► Broker
//!
//!  ticker: window expiry, breaker evaluation, registry pruning
//!  relay:  dispatcher events ──► audit trail
//! ```
//!
//! Instruments are processed in parallel; observations of one instrument are
//! applied in arrival order by its worker. A worker that dies is replaced on
//! the next observation for its instrument.

use crate::audit::{AuditStats, AuditTrail, AuditWriter};
use crate::config::CoreConfig;
use crate::error::Result;
use dashmap::DashMap;
use meridian_core::{
    Alert, AuditRecord, CircuitStatus, CircuitTransition, InstrumentId, Observation, Position,
    PositionId, Signal, SignalId, SignalStatus, Timestamp,
};
use meridian_gateway::{
    ChannelPublisher, ChannelSubscriber, ObservationBus, ObservationStream, Publisher, Subscriber,
};
use meridian_order_manager::{
    ConfluenceConfig, ConfluenceOutcome, CoreEvent, ExecutionDispatcher, InstrumentWindow,
    PerformanceSummary, PortfolioState, PositionLedger, RiskGate, SignalRegistry,
    SuppressionReason,
};
use meridian_ports::{AlertSink, AuditSink, Broker, Clock};
use meridian_risk_manager::{CircuitBreaker, DataQualityMonitor, OperatorCredential};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Commands accepted by an instrument worker
#[derive(Debug)]
enum WorkerCommand {
    Observe(Observation),
    /// The signal has been decided; stop tracking its candidate
    Resolve(SignalId),
    Tick(Timestamp),
}

/// State shared by every pipeline task
struct Shared {
    config: CoreConfig,
    confluence: Arc<ConfluenceConfig>,
    clock: Arc<dyn Clock>,
    gate: RiskGate,
    registry: SignalRegistry,
    ledger: Arc<PositionLedger>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<DataQualityMonitor>,
    dispatcher: ExecutionDispatcher,
    events: ChannelPublisher<CoreEvent>,
    audit: AuditTrail,
    alerts: Arc<dyn AlertSink>,
    workers: DashMap<InstrumentId, mpsc::Sender<WorkerCommand>>,
    /// Workers plus decision and close tasks, drained on shutdown
    tasks: Mutex<JoinSet<()>>,
}

/// Final state after a graceful shutdown
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub circuit: CircuitStatus,
    pub portfolio: PortfolioState,
    pub performance: PerformanceSummary,
    pub audit: AuditStats,
}

/// The running decision core
pub struct DecisionCore {
    shared: Arc<Shared>,
    bus: ObservationBus,
    stop: watch::Sender<bool>,
    router: JoinHandle<()>,
    ticker: JoinHandle<()>,
    relay_stop: watch::Sender<bool>,
    relay: JoinHandle<()>,
    audit_writer: AuditWriter,
}

impl DecisionCore {
    /// Build every component from `config` and start the pipeline tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: CoreConfig,
        broker: Arc<dyn Broker>,
        audit_sink: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let (bus, stream) = ObservationBus::channel(config.pipeline.bus_capacity, clock.clone());
        let events: ChannelPublisher<CoreEvent> =
            ChannelPublisher::new(config.pipeline.event_capacity);
        let relay_events = events.subscribe();
        let (audit, audit_writer) = AuditTrail::spawn(audit_sink, config.audit.clone());

        let ledger = Arc::new(PositionLedger::new(config.ledger.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), now));
        let monitor = Arc::new(DataQualityMonitor::new(config.surveillance.clone()));
        let dispatcher = ExecutionDispatcher::new(
            config.dispatch.clone(),
            broker,
            ledger.clone(),
            alerts.clone(),
            clock.clone(),
        )
        .with_monitor(monitor.clone())
        .with_events(events.clone());

        let shared = Arc::new(Shared {
            confluence: Arc::new(config.confluence.clone()),
            gate: RiskGate::new(config.risk.clone()),
            registry: SignalRegistry::new(),
            ledger,
            breaker,
            monitor,
            dispatcher,
            events,
            audit,
            alerts,
            workers: DashMap::new(),
            tasks: Mutex::new(JoinSet::new()),
            clock,
            config,
        });

        let (stop, stop_rx) = watch::channel(false);
        let (relay_stop, relay_stop_rx) = watch::channel(false);
        let router = tokio::spawn(run_router(shared.clone(), stream, stop_rx.clone()));
        let ticker = tokio::spawn(run_ticker(shared.clone(), stop_rx));
        let relay = tokio::spawn(run_relay(shared.clone(), relay_events, relay_stop_rx));

        log::info!(
            "[PIPELINE] Decision core started (bus {}, tick {}ms)",
            shared.config.pipeline.bus_capacity,
            shared.config.pipeline.tick_interval_ms
        );

        Self {
            shared,
            bus,
            stop,
            router,
            ticker,
            relay_stop,
            relay,
            audit_writer,
        }
    }

    /// Writer handle for source collaborators
    pub fn bus(&self) -> ObservationBus {
        self.bus.clone()
    }

    /// Watch everything the core does
    pub fn subscribe(&self) -> ChannelSubscriber<CoreEvent> {
        self.shared.events.subscribe()
    }

    /// Run one housekeeping pass now instead of waiting for the ticker
    pub async fn tick_now(&self) {
        self.shared.housekeeping().await;
    }

    /// Operator halt; no approval is issued once this returns
    pub async fn halt(&self, operator: &str, note: &str) -> CircuitStatus {
        let now = self.shared.clock.now();
        if let Some(transition) = self.shared.breaker.halt(operator, note, now) {
            self.shared.on_transition(transition).await;
        }
        self.shared.breaker.status()
    }

    /// Authenticated HALTED -> NORMAL
    pub async fn reset(&self, credential: &OperatorCredential) -> Result<CircuitTransition> {
        let now = self.shared.clock.now();
        let transition = self.shared.breaker.reset(credential, now)?;
        self.shared.on_transition(transition.clone()).await;
        Ok(transition)
    }

    /// Report one call outcome of a data-source collaborator; a failing feed
    /// raises the API error rate the breaker degrades on
    pub fn record_source_outcome(&self, source: &str, success: bool) {
        self.shared.monitor.record_api_outcome(source, success);
    }

    /// Close an open position at market
    pub async fn close_position(&self, position_id: PositionId) -> Result<Position> {
        Ok(self.shared.dispatcher.dispatch_close(position_id).await?)
    }

    pub fn circuit(&self) -> CircuitStatus {
        self.shared.breaker.status()
    }

    pub fn portfolio(&self) -> PortfolioState {
        self.shared.ledger.snapshot()
    }

    pub fn performance(&self) -> PerformanceSummary {
        self.shared.ledger.performance()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.shared.ledger.open_positions()
    }

    pub fn position_for_signal(&self, signal_id: &SignalId) -> Option<Position> {
        self.shared.ledger.position_for_signal(signal_id)
    }

    /// Latest state of a signal, while it is retained
    pub fn signal(&self, signal_id: &SignalId) -> Option<Signal> {
        self.shared.registry.get(signal_id)
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.shared.audit.stats()
    }

    /// Stop intake, let in-flight work finish and flush the audit trail
    pub async fn shutdown(self) -> ShutdownReport {
        log::info!("[PIPELINE] Shutting down");
        let _ = self.stop.send(true);
        for handle in [self.router, self.ticker] {
            if let Err(e) = handle.await {
                log::error!("[PIPELINE] Task failed during shutdown: {}", e);
            }
        }

        // Workers exit once their queues are empty
        self.shared.workers.clear();
        loop {
            let mut tasks = std::mem::take(&mut *self.shared.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    log::error!("[PIPELINE] Task failed during shutdown: {}", e);
                }
            }
        }

        let _ = self.relay_stop.send(true);
        if let Err(e) = self.relay.await {
            log::error!("[PIPELINE] Event relay failed: {}", e);
        }

        let report = ShutdownReport {
            circuit: self.shared.breaker.status(),
            portfolio: self.shared.ledger.snapshot(),
            performance: self.shared.ledger.performance(),
            audit: AuditStats::default(),
        };
        drop(self.shared);
        let audit = self.audit_writer.finish().await;
        log::info!(
            "[PIPELINE] Stopped (audit written {}, dropped {}, lost {})",
            audit.written,
            audit.dropped,
            audit.lost
        );
        ShutdownReport { audit, ..report }
    }
}

impl Shared {
    fn spawn_task<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().spawn(task);
    }

    async fn publish(&self, event: CoreEvent) {
        let _ = self.events.publish(&event).await;
    }

    async fn alert(&self, alert: Alert) {
        if let Err(e) = self.alerts.notify(&alert).await {
            log::warn!("[PIPELINE] Alert not delivered ({}): {}", alert, e);
        }
    }

    /// Sender for the instrument's worker, spawning one if none is alive
    fn worker(self: &Arc<Self>, instrument_id: &InstrumentId) -> mpsc::Sender<WorkerCommand> {
        self.workers
            .entry(instrument_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.config.pipeline.worker_queue.max(1));
                let window = InstrumentWindow::new(instrument_id.clone(), self.confluence.clone());
                log::debug!("[PIPELINE] Worker started for {}", instrument_id);
                self.spawn_task(run_worker(self.clone(), window, rx));
                tx
            })
            .clone()
    }

    async fn route(self: &Arc<Self>, observation: Observation) {
        let instrument_id = observation.instrument_id.clone();
        let mut command = WorkerCommand::Observe(observation);
        // A dead worker is replaced once; its window state is lost with it
        for _ in 0..2 {
            let sender = self.worker(&instrument_id);
            match sender.send(command).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    log::warn!("[PIPELINE] Worker for {} exited, restarting", instrument_id);
                    self.workers
                        .remove_if(&instrument_id, |_, tx| tx.same_channel(&sender));
                    command = returned;
                }
            }
        }
        log::error!(
            "[PIPELINE] Dropped observation for {}: worker unavailable",
            instrument_id
        );
    }

    /// Surveillance and price marking, then hand-off to the instrument's worker
    async fn ingest(self: &Arc<Self>, observation: Observation) {
        self.monitor
            .record_observation(&observation.instrument_id, observation.received_at);

        if let Some(bar) = observation.metadata.price_bar()
            && let Some(hit) = self.ledger.observe_bar(&observation.instrument_id, bar)
        {
            self.publish(CoreEvent::StopTriggered {
                position_id: hit.id,
                price: bar.close,
            })
            .await;
            let closer = self.clone();
            self.spawn_task(async move { closer.close(hit.id).await });
        }

        self.route(observation).await;
    }

    async fn resolve_in_window(&self, instrument_id: &InstrumentId, signal_id: SignalId) {
        let sender = self.workers.get(instrument_id).map(|tx| tx.clone());
        if let Some(sender) = sender {
            let _ = sender.send(WorkerCommand::Resolve(signal_id)).await;
        }
    }

    async fn on_outcome(
        self: &Arc<Self>,
        instrument_id: &InstrumentId,
        outcome: ConfluenceOutcome,
    ) {
        match outcome {
            ConfluenceOutcome::Emitted(signal) => {
                log::info!(
                    "[PIPELINE] Candidate {} {:?} {} confidence {}",
                    signal.id,
                    signal.direction,
                    signal.instrument_id,
                    signal.confidence
                );
                let signal_id = signal.id;
                self.registry.register(signal.clone());
                self.audit.record(AuditRecord::SignalGenerated(signal.clone()));
                self.publish(CoreEvent::SignalEmitted(signal)).await;

                let shared = self.clone();
                self.spawn_task(async move { shared.decide(signal_id).await });
            }
            ConfluenceOutcome::Strengthened {
                signal_id,
                confidence,
                observations,
                categories,
            } => {
                let now = self.clock.now();
                match self
                    .registry
                    .strengthen(signal_id, confidence, &observations, &categories, now)
                {
                    Ok(_) => {
                        self.publish(CoreEvent::SignalStrengthened {
                            signal_id,
                            confidence,
                        })
                        .await
                    }
                    Err(e) => log::debug!("[PIPELINE] Not strengthening {}: {}", signal_id, e),
                }
            }
            ConfluenceOutcome::Suppressed { reason, expired } => {
                for signal_id in expired {
                    self.expire(signal_id).await;
                }
                if matches!(reason, SuppressionReason::Conflict) {
                    self.publish(CoreEvent::Suppressed {
                        instrument_id: instrument_id.clone(),
                        reason,
                    })
                    .await;
                }
            }
        }
    }

    /// Withdraw an undecided candidate
    async fn expire(&self, signal_id: SignalId) {
        let now = self.clock.now();
        match self.registry.transition(signal_id, SignalStatus::Expired, now) {
            Ok(change) => {
                self.audit.record(AuditRecord::SignalStatusChanged {
                    signal_id,
                    from: change.from,
                    to: change.to,
                    at: change.at,
                });
                self.publish(CoreEvent::SignalExpired { signal_id }).await;
            }
            // Decided first; the decision stands
            Err(e) => log::debug!("[PIPELINE] Not expiring {}: {}", signal_id, e),
        }
    }

    /// Run the risk gate on a candidate and dispatch it if approved
    async fn decide(&self, signal_id: SignalId) {
        let Some(signal) = self.registry.get(&signal_id) else {
            return;
        };
        if signal.status.is_terminal() {
            return;
        }

        let now = self.clock.now();
        let decision = self
            .gate
            .evaluate(&signal, &self.ledger, &self.breaker, now);
        let decision = self
            .gate
            .confirm(&signal, decision, &self.ledger, &self.breaker, now);
        self.audit.record(AuditRecord::RiskDecision(decision.clone()));
        self.publish(CoreEvent::Decision(decision.clone())).await;

        let to = if decision.is_approved() {
            SignalStatus::Approved
        } else {
            SignalStatus::Rejected
        };
        let resolved = self.registry.transition(signal_id, to, now);
        self.resolve_in_window(&signal.instrument_id, signal_id)
            .await;

        match resolved {
            Ok(change) => self.audit.record(AuditRecord::SignalStatusChanged {
                signal_id,
                from: change.from,
                to: change.to,
                at: change.at,
            }),
            Err(e) => {
                // Expired while being decided: nothing may be dispatched for it
                if decision.is_approved() {
                    self.ledger.release(&signal_id);
                }
                log::warn!(
                    "[PIPELINE] Decision for {} discarded: {}",
                    signal_id,
                    e
                );
                return;
            }
        }

        if decision.is_approved() {
            if self.breaker.is_halted() {
                self.ledger.release(&signal_id);
                log::warn!(
                    "[PIPELINE] Signal {} not dispatched: circuit halted",
                    signal_id
                );
                return;
            }
            match self.dispatcher.dispatch_open(&decision).await {
                Ok(position) => log::info!(
                    "[PIPELINE] Signal {} opened position {}",
                    signal_id,
                    position.id
                ),
                Err(e) => log::error!("[PIPELINE] Signal {} not executed: {}", signal_id, e),
            }
        }
    }

    async fn close(&self, position_id: PositionId) {
        match self.dispatcher.dispatch_close(position_id).await {
            Ok(position) => log::info!(
                "[PIPELINE] Position {} closed, realized {:?}",
                position.id,
                position.realized_pnl
            ),
            Err(e) => log::error!("[PIPELINE] Close of {} failed: {}", position_id, e),
        }
    }

    async fn on_transition(&self, transition: CircuitTransition) {
        self.audit
            .record(AuditRecord::CircuitTransition(transition.clone()));
        self.publish(CoreEvent::Circuit(transition.clone())).await;
        self.alert(Alert::CircuitTransition(transition)).await;
    }

    /// Window expiry, breaker evaluation and registry pruning
    async fn housekeeping(&self) {
        let now = self.clock.now();

        let senders: Vec<_> = self.workers.iter().map(|e| e.value().clone()).collect();
        for sender in senders {
            // A busy worker catches up on the next tick
            let _ = sender.try_send(WorkerCommand::Tick(now));
        }

        let drawdown = self.ledger.snapshot().drawdown;
        let inputs = self.monitor.inputs(now, drawdown);
        let evaluation = self.breaker.evaluate(&inputs, now);
        if let Some(drawdown) = evaluation.drawdown_crossed {
            self.alert(Alert::DrawdownThreshold {
                drawdown,
                threshold: self.breaker.config().drawdown_warning,
                at: now,
            })
            .await;
        }
        if let Some(transition) = evaluation.transition {
            self.on_transition(transition).await;
        }

        let pruned = self
            .registry
            .prune_resolved(now, self.config.pipeline.signal_retention());
        if pruned > 0 {
            log::debug!("[PIPELINE] Pruned {} resolved signals", pruned);
        }
        let settled = self
            .dispatcher
            .prune_settled(now - self.config.pipeline.signal_retention());
        if settled > 0 {
            log::debug!("[PIPELINE] Pruned {} settled dispatch keys", settled);
        }

        let mut tasks = self.tasks.lock();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                log::error!("[PIPELINE] Task failed: {}", e);
            }
        }
    }
}

async fn run_router(
    shared: Arc<Shared>,
    mut stream: ObservationStream,
    mut stop: watch::Receiver<bool>,
) {
    log::debug!("[PIPELINE] Router started");
    loop {
        tokio::select! {
            _ = stop.changed() => {
                // Whatever was accepted onto the bus still gets processed
                while let Ok(Some(observation)) = stream.try_next() {
                    shared.ingest(observation).await;
                }
                break;
            }
            next = stream.next() => match next {
                Ok(observation) => shared.ingest(observation).await,
                Err(_) => break,
            },
        }
    }
    log::debug!("[PIPELINE] Router stopped");
}

async fn run_worker(
    shared: Arc<Shared>,
    mut window: InstrumentWindow,
    mut rx: mpsc::Receiver<WorkerCommand>,
) {
    let instrument_id = window.instrument_id().clone();
    while let Some(command) = rx.recv().await {
        match command {
            WorkerCommand::Observe(observation) => {
                let outcome = window.ingest(observation, shared.clock.now());
                shared.on_outcome(&instrument_id, outcome).await;
            }
            WorkerCommand::Resolve(signal_id) => {
                window.resolve(signal_id);
            }
            WorkerCommand::Tick(now) => {
                let outcome = window.tick(now);
                for signal_id in outcome.expired {
                    shared.expire(signal_id).await;
                }
                if outcome.became_stale {
                    shared
                        .publish(CoreEvent::Suppressed {
                            instrument_id: instrument_id.clone(),
                            reason: SuppressionReason::DataStale,
                        })
                        .await;
                }
            }
        }
    }
    log::debug!("[PIPELINE] Worker for {} stopped", instrument_id);
}

async fn run_ticker(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(shared.config.pipeline.tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => shared.housekeeping().await,
        }
    }
}

/// Turns dispatcher events into audit records
async fn run_relay(
    shared: Arc<Shared>,
    mut events: ChannelSubscriber<CoreEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            next = events.next() => match next {
                Ok(event) => relay(&shared, event),
                Err(_) => break,
            },
            _ = stop.changed() => {
                while let Ok(Some(event)) = events.try_next() {
                    relay(&shared, event);
                }
                break;
            }
        }
    }
}

fn relay(shared: &Shared, event: CoreEvent) {
    let record = match event {
        CoreEvent::PositionOpened(position) => AuditRecord::PositionOpened(position),
        CoreEvent::PositionClosed(position) => AuditRecord::PositionClosed(position),
        CoreEvent::DispatchFailed {
            key,
            signal_id,
            attempt,
            reason,
        } => AuditRecord::DispatchFailed {
            key,
            signal_id,
            attempt,
            reason,
            at: shared.clock.now(),
        },
        _ => return,
    };
    shared.audit.record(record);
}
