//! Pipeline Integration Test
//!
//! Drives the running decision core through its observation bus:
//! 1. Agreeing observations become an approved, executed position
//! 2. A price bar through the stop closes the position
//! 3. Operator halt and authenticated reset gate approvals
//! 4. An audit store outage never blocks a decision
//! 5. A failing data-source feed degrades the circuit

use meridian_clock::{Clock, ManualClock};
use meridian_core::{
    AuditRecord, CircuitCause, CircuitState, ObservationMetadata, Position, PriceBar, ReasonCode,
    RiskDecision, Signal, SignalStatus, SourceCategory,
};
use meridian_gateway::{
    ChannelSubscriber, MemoryAuditSink, ObservationBus, ObservationMessage, PaperBroker,
    PaperBrokerConfig, RecordingAlertSink, Subscriber,
};
use meridian_order_manager::CoreEvent;
use meridian_risk_manager::{BreakerError, OperatorCredential};
use meridian_runner::{CoreConfig, DecisionCore, PipelineError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    clock: Arc<ManualClock>,
    audit: Arc<MemoryAuditSink>,
    alerts: Arc<RecordingAlertSink>,
    core: DecisionCore,
    bus: ObservationBus,
    events: ChannelSubscriber<CoreEvent>,
}

fn config() -> CoreConfig {
    let mut config = CoreConfig::default();
    // Housekeeping only runs when a test asks for it
    config.pipeline.tick_interval_ms = 3_600_000;
    config.audit.retry_backoff_ms = 10;
    config.paper_broker = PaperBrokerConfig {
        slippage_bps: Decimal::ZERO,
        ..Default::default()
    };
    config
}

fn harness(config: CoreConfig) -> Harness {
    let clock = ManualClock::starting_now();
    let broker = Arc::new(PaperBroker::new(config.paper_broker.clone(), clock.clone()));
    let audit = Arc::new(MemoryAuditSink::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let core = DecisionCore::start(config, broker, audit.clone(), alerts.clone(), clock.clone());
    let bus = core.bus();
    let events = core.subscribe();
    Harness {
        clock,
        audit,
        alerts,
        core,
        bus,
        events,
    }
}

async fn price(h: &Harness, instrument: &str, close: Decimal) {
    let now = h.clock.now();
    let msg = ObservationMessage::new(instrument, SourceCategory::Price, Decimal::ZERO, now)
        .with_metadata(ObservationMetadata::Price(PriceBar::flat(close)));
    h.bus.submit(msg).await.unwrap();
}

/// Options flow, news and social all bullish
async fn bullish_confluence(h: &Harness, instrument: &str) {
    for (category, score) in [
        (SourceCategory::OptionsFlow, dec!(0.6)),
        (SourceCategory::News, dec!(0.5)),
        (SourceCategory::Social, dec!(0.4)),
    ] {
        let msg = ObservationMessage::new(instrument, category, score, h.clock.now());
        h.bus.submit(msg).await.unwrap();
    }
}

async fn wait_for<T, F>(events: &mut ChannelSubscriber<CoreEvent>, mut pick: F) -> T
where
    F: FnMut(CoreEvent) -> Option<T>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.next().await.expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn emitted(events: &mut ChannelSubscriber<CoreEvent>) -> Signal {
    wait_for(events, |e| match e {
        CoreEvent::SignalEmitted(signal) => Some(signal),
        _ => None,
    })
    .await
}

async fn decided(events: &mut ChannelSubscriber<CoreEvent>) -> RiskDecision {
    wait_for(events, |e| match e {
        CoreEvent::Decision(decision) => Some(decision),
        _ => None,
    })
    .await
}

async fn opened(events: &mut ChannelSubscriber<CoreEvent>) -> Position {
    wait_for(events, |e| match e {
        CoreEvent::PositionOpened(position) => Some(position),
        _ => None,
    })
    .await
}

async fn closed(events: &mut ChannelSubscriber<CoreEvent>) -> Position {
    wait_for(events, |e| match e {
        CoreEvent::PositionClosed(position) => Some(position),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn test_confluence_becomes_position() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    price(&h, "XYZ", dec!(100)).await;
    bullish_confluence(&h, "XYZ").await;

    let signal = emitted(&mut h.events).await;
    assert_eq!(signal.confidence, dec!(0.625));
    assert_eq!(signal.categories.len(), 3);

    let decision = decided(&mut h.events).await;
    // 2% of 100k over a 2.5 fallback volatility is 800 units, capped at 25k notional
    assert!(decision.is_approved());
    assert_eq!(decision.reason, ReasonCode::ResizedToInstrumentCap);
    assert_eq!(decision.size, dec!(250));
    assert_eq!(decision.stop_loss, Some(dec!(95)));

    let position = opened(&mut h.events).await;
    assert_eq!(position.signal_id, signal.id);
    assert_eq!(position.size, dec!(250));
    assert_eq!(h.core.portfolio().open_notional, dec!(25000));
    assert_eq!(h.core.portfolio().reserved_notional, Decimal::ZERO);
    assert_eq!(
        h.core.signal(&signal.id).map(|s| s.status),
        Some(SignalStatus::Approved)
    );

    let report = h.core.shutdown().await;
    assert_eq!(report.portfolio.open_positions, 1);
    assert_eq!(report.audit.lost, 0);

    let kinds: Vec<&str> = h.audit.records().iter().map(AuditRecord::kind).collect();
    for kind in [
        "signal_generated",
        "risk_decision",
        "signal_status_changed",
        "position_opened",
    ] {
        assert!(kinds.contains(&kind), "missing {} in {:?}", kind, kinds);
    }
}

#[tokio::test]
async fn test_stop_hit_closes_position() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    price(&h, "XYZ", dec!(100)).await;
    bullish_confluence(&h, "XYZ").await;
    let position = opened(&mut h.events).await;

    // Below the 95 stop
    price(&h, "XYZ", dec!(90)).await;
    let triggered = wait_for(&mut h.events, |e| match e {
        CoreEvent::StopTriggered { position_id, price } => Some((position_id, price)),
        _ => None,
    })
    .await;
    assert_eq!(triggered, (position.id, dec!(90)));

    let exited = closed(&mut h.events).await;
    assert_eq!(exited.id, position.id);
    assert_eq!(exited.exit_price, Some(dec!(90)));
    assert_eq!(exited.realized_pnl, Some(dec!(-2500)));
    assert!(h.core.open_positions().is_empty());

    let report = h.core.shutdown().await;
    assert_eq!(report.performance.trades, 1);
    assert_eq!(report.performance.losses, 1);
    assert_eq!(report.portfolio.realized_pnl, dec!(-2500));
    assert_eq!(report.portfolio.open_notional, Decimal::ZERO);
}

#[tokio::test]
async fn test_halt_and_authenticated_reset() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    let status = h.core.halt("ops", "maintenance").await;
    assert_eq!(status.state, CircuitState::Halted);

    price(&h, "XYZ", dec!(100)).await;
    bullish_confluence(&h, "XYZ").await;
    let decision = decided(&mut h.events).await;
    assert!(!decision.is_approved());
    assert_eq!(decision.reason, ReasonCode::CircuitHalted);
    assert_eq!(h.core.portfolio().reserved_notional, Decimal::ZERO);

    let refused = h
        .core
        .reset(&OperatorCredential::new("mallory", "guess"))
        .await;
    assert!(matches!(
        refused,
        Err(PipelineError::Breaker(BreakerError::Unauthorized { .. }))
    ));
    assert_eq!(h.core.circuit().state, CircuitState::Halted);

    let transition = h
        .core
        .reset(&OperatorCredential::new("ops", "change-me"))
        .await
        .unwrap();
    assert_eq!(transition.from, CircuitState::Halted);
    assert_eq!(transition.to, CircuitState::Normal);
    assert_eq!(h.core.circuit().state, CircuitState::Normal);

    // Both transitions were alerted
    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 2);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_audit_outage_never_blocks_decisions() {
    let _ = env_logger::try_init();
    let mut config = config();
    config.audit.max_retries = 500;
    let mut h = harness(config);
    h.audit.set_available(false);

    price(&h, "XYZ", dec!(100)).await;
    bullish_confluence(&h, "XYZ").await;
    opened(&mut h.events).await;
    assert!(h.audit.is_empty());

    // The store comes back before the writer gives up
    h.audit.set_available(true);
    let report = h.core.shutdown().await;

    assert_eq!(report.audit.dropped, 0);
    assert_eq!(report.audit.lost, 0);
    assert!(report.audit.written >= 4);
    assert_eq!(h.audit.len() as u64, report.audit.written);
}

#[tokio::test]
async fn test_instruments_decided_independently() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    for instrument in ["AAA", "BBB", "CCC"] {
        price(&h, instrument, dec!(50)).await;
    }
    for instrument in ["AAA", "BBB", "CCC"] {
        bullish_confluence(&h, instrument).await;
    }

    let mut opened_on = Vec::new();
    let mut rejected = Vec::new();
    while opened_on.len() < 2 || rejected.is_empty() {
        let event = wait_for(&mut h.events, |e| {
            let wanted = match &e {
                CoreEvent::PositionOpened(_) => true,
                CoreEvent::Decision(d) => !d.is_approved(),
                _ => false,
            };
            wanted.then_some(e)
        })
        .await;
        match event {
            CoreEvent::PositionOpened(position) => opened_on.push(position.instrument_id),
            CoreEvent::Decision(decision) => rejected.push(decision),
            _ => unreachable!(),
        }
    }

    // 25k each against a 50k ceiling: whichever comes third is refused
    assert_eq!(opened_on.len(), 2);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].reason, ReasonCode::InsufficientHeadroom);
    assert!(!opened_on.contains(&rejected[0].instrument_id));

    let report = h.core.shutdown().await;
    assert_eq!(report.portfolio.open_positions, 2);
    assert!(report.portfolio.open_notional <= dec!(50000));
}

#[tokio::test]
async fn test_housekeeping_degrades_on_stale_data() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    price(&h, "XYZ", dec!(100)).await;
    bullish_confluence(&h, "XYZ").await;
    opened(&mut h.events).await;

    // Nothing arrives for longer than the surveillance staleness limit
    h.clock.advance(chrono::Duration::minutes(31));
    h.core.tick_now().await;

    let transition = wait_for(&mut h.events, |e| match e {
        CoreEvent::Circuit(transition) => Some(transition),
        _ => None,
    })
    .await;
    assert_eq!(transition.from, CircuitState::Normal);
    assert_eq!(transition.to, CircuitState::Degraded);
    assert_eq!(h.core.circuit().state, CircuitState::Degraded);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_failing_source_feed_degrades_circuit() {
    let _ = env_logger::try_init();
    let mut h = harness(config());

    // Healthy feed: no transition
    for _ in 0..5 {
        h.core.record_source_outcome("news-feed", true);
    }
    h.core.tick_now().await;
    assert_eq!(h.core.circuit().state, CircuitState::Normal);

    for _ in 0..20 {
        h.core.record_source_outcome("news-feed", false);
    }
    h.core.tick_now().await;

    let transition = wait_for(&mut h.events, |e| match e {
        CoreEvent::Circuit(transition) => Some(transition),
        _ => None,
    })
    .await;
    assert_eq!(transition.from, CircuitState::Normal);
    assert_eq!(transition.to, CircuitState::Degraded);
    match transition.cause {
        CircuitCause::ApiErrorRate { source, error_rate } => {
            assert_eq!(source, "news-feed");
            assert_eq!(error_rate, Decimal::ONE);
        }
        other => panic!("expected ApiErrorRate, got {:?}", other),
    }
    assert_eq!(h.alerts.alerts().len(), 1);

    h.core.shutdown().await;
}
