//! Integration test: source collaborators -> Observation Bus -> reader
//!
//! Many writers publish concurrently into a small bounded bus; the reader
//! must see every record exactly as delivered, and writers must wait for
//! capacity rather than lose records.

use chrono::Duration;
use meridian_clock::{Clock, ManualClock};
use meridian_core::SourceCategory;
use meridian_gateway::{ObservationBus, ObservationMessage, Subscriber, TransportError};
use rust_decimal::Decimal;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_writers_bounded_bus() {
    let _ = env_logger::try_init();

    let clock = ManualClock::starting_now();
    let start = clock.now();
    let (bus, mut stream) = ObservationBus::channel(4, clock.clone());

    let categories = [
        SourceCategory::OptionsFlow,
        SourceCategory::News,
        SourceCategory::Social,
        SourceCategory::Filings,
    ];

    let mut writers = Vec::new();
    for (w, category) in categories.into_iter().enumerate() {
        let bus = bus.clone();
        writers.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..50i64 {
                let msg = ObservationMessage::new(
                    format!("INST-{}", i % 5),
                    category,
                    Decimal::new(i % 10, 1),
                    start + Duration::milliseconds(i * 10 + w as i64),
                );
                ids.push(bus.submit(msg).await.expect("bus open"));
            }
            ids
        }));
    }
    drop(bus);

    let mut received = HashSet::new();
    loop {
        match stream.next().await {
            Ok(obs) => {
                received.insert(obs.id);
            }
            Err(TransportError::ChannelClosed) => break,
        }
    }

    let mut published = HashSet::new();
    for writer in writers {
        published.extend(writer.await.unwrap());
    }

    assert_eq!(published.len(), 200);
    assert_eq!(received, published);
}

#[tokio::test]
async fn test_redelivery_keeps_identity() {
    let clock = ManualClock::starting_now();
    let (bus, mut stream) = ObservationBus::channel(8, clock.clone());

    let msg = ObservationMessage::new(
        "XYZ",
        SourceCategory::OptionsFlow,
        Decimal::new(6, 1),
        clock.now(),
    );
    let first = bus.submit(msg.clone()).await.unwrap();
    clock.advance(Duration::seconds(5));
    let second = bus.submit(msg).await.unwrap();
    assert_eq!(first, second);

    let a = stream.next().await.unwrap();
    let b = stream.next().await.unwrap();
    assert_eq!(a.id, b.id);
    assert!(b.received_at > a.received_at);
}
