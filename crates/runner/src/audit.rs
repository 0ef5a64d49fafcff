//! Write-behind audit trail
//!
//! Decisions never wait on persistence. Records go into a bounded queue and
//! a single writer task drains it into the [`AuditSink`], retrying a failing
//! write a bounded number of times.
//!
//! ```text
//! pipeline tasks ──try_send──► [ bounded queue ] ──► writer ──append──► AuditSink
//!                  full: dropped++                     │ retry, backoff
//!                                                      └─ exhausted: lost++
//! ```

use crate::config::AuditConfig;
use meridian_core::AuditRecord;
use meridian_ports::AuditSink;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Audit trail counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Records the sink accepted
    pub written: u64,
    /// Records refused because the queue was full
    pub dropped: u64,
    /// Records given up on after exhausting retries
    pub lost: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
}

/// Producer handle, cheap to clone into every pipeline task
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::Sender<AuditRecord>,
    counters: Arc<Counters>,
}

/// Owns the writer task; `finish` flushes what is queued
pub struct AuditWriter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl AuditTrail {
    /// Start the writer task
    pub fn spawn(sink: Arc<dyn AuditSink>, config: AuditConfig) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_writer(sink, config, rx, stop_rx, counters.clone()));
        (
            Self {
                tx,
                counters: counters.clone(),
            },
            AuditWriter {
                stop: stop_tx,
                handle,
                counters,
            },
        )
    }

    /// Queue a record without waiting
    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(record) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let record = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            log::warn!("[AUDIT] Queue unavailable, dropped {} record", record.kind());
        }
    }

    pub fn stats(&self) -> AuditStats {
        self.counters.snapshot()
    }
}

impl Counters {
    fn snapshot(&self) -> AuditStats {
        AuditStats {
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

impl AuditWriter {
    /// Stop accepting records and write everything already queued
    pub async fn finish(self) -> AuditStats {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            log::error!("[AUDIT] Writer task failed: {}", e);
        }
        self.counters.snapshot()
    }
}

async fn run_writer(
    sink: Arc<dyn AuditSink>,
    config: AuditConfig,
    mut rx: mpsc::Receiver<AuditRecord>,
    mut stop: oneshot::Receiver<()>,
    counters: Arc<Counters>,
) {
    log::debug!("[AUDIT] Writer started");
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => write(&*sink, &config, &record, &counters).await,
                None => break,
            },
            _ = &mut stop => {
                rx.close();
                while let Some(record) = rx.recv().await {
                    write(&*sink, &config, &record, &counters).await;
                }
                break;
            }
        }
    }
    log::debug!("[AUDIT] Writer stopped");
}

async fn write(
    sink: &dyn AuditSink,
    config: &AuditConfig,
    record: &AuditRecord,
    counters: &Counters,
) {
    let mut attempt = 0u32;
    loop {
        match sink.append(record).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if attempt < config.max_retries => {
                attempt += 1;
                log::warn!(
                    "[AUDIT] Write of {} failed (attempt {}): {}",
                    record.kind(),
                    attempt,
                    e
                );
                tokio::time::sleep(config.retry_backoff() * attempt).await;
            }
            Err(e) => {
                counters.lost.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "[AUDIT] Giving up on {} record after {} retries: {}",
                    record.kind(),
                    attempt,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::{CircuitCause, CircuitState, CircuitTransition};
    use meridian_gateway::MemoryAuditSink;

    fn record() -> AuditRecord {
        AuditRecord::CircuitTransition(CircuitTransition {
            from: CircuitState::Normal,
            to: CircuitState::Halted,
            cause: CircuitCause::OperatorHalt {
                operator: "ops".to_string(),
                note: "test".to_string(),
            },
            at: Utc::now(),
        })
    }

    fn config(buffer_capacity: usize) -> AuditConfig {
        AuditConfig {
            buffer_capacity,
            max_retries: 2,
            retry_backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_finish_flushes_queue() {
        let sink = Arc::new(MemoryAuditSink::new());
        let (trail, writer) = AuditTrail::spawn(sink.clone(), config(16));

        for _ in 0..5 {
            trail.record(record());
        }
        writer.finish().await;

        assert_eq!(sink.len(), 5);
        assert_eq!(trail.stats().written, 5);
        assert_eq!(trail.stats().dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_never_blocks_producer() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_available(false);
        let (trail, writer) = AuditTrail::spawn(sink.clone(), config(2));

        // Returns immediately even though nothing can be written
        for _ in 0..10 {
            trail.record(record());
        }
        let stats = trail.stats();
        assert!(stats.dropped >= 7, "dropped {}", stats.dropped);

        writer.finish().await;
        let stats = trail.stats();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.written + stats.dropped + stats.lost, 10);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_sink_receives_retried_record() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_available(false);
        let (trail, writer) = AuditTrail::spawn(sink.clone(), config(16));

        trail.record(record());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sink.set_available(true);

        writer.finish().await;
        assert_eq!(sink.len(), 1);
        assert_eq!(trail.stats().lost, 0);
    }
}
