//! Batch flusher
//!
//! Background task that drains the log queue and ships each drain as one
//! batch, or several when it exceeds the per-call size limits. It wakes on a
//! fixed tick, when the queue fills up, or when it is told to finish. After
//! `finish` it keeps draining until the queue is empty, so nothing enqueued
//! before that point is left behind.
//!
//! Delivery is best-effort: a batch the sink drops is logged and forgotten.

use shiplog_client::{DeliveryReport, LogSink};
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::LogBatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::log_queue::BoundedLogQueue;

/// Delivery counters reported when the flusher exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches_sent: usize,
    pub events_sent: usize,
    pub batches_dropped: usize,
    pub events_dropped: usize,
}

impl FlushStats {
    fn record(&mut self, report: &DeliveryReport) {
        match report {
            DeliveryReport::Delivered { events } => {
                self.batches_sent += 1;
                self.events_sent += events;
            }
            DeliveryReport::Dropped { events, .. } => {
                self.batches_dropped += 1;
                self.events_dropped += events;
            }
        }
    }
}

/// Consumer side of the pipeline
pub struct BatchFlusher {
    queue: Arc<BoundedLogQueue>,
    sink: Arc<dyn LogSink>,
    destination: Destination,
    interval: Duration,
    finished: CancellationToken,
}

impl BatchFlusher {
    pub fn new(
        queue: Arc<BoundedLogQueue>,
        sink: Arc<dyn LogSink>,
        destination: Destination,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            sink,
            destination,
            interval,
            finished: CancellationToken::new(),
        }
    }

    /// Starts the flush loop on its own task
    pub fn spawn(self) -> FlusherHandle {
        let finished = self.finished.clone();
        let task = tokio::spawn(self.run());
        FlusherHandle { finished, task }
    }

    async fn run(self) -> FlushStats {
        info!(
            "Flusher started for {} (interval: {:?}, batch limit: {})",
            self.destination,
            self.interval,
            self.queue.capacity()
        );

        let mut stats = FlushStats::default();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Read before draining: if finish was already requested, this
            // drain is the last one that can find anything
            let finishing = self.finished.is_cancelled();

            let drained = self.queue.drain_all_available();
            if !drained.is_empty() {
                for batch in LogBatch::split(drained) {
                    let report = self.sink.send(&self.destination, batch).await;
                    self.report(&report);
                    stats.record(&report);
                }
                continue;
            }

            if finishing {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.queue.filled() => {}
                _ = self.finished.cancelled() => {}
            }
        }

        info!(
            "Flusher stopped: {} batch(es) / {} event(s) sent, {} batch(es) / {} event(s) dropped",
            stats.batches_sent, stats.events_sent, stats.batches_dropped, stats.events_dropped
        );
        stats
    }

    fn report(&self, report: &DeliveryReport) {
        match report {
            DeliveryReport::Delivered { events } => {
                debug!("Sent {} logs to {}", events, self.destination)
            }
            DeliveryReport::Dropped { events, error } => error!(
                "Failed to send {} logs to {}, dropping them: {}",
                events, self.destination, error
            ),
        }
    }
}

/// Owner's handle on a running flusher
///
/// `finish` consumes the handle, so the finish signal is sent exactly once.
pub struct FlusherHandle {
    finished: CancellationToken,
    task: JoinHandle<FlushStats>,
}

impl FlusherHandle {
    /// Signals that no more events will be enqueued and waits for the final drain
    pub async fn finish(self) -> FlushStats {
        self.finished.cancel();

        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Flusher task failed: {}", e);
                FlushStats::default()
            }
        }
    }
}
