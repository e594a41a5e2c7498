//! Log sink abstraction
//!
//! The runner's flusher only needs two things from the remote side: make sure
//! the destination exists, and make one best-effort attempt to deliver a
//! batch. [`LogSink`] captures exactly that so the pipeline can be tested
//! against an in-memory sink.

use async_trait::async_trait;
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::LogBatch;
use tracing::{debug, warn};

use crate::CloudWatchLogsClient;
use crate::error::{ClientError, Result};

/// Outcome of a single best-effort delivery attempt
///
/// Delivery never fails with an `Err`: a batch is either delivered or
/// dropped, and the caller decides how loudly to report a drop.
#[derive(Debug)]
#[must_use]
pub enum DeliveryReport {
    /// The service accepted the batch
    Delivered { events: usize },
    /// The attempt failed and the batch was discarded
    Dropped { events: usize, error: ClientError },
}

impl DeliveryReport {
    pub fn events(&self) -> usize {
        match self {
            Self::Delivered { events } | Self::Dropped { events, .. } => *events,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Remote destination for log batches
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Creates the destination group and stream if they do not exist yet
    ///
    /// Existing resources are not an error; calling this twice is harmless.
    async fn ensure_destination(&self, destination: &Destination) -> Result<()>;

    /// Makes exactly one attempt to deliver `batch`
    async fn send(&self, destination: &Destination, batch: LogBatch) -> DeliveryReport;
}

#[async_trait]
impl LogSink for CloudWatchLogsClient {
    async fn ensure_destination(&self, destination: &Destination) -> Result<()> {
        self.create_destination(destination).await
    }

    async fn send(&self, destination: &Destination, batch: LogBatch) -> DeliveryReport {
        let events = batch.len();
        debug!("Sending {} logs to CloudWatch", events);

        match self.put_log_events(destination, &batch).await {
            Ok(response) => {
                if let Some(rejected) = response.rejected_log_events_info {
                    warn!(
                        "CloudWatch rejected part of a batch for {}: {:?}",
                        destination, rejected
                    );
                }
                DeliveryReport::Delivered { events }
            }
            Err(error) => DeliveryReport::Dropped { events, error },
        }
    }
}
