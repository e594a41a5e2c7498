//! Event delivery

use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsOutput;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::LogBatch;

use crate::CloudWatchLogsClient;
use crate::error::{ClientError, Result};

/// Response of a PutLogEvents call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutLogEventsResponse {
    pub rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

/// Index ranges of events the service accepted the call for but discarded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectedLogEventsInfo {
    pub too_new_log_event_start_index: Option<i32>,
    pub too_old_log_event_end_index: Option<i32>,
    pub expired_log_event_end_index: Option<i32>,
}

impl From<&PutLogEventsOutput> for PutLogEventsResponse {
    fn from(output: &PutLogEventsOutput) -> Self {
        Self {
            rejected_log_events_info: output.rejected_log_events_info().map(|info| {
                RejectedLogEventsInfo {
                    too_new_log_event_start_index: info.too_new_log_event_start_index(),
                    too_old_log_event_end_index: info.too_old_log_event_end_index(),
                    expired_log_event_end_index: info.expired_log_event_end_index(),
                }
            }),
        }
    }
}

impl CloudWatchLogsClient {
    // =============================================================================
    // Event Delivery
    // =============================================================================

    /// Put one batch of events into the destination stream
    ///
    /// Events are sent exactly as produced, in order. This is a single
    /// attempt; nothing is retried here.
    pub async fn put_log_events(
        &self,
        destination: &Destination,
        batch: &LogBatch,
    ) -> Result<PutLogEventsResponse> {
        let events = batch
            .events()
            .iter()
            .map(|event| {
                InputLogEvent::builder()
                    .timestamp(event.timestamp())
                    .message(event.message())
                    .build()
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        let output = self
            .inner
            .put_log_events()
            .log_group_name(&destination.group)
            .log_stream_name(&destination.stream)
            .set_log_events(Some(events))
            .send()
            .await
            .map_err(ClientError::from_sdk)?;

        Ok(PutLogEventsResponse::from(&output))
    }
}
