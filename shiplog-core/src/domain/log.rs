//! Log domain types

use serde::{Deserialize, Serialize};

/// Most events one PutLogEvents call accepts
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Byte budget of one PutLogEvents call, counted as UTF-8 message bytes plus
/// [`EVENT_OVERHEAD_BYTES`] per event
pub const MAX_BATCH_BYTES: usize = 1_048_576;

pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Largest message a single event may carry (256 KiB including overhead)
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024 - EVENT_OVERHEAD_BYTES;

/// A single line captured from the workload's output
///
/// Serialized exactly as CloudWatch Logs expects an input log event:
/// `{"timestamp": <epoch millis>, "message": "<raw line>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    timestamp: i64,
    message: String,
}

impl LogEvent {
    /// Creates an event with an explicit timestamp (milliseconds since epoch)
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }

    /// Creates an event stamped with the current wall-clock time
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), message)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Bytes this event counts against [`MAX_BATCH_BYTES`]
    pub fn size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }
}

/// An ordered, non-empty group of events delivered in one remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LogBatch {
    events: Vec<LogEvent>,
}

impl LogBatch {
    /// Wraps drained events into a batch
    ///
    /// Returns `None` when `events` is empty; an empty batch is never sent.
    pub fn new(events: Vec<LogEvent>) -> Option<Self> {
        if events.is_empty() {
            None
        } else {
            Some(Self { events })
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always `false`; present for API symmetry with collections
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Iterates the messages in delivery order
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(LogEvent::message)
    }

    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }

    /// Groups `events` into as few batches as fit one PutLogEvents call each
    ///
    /// Order is preserved across and within batches.
    pub fn split(events: Vec<LogEvent>) -> Vec<LogBatch> {
        Self::split_with_limits(events, MAX_BATCH_EVENTS, MAX_BATCH_BYTES)
    }

    fn split_with_limits(events: Vec<LogEvent>, max_events: usize, max_bytes: usize) -> Vec<Self> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut bytes = 0;

        for event in events {
            let size = event.size();
            if !current.is_empty() && (current.len() >= max_events || bytes + size > max_bytes) {
                batches.push(Self {
                    events: std::mem::take(&mut current),
                });
                bytes = 0;
            }
            bytes += size;
            current.push(event);
        }

        if !current.is_empty() {
            batches.push(Self { events: current });
        }
        batches
    }
}

/// Cuts `message` into pieces of at most `limit` bytes, on char boundaries
///
/// An empty message yields one empty piece.
pub fn split_message(message: &str, limit: usize) -> Vec<&str> {
    // Room for at least one char of any width
    let limit = limit.max(4);
    let mut pieces = Vec::new();
    let mut rest = message;

    while rest.len() > limit {
        let mut end = limit;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}
