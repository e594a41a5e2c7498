//! Bounded log queue
//!
//! Connects the container output reader (producer) with the batch flusher
//! (consumer). The queue holds at most `capacity` events: a producer that
//! finds it full is suspended until the next drain instead of dropping the
//! event. The flusher takes everything at once with
//! [`BoundedLogQueue::drain_all_available`], so a batch never holds more than
//! `capacity` events.

use shiplog_core::domain::log::LogEvent;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

pub const DEFAULT_CAPACITY: usize = 50;

/// FIFO of log events with blocking enqueue and atomic drain
#[derive(Debug)]
pub struct BoundedLogQueue {
    events: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
    /// Woken by every drain; producers wait on it while the queue is full
    space: Notify,
    /// Woken when an enqueue fills the queue to capacity
    filled: Notify,
}

impl BoundedLogQueue {
    /// Creates an empty queue; a capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            space: Notify::new(),
            filled: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `event`, waiting for a drain while the queue is full
    pub async fn enqueue(&self, mut event: LogEvent) {
        loop {
            // Registered before the check so a drain in between is not missed
            let space = self.space.notified();

            match self.try_enqueue(event) {
                Ok(()) => return,
                Err(rejected) => {
                    event = rejected;
                    space.await;
                }
            }
        }
    }

    /// Appends `event` if there is room, handing it back otherwise
    pub fn try_enqueue(&self, event: LogEvent) -> Result<(), LogEvent> {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            return Err(event);
        }

        events.push_back(event);
        let full = events.len() == self.capacity;
        drop(events);

        if full {
            self.filled.notify_one();
        }
        Ok(())
    }

    /// Removes and returns every queued event, oldest first
    ///
    /// Never waits; returns an empty vector when nothing is queued.
    pub fn drain_all_available(&self) -> Vec<LogEvent> {
        let drained: Vec<LogEvent> = self.lock().drain(..).collect();
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }

    /// Resolves once an enqueue has filled the queue
    ///
    /// A fill that happened while nobody was waiting is remembered, so the
    /// flusher cannot miss it between two waits.
    pub async fn filled(&self) {
        self.filled.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEvent>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BoundedLogQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
