//! Pipeline orchestrator
//!
//! Runs one container and ships its output:
//!
//! ```text
//! STARTING  ensure destination, spawn flusher (stop here if already shut down)
//! RUNNING   start container, spawn reader, wait for exit or shutdown
//! STOPPING  kill on shutdown, join reader, finish flusher
//! STOPPED   remove the container (skipped after a shutdown)
//! ```
//!
//! The reader and the flusher are tasks owned by [`Pipeline::run`]; both are
//! always joined before it returns.

use futures::StreamExt;
use shiplog_client::LogSink;
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::{LogEvent, MAX_MESSAGE_BYTES, split_message};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::container::{ContainerHandle, ContainerOutput, ContainerRuntime};
use crate::error::PipelineError;
use crate::service::{BatchFlusher, BoundedLogQueue};

/// What to run and where to ship it
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub image: String,
    pub command: String,
    pub destination: Destination,
    pub queue_capacity: usize,
    pub flush_interval: Duration,
    /// Upper bound on waiting for the reader after a shutdown request
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// How the workload ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The container exited on its own with this status
    Exited { status: i64 },
    /// A shutdown request stopped the container
    Interrupted,
}

pub struct Pipeline {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn LogSink>,
    settings: PipelineSettings,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn LogSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            runtime,
            sink,
            settings,
            state: PipelineState::Starting,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs the workload to completion or until `shutdown` is cancelled
    ///
    /// A token cancelled before launch means no container is started; one
    /// cancelled while the container is being started kills it as soon as it
    /// is up. The shutdown sequence runs at most once.
    pub async fn run(
        &mut self,
        shutdown: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let runtime = Arc::clone(&self.runtime);
        let destination = self.settings.destination.clone();

        self.transition(PipelineState::Starting);
        self.sink
            .ensure_destination(&destination)
            .await
            .map_err(|source| PipelineError::DestinationSetup {
                destination: destination.clone(),
                source,
            })?;
        info!("Destination {} ready", destination);

        if shutdown.is_cancelled() {
            info!("Shutdown requested before launch; not starting the container");
            self.transition(PipelineState::Stopped);
            return Ok(PipelineOutcome::Interrupted);
        }

        let queue = Arc::new(BoundedLogQueue::new(self.settings.queue_capacity));
        let flusher = BatchFlusher::new(
            Arc::clone(&queue),
            Arc::clone(&self.sink),
            destination,
            self.settings.flush_interval,
        )
        .spawn();

        let (handle, output) = match runtime
            .run(&self.settings.image, &self.settings.command)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                flusher.finish().await;
                self.transition(PipelineState::Stopped);
                return Err(PipelineError::Launch(e));
            }
        };
        info!("Container {} started", handle);

        self.transition(PipelineState::Running);
        let reader = spawn_reader(output, Arc::clone(&queue));

        info!("Waiting for container to finish...");
        let exit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            status = runtime.wait(&handle) => Some(status),
        };

        self.transition(PipelineState::Stopping);
        let result = match exit {
            Some(Ok(status)) => {
                info!("Container {} exited with status {}", handle, status);
                Ok(PipelineOutcome::Exited { status })
            }
            Some(Err(e)) => {
                runtime.kill(&handle).await;
                Err(PipelineError::Runtime(e))
            }
            None => {
                info!("Shutting down...");
                runtime.kill(&handle).await;
                Ok(PipelineOutcome::Interrupted)
            }
        };

        // After a natural exit the stream is finite and must be read to the
        // end; otherwise the reader gets a bounded grace period
        let exited = matches!(result, Ok(PipelineOutcome::Exited { .. }));
        let grace = (!exited).then_some(self.settings.shutdown_timeout);
        match join_reader(reader, grace).await {
            Some(lines) => info!("Log reader finished after {} line(s)", lines),
            None => warn!("Log reader did not finish; lines still in flight were lost"),
        }

        let stats = flusher.finish().await;
        if stats.events_dropped > 0 {
            warn!(
                "{} log event(s) in {} batch(es) could not be delivered",
                stats.events_dropped, stats.batches_dropped
            );
        }
        self.transition(PipelineState::Stopped);

        if exited {
            remove_container(runtime.as_ref(), &handle).await;
        } else {
            info!("Skipping removal of container {}", handle);
        }

        result
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            info!("Pipeline state: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }
}

/// Reads container output into the queue until the stream ends
///
/// Empty lines are skipped, since CloudWatch rejects empty messages. A line
/// whose decoded text is over the per-event limit becomes several events
/// sharing one timestamp. Returns the number of lines read.
fn spawn_reader(mut output: ContainerOutput, queue: Arc<BoundedLogQueue>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut lines = 0;
        while let Some(chunk) = output.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read container output: {}", e);
                    continue;
                }
            };
            lines += 1;

            let text = String::from_utf8_lossy(&bytes);
            if text.is_empty() {
                debug!("Skipping empty line");
                continue;
            }

            let mut timestamp = None;
            for piece in split_message(&text, MAX_MESSAGE_BYTES) {
                let event = match timestamp {
                    Some(timestamp) => LogEvent::new(timestamp, piece),
                    None => LogEvent::now(piece),
                };
                timestamp = Some(event.timestamp());
                queue.enqueue(event).await;
            }
        }
        lines
    })
}

/// Joins the reader, aborting it if `grace` elapses first
async fn join_reader(reader: JoinHandle<usize>, grace: Option<Duration>) -> Option<usize> {
    let abort = reader.abort_handle();

    let joined = match grace {
        None => reader.await,
        Some(limit) => match time::timeout(limit, reader).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return None;
            }
        },
    };

    match joined {
        Ok(lines) => Some(lines),
        Err(e) => {
            warn!("Log reader task failed: {}", e);
            None
        }
    }
}

async fn remove_container(runtime: &dyn ContainerRuntime, handle: &ContainerHandle) {
    if let Err(e) = runtime.remove(handle).await {
        warn!("Failed to remove container {}: {:#}", handle, e);
    }
}
