//! In-memory sink and container runtime for pipeline tests

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use shiplog_client::{ClientError, DeliveryReport, LogSink};
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::LogBatch;
use std::collections::HashSet;
use std::io;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::container::{ContainerHandle, ContainerOutput, ContainerRuntime};

/// Records every delivery attempt; selected attempts can be made to fail
#[derive(Default)]
pub struct RecordingSink {
    /// Every attempted batch, with whether it was delivered
    attempts: Mutex<Vec<(Vec<String>, bool)>>,
    failing: HashSet<usize>,
    ensure_calls: Mutex<usize>,
    setup_error: Mutex<Option<ClientError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the attempts with these zero-based indexes fail
    pub fn failing_attempts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(attempts);
        self
    }

    /// Makes the first `ensure_destination` call fail with `error`
    pub fn failing_setup(self, error: ClientError) -> Self {
        *self.setup_error.lock().unwrap() = Some(error);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn ensure_calls(&self) -> usize {
        *self.ensure_calls.lock().unwrap()
    }

    /// Messages of every delivered batch, in delivery order
    pub fn delivered_messages(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, delivered)| *delivered)
            .flat_map(|(messages, _)| messages.iter().cloned())
            .collect()
    }

    /// Sizes of the delivered batches
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, delivered)| *delivered)
            .map(|(messages, _)| messages.len())
            .collect()
    }

    /// Sizes of all attempted batches, delivered or not
    pub fn batch_sizes_attempted(&self) -> Vec<usize> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(messages, _)| messages.len())
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn ensure_destination(&self, _destination: &Destination) -> shiplog_client::Result<()> {
        *self.ensure_calls.lock().unwrap() += 1;
        match self.setup_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(&self, _destination: &Destination, batch: LogBatch) -> DeliveryReport {
        let events = batch.len();
        let messages = batch.messages().map(str::to_string).collect();

        let mut attempts = self.attempts.lock().unwrap();
        let delivered = !self.failing.contains(&attempts.len());
        attempts.push((messages, delivered));

        if delivered {
            DeliveryReport::Delivered { events }
        } else {
            DeliveryReport::Dropped {
                events,
                error: ClientError::api_error(503, "ServiceUnavailableException", "try later"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeCall {
    Run,
    Wait,
    Kill,
    Remove,
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Output ends and `wait` returns this status right away
    Exits(i64),
    /// Output and `wait` stay open until the container is killed
    Runs,
    /// `run` fails
    FailsLaunch,
    /// Output stays open until killed; `wait` fails
    FailsWait,
}

/// Scripted [`ContainerRuntime`]
pub struct FakeRuntime {
    lines: Vec<String>,
    behavior: Behavior,
    ignore_kill: bool,
    on_launch: Option<CancellationToken>,
    killed: CancellationToken,
    calls: Mutex<Vec<RuntimeCall>>,
}

impl FakeRuntime {
    fn with(lines: impl IntoIterator<Item = impl Into<String>>, behavior: Behavior) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            behavior,
            ignore_kill: false,
            on_launch: None,
            killed: CancellationToken::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn exiting(lines: impl IntoIterator<Item = impl Into<String>>, status: i64) -> Self {
        Self::with(lines, Behavior::Exits(status))
    }

    pub fn running(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with(lines, Behavior::Runs)
    }

    pub fn failing_launch() -> Self {
        Self::with(Vec::<String>::new(), Behavior::FailsLaunch)
    }

    pub fn failing_wait(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with(lines, Behavior::FailsWait)
    }

    /// Output keeps the reader blocked even after a kill
    pub fn ignoring_kill(mut self) -> Self {
        self.ignore_kill = true;
        self
    }

    /// Cancels `token` while `run` is starting the container
    pub fn cancelling_on_launch(mut self, token: CancellationToken) -> Self {
        self.on_launch = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, _image: &str, _command: &str) -> Result<(ContainerHandle, ContainerOutput)> {
        self.record(RuntimeCall::Run);
        if let Some(token) = &self.on_launch {
            token.cancel();
        }
        if let Behavior::FailsLaunch = self.behavior {
            anyhow::bail!("No such image: nope:latest");
        }

        let lines = stream::iter(
            self.lines
                .clone()
                .into_iter()
                .map(|line| Ok::<_, io::Error>(line.into_bytes())),
        );

        let output = match self.behavior {
            Behavior::Exits(_) => lines.boxed(),
            _ => {
                let killed = self.killed.clone();
                let ignore_kill = self.ignore_kill;
                let open_until_killed = stream::once(async move {
                    if ignore_kill {
                        std::future::pending::<()>().await;
                    } else {
                        killed.cancelled().await;
                    }
                })
                .filter_map(|_| async { None::<io::Result<Vec<u8>>> });
                lines.chain(open_until_killed).boxed()
            }
        };

        Ok((
            ContainerHandle::new("0123456789abcdef", "shiplog-test"),
            ContainerOutput::new(output),
        ))
    }

    async fn wait(&self, _handle: &ContainerHandle) -> Result<i64> {
        self.record(RuntimeCall::Wait);
        match self.behavior {
            Behavior::Exits(status) => Ok(status),
            Behavior::FailsWait => anyhow::bail!("Cannot connect to the container daemon"),
            _ => {
                self.killed.cancelled().await;
                Ok(137)
            }
        }
    }

    async fn kill(&self, _handle: &ContainerHandle) {
        self.record(RuntimeCall::Kill);
        self.killed.cancel();
    }

    async fn remove(&self, _handle: &ContainerHandle) -> Result<()> {
        self.record(RuntimeCall::Remove);
        Ok(())
    }
}
