//! Pipeline error taxonomy
//!
//! Only the variants here ever leave the orchestrator. Per-batch delivery
//! failures and teardown of an already-gone container are absorbed where they
//! happen and only show up in the logs.

use shiplog_client::ClientError;
use shiplog_core::domain::destination::Destination;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A startup parameter is missing or unusable
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The destination could not be created (other than "already exists")
    #[error("Failed to set up destination {destination}: {source}")]
    DestinationSetup {
        destination: Destination,
        #[source]
        source: ClientError,
    },

    /// The workload could not be started
    #[error("Failed to launch container: {0:#}")]
    Launch(anyhow::Error),

    /// The container runtime failed while the workload was running
    #[error("Container runtime failure: {0:#}")]
    Runtime(anyhow::Error),
}

impl PipelineError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            _ => 1,
        }
    }
}
