//! Shiplog
//!
//! Runs a shell command inside a container and ships every line it prints to
//! AWS CloudWatch Logs.
//!
//! Architecture:
//! - Configuration: command-line flags with environment fallbacks
//! - Container: docker/podman CLI driver (start, follow output, wait, kill, remove)
//! - Services: bounded log queue and the batch flusher draining it
//! - Pipeline: lifecycle orchestration and shutdown on SIGINT/SIGTERM
//!
//! The process exits with the workload's exit status, 0 when interrupted,
//! 1 on a pipeline failure and 2 on invalid configuration.

mod config;
mod container;
mod error;
mod pipeline;
mod service;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use shiplog_client::{CloudWatchLogsClient, LogSink};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::container::{CliRuntime, ContainerRuntime};
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shiplog=info,shiplog_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::from(e.exit_code());
    }

    info!("Starting shiplog");
    debug!("Loaded configuration: {:?}", config);

    // Handlers go in before anything is started, so no signal is missed
    let shutdown = shutdown_token();

    let mut pipeline = match build_pipeline(&config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = pipeline.run(shutdown).await;
    match &result {
        Ok(PipelineOutcome::Exited { status }) => info!("Workload exited with status {}", status),
        Ok(PipelineOutcome::Interrupted) => info!("Workload interrupted"),
        Err(e) => error!("{}", e),
    }

    ExitCode::from(exit_status(&result))
}

/// Wires the CloudWatch client and the container runtime into a pipeline
async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let mut builder = CloudWatchLogsClient::builder(&config.aws_region, config.credentials())
        .with_request_timeout(config.request_timeout());
    if let Some(endpoint) = &config.cloudwatch_endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    let client = builder.build().await;
    info!(
        "CloudWatch Logs region: {}, endpoint: {}",
        client.region(),
        client.endpoint().unwrap_or("default")
    );

    let sink: Arc<dyn LogSink> = Arc::new(client);
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(CliRuntime::new(&config.container_runtime, &config.shell));

    Ok(Pipeline::new(runtime, sink, config.pipeline_settings()))
}

/// Installs the SIGINT and SIGTERM handlers and returns a token cancelled by
/// the first of them
///
/// Both handlers are registered before this returns. One that cannot be
/// installed is logged and never fires.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();

    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as install};

        let mut interrupt = install(SignalKind::interrupt())
            .inspect_err(|e| error!("Failed to install SIGINT handler: {}", e))
            .ok();
        let mut terminate = install(SignalKind::terminate())
            .inspect_err(|e| error!("Failed to install SIGTERM handler: {}", e))
            .ok();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = recv(interrupt.as_mut()) => info!("Received SIGINT"),
                _ = recv(terminate.as_mut()) => info!("Received SIGTERM"),
            }
            trigger.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        let trigger = token.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    trigger.cancel();
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }

    token
}

/// Waits for the next signal, forever if there is no handler
#[cfg(unix)]
async fn recv(stream: Option<&mut signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Process exit status for a finished run
fn exit_status(result: &Result<PipelineOutcome, PipelineError>) -> u8 {
    match result {
        Ok(PipelineOutcome::Exited { status }) => u8::try_from(*status).unwrap_or(1),
        Ok(PipelineOutcome::Interrupted) => 0,
        Err(e) => e.exit_code(),
    }
}
