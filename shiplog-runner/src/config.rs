//! Runner configuration
//!
//! Every setting is a command-line flag that can also come from the
//! environment. The seven required flags mirror what the shipper cannot run
//! without: the workload, the destination and the credentials to reach it.

use clap::Parser;
use shiplog_client::Credentials;
use shiplog_core::domain::destination::Destination;
use shiplog_core::domain::log::MAX_BATCH_EVENTS;
use std::time::Duration;

use crate::error::PipelineError;
use crate::pipeline::PipelineSettings;
use crate::service::DEFAULT_CAPACITY;

/// Runner configuration
#[derive(Clone, Parser)]
#[command(name = "shiplog")]
#[command(
    about = "Run a container and ship its output to AWS CloudWatch Logs",
    long_about = None
)]
pub struct Config {
    /// Name of the container image
    #[arg(long, env = "SHIPLOG_DOCKER_IMAGE")]
    pub docker_image: String,

    /// Shell command to run inside the container
    #[arg(long, env = "SHIPLOG_BASH_COMMAND")]
    pub bash_command: String,

    /// Name of the CloudWatch log group
    #[arg(long, env = "SHIPLOG_CLOUDWATCH_GROUP")]
    pub aws_cloudwatch_group: String,

    /// Name of the CloudWatch log stream
    #[arg(long, env = "SHIPLOG_CLOUDWATCH_STREAM")]
    pub aws_cloudwatch_stream: String,

    /// AWS access key ID
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: String,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: String,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: String,

    /// AWS session token, for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub aws_session_token: Option<String>,

    /// Override the CloudWatch Logs endpoint (e.g. a local emulator)
    #[arg(long, env = "SHIPLOG_CLOUDWATCH_ENDPOINT")]
    pub cloudwatch_endpoint: Option<String>,

    /// Container runtime binary (docker or podman)
    #[arg(long, env = "SHIPLOG_CONTAINER_RUNTIME", default_value = "docker")]
    pub container_runtime: String,

    /// Shell used to run the command inside the container
    #[arg(long, env = "SHIPLOG_SHELL", default_value = "/bin/sh")]
    pub shell: String,

    /// Maximum number of log events buffered before the reader blocks
    #[arg(long, env = "SHIPLOG_QUEUE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// How often the flusher checks the queue, in milliseconds
    #[arg(long, env = "SHIPLOG_FLUSH_INTERVAL_MS", default_value_t = 200)]
    pub flush_interval_ms: u64,

    /// How long to wait for the log reader after an interrupt, in seconds
    #[arg(long, env = "SHIPLOG_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Timeout for each CloudWatch request, in seconds
    #[arg(long, env = "SHIPLOG_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    /// Validates the configuration
    ///
    /// clap already rejects missing flags; this catches values that parse but
    /// cannot work.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("docker-image", &self.docker_image),
            ("bash-command", &self.bash_command),
            ("aws-cloudwatch-group", &self.aws_cloudwatch_group),
            ("aws-cloudwatch-stream", &self.aws_cloudwatch_stream),
            ("aws-access-key-id", &self.aws_access_key_id),
            ("aws-secret-access-key", &self.aws_secret_access_key),
            ("aws-region", &self.aws_region),
            ("container-runtime", &self.container_runtime),
            ("shell", &self.shell),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if self.queue_capacity == 0 {
            return Err(PipelineError::Configuration(
                "queue-capacity must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity > MAX_BATCH_EVENTS {
            return Err(PipelineError::Configuration(format!(
                "queue-capacity cannot exceed {} (CloudWatch batch limit)",
                MAX_BATCH_EVENTS
            )));
        }

        if self.flush_interval_ms == 0 {
            return Err(PipelineError::Configuration(
                "flush-interval-ms must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "request-timeout-secs must be greater than 0".to_string(),
            ));
        }

        if let Some(endpoint) = &self.cloudwatch_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(PipelineError::Configuration(
                    "cloudwatch-endpoint must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn destination(&self) -> Destination {
        Destination::new(&self.aws_cloudwatch_group, &self.aws_cloudwatch_stream)
    }

    /// Static credentials; the session token is passed through when set
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.aws_access_key_id.clone(),
            self.aws_secret_access_key.clone(),
            self.aws_session_token.clone(),
            None,
            "shiplog",
        )
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings the pipeline orchestrator runs with
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            image: self.docker_image.clone(),
            command: self.bash_command.clone(),
            destination: self.destination(),
            queue_capacity: self.queue_capacity,
            flush_interval: self.flush_interval(),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("docker_image", &self.docker_image)
            .field("bash_command", &self.bash_command)
            .field("destination", &self.destination().to_string())
            .field("aws_region", &self.aws_region)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"** redacted **")
            .field(
                "aws_session_token",
                &self.aws_session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("cloudwatch_endpoint", &self.cloudwatch_endpoint)
            .field("container_runtime", &self.container_runtime)
            .field("shell", &self.shell)
            .field("queue_capacity", &self.queue_capacity)
            .field("flush_interval", &self.flush_interval())
            .field("shutdown_timeout", &self.shutdown_timeout())
            .field("request_timeout", &self.request_timeout())
            .finish()
    }
}
