//! Shiplog CloudWatch Logs client
//!
//! A small, typed client for the parts of the CloudWatch Logs API the shipper
//! needs: creating the destination group/stream and putting batches of events.
//!
//! Calls go through the AWS SDK with the static credentials handed to
//! [`CloudWatchLogsClient::builder`]. SDK retries are disabled, so every call
//! is exactly one attempt.
//!
//! # Example
//!
//! ```no_run
//! use shiplog_client::{CloudWatchLogsClient, Credentials, LogSink};
//! use shiplog_core::domain::destination::Destination;
//!
//! #[tokio::main]
//! async fn main() -> shiplog_client::Result<()> {
//!     let client = CloudWatchLogsClient::builder(
//!         "eu-west-1",
//!         Credentials::new("AKIDEXAMPLE", "secret", None, None, "example"),
//!     )
//!     .build()
//!     .await;
//!
//!     client
//!         .ensure_destination(&Destination::new("/shiplog/demo", "worker"))
//!         .await?;
//!     Ok(())
//! }
//! ```

mod destinations;
pub mod error;
mod events;
pub mod sink;

// Re-export commonly used types
pub use aws_sdk_cloudwatchlogs::config::Credentials;
pub use error::{ClientError, Result};
pub use events::{PutLogEventsResponse, RejectedLogEventsInfo};
pub use sink::{DeliveryReport, LogSink};

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use std::time::Duration;
use tracing::debug;

/// Client for the CloudWatch Logs API
///
/// Operations are grouped by concern:
/// - Destination setup (create group, create stream, ensure both)
/// - Event delivery (put log events)
#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    inner: aws_sdk_cloudwatchlogs::Client,
    region: String,
    endpoint: Option<String>,
}

/// Settings for a [`CloudWatchLogsClient`]
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    region: String,
    credentials: Credentials,
    endpoint: Option<String>,
    request_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Override the endpoint (local emulators, VPC endpoints, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    /// Bound every call, including connecting and reading the response
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> CloudWatchLogsClient {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(self.credentials)
            .retry_config(RetryConfig::disabled());

        if let Some(timeout) = self.request_timeout {
            loader =
                loader.timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        }
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        debug!(
            "CloudWatch Logs client ready (region: {}, endpoint: {:?})",
            self.region, self.endpoint
        );

        CloudWatchLogsClient {
            inner: aws_sdk_cloudwatchlogs::Client::new(&sdk_config),
            region: self.region,
            endpoint: self.endpoint,
        }
    }
}

impl CloudWatchLogsClient {
    /// Start configuring a client
    ///
    /// # Arguments
    /// * `region` - AWS region, e.g. "us-east-1"
    /// * `credentials` - Static credentials used to sign every request
    pub fn builder(region: impl Into<String>, credentials: Credentials) -> ClientBuilder {
        ClientBuilder {
            region: region.into(),
            credentials,
            endpoint: None,
            request_timeout: None,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint override, if any; `None` means the regional AWS endpoint
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[cfg(test)]
pub(crate) async fn test_client(endpoint: String) -> CloudWatchLogsClient {
    CloudWatchLogsClient::builder(
        "us-east-1",
        Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"),
    )
    .with_endpoint(endpoint)
    .build()
    .await
}
