//! Error types for the CloudWatch Logs client

use aws_sdk_cloudwatchlogs::config::http::HttpResponse;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to CloudWatch Logs
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got an answer from the service (connect, TLS, timeout, ...)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The service answered with an error
    #[error("API error (status {status}, {code}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// AWS error code, e.g. `ThrottlingException`
        code: String,
        /// Error message from the service
        message: String,
    },

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from its parts
    pub fn api_error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Convert an SDK operation error
    ///
    /// Service errors keep their AWS code and status; everything else is
    /// flattened into its display chain.
    pub(crate) fn from_sdk<E>(err: SdkError<E, HttpResponse>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::ServiceError(service) => Self::api_error(
                service.raw().status().as_u16(),
                service.err().code().unwrap_or("Unknown"),
                service.err().message().unwrap_or_default(),
            ),
            SdkError::ConstructionFailure(_) => {
                Self::InvalidRequest(DisplayErrorContext(&err).to_string())
            }
            _ => Self::RequestFailed(DisplayErrorContext(&err).to_string()),
        }
    }

    /// AWS error code, if this is an API error
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::ApiError { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if the request was throttled
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::ApiError { status: 429, .. })
            || matches!(self.code(), Some("ThrottlingException"))
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}
