//! Destination setup: log groups and log streams

use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use shiplog_core::domain::destination::Destination;
use tracing::info;

use crate::CloudWatchLogsClient;
use crate::error::{ClientError, Result};

impl CloudWatchLogsClient {
    // =============================================================================
    // Destination Setup
    // =============================================================================

    /// Create a log group
    ///
    /// Returns `false` if the group already existed.
    pub async fn create_log_group(&self, group: &str) -> Result<bool> {
        match self.inner.create_log_group().log_group_name(group).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .is_some_and(CreateLogGroupError::is_resource_already_exists_exception) =>
            {
                Ok(false)
            }
            Err(e) => Err(ClientError::from_sdk(e)),
        }
    }

    /// Create a log stream inside an existing group
    ///
    /// Returns `false` if the stream already existed.
    pub async fn create_log_stream(&self, group: &str, stream: &str) -> Result<bool> {
        match self
            .inner
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(stream)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .is_some_and(CreateLogStreamError::is_resource_already_exists_exception) =>
            {
                Ok(false)
            }
            Err(e) => Err(ClientError::from_sdk(e)),
        }
    }

    /// Create the group, then the stream, treating "already exists" as success
    pub async fn create_destination(&self, destination: &Destination) -> Result<()> {
        if self.create_log_group(&destination.group).await? {
            info!("Created CloudWatch log group: {}", destination.group);
        } else {
            info!("Log group {} already exists", destination.group);
        }

        if self
            .create_log_stream(&destination.group, &destination.stream)
            .await?
        {
            info!(
                "Created CloudWatch log stream: {} in group: {}",
                destination.stream, destination.group
            );
        } else {
            info!(
                "Log stream {} already exists in group: {}",
                destination.stream, destination.group
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_client;
    use mockito::{Matcher, Server};

    const JSON: &str = "application/x-amz-json-1.1";
    const ALREADY_EXISTS: &str =
        r#"{"__type":"ResourceAlreadyExistsException","message":"The specified resource already exists"}"#;

    #[tokio::test]
    async fn test_create_destination_creates_group_then_stream() {
        let mut server = Server::new_async().await;

        let group = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .match_header("content-type", JSON)
            .match_header("authorization", Matcher::Regex("^AWS4-HMAC-SHA256 ".to_string()))
            .match_body(Matcher::Json(serde_json::json!({"logGroupName": "g"})))
            .with_status(200)
            .with_header("content-type", JSON)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let stream = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
            .match_body(Matcher::Json(
                serde_json::json!({"logGroupName": "g", "logStreamName": "s"}),
            ))
            .with_status(200)
            .with_header("content-type", JSON)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        test_client(server.url())
            .await
            .create_destination(&Destination::new("g", "s"))
            .await
            .unwrap();

        group.assert_async().await;
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_destination_tolerates_existing_resources() {
        let mut server = Server::new_async().await;

        let group = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .with_status(400)
            .with_header("content-type", JSON)
            .with_body(ALREADY_EXISTS)
            .expect(2)
            .create_async()
            .await;
        let stream = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
            .with_status(400)
            .with_header("content-type", JSON)
            .with_body(ALREADY_EXISTS)
            .expect(2)
            .create_async()
            .await;

        let client = test_client(server.url()).await;
        let destination = Destination::new("g", "s");

        // Running setup twice must be harmless
        assert!(!client.create_log_group("g").await.unwrap());
        assert!(!client.create_log_stream("g", "s").await.unwrap());
        client.create_destination(&destination).await.unwrap();

        group.assert_async().await;
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_destination_propagates_other_errors() {
        let mut server = Server::new_async().await;

        let _group = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .with_status(400)
            .with_header("content-type", JSON)
            .with_body(r#"{"__type":"AccessDeniedException","message":"nope"}"#)
            .create_async()
            .await;
        let stream = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
            .expect(0)
            .create_async()
            .await;

        let err = test_client(server.url())
            .await
            .create_destination(&Destination::new("g", "s"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::ApiError { status: 400, .. }));
        assert_eq!(err.code(), Some("AccessDeniedException"));
        stream.assert_async().await;
    }
}
