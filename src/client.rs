//! # Client
//!
//! The slice of the CloudWatch Logs API the pusher needs. Request signing, credentials and transport level
//! retries belong to the implementation.
//!
//! Implementations should send [LOGS_FORMAT_HEADER]: [LOGS_FORMAT_EMF] with `PutLogEvents` so CloudWatch
//! extracts metrics from the events.

use futures::future::BoxFuture;
use thiserror::Error;

pub const LOGS_FORMAT_HEADER: &str = "x-amzn-logs-format";
pub const LOGS_FORMAT_EMF: &str = "json/emf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroup {
    pub name: String,
}

/// A log event, `timestamp` is milliseconds since the Unix epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLogEvent {
    pub timestamp: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PutLogEventsRequest<'a> {
    pub log_group_name: &'a str,
    pub log_stream_name: &'a str,
    /// Absent on the first send to a new stream
    pub sequence_token: Option<&'a str>,
    pub log_events: &'a [InputLogEvent],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutLogEventsResponse {
    pub next_sequence_token: Option<String>,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid sequence token, expected {expected:?}")]
    InvalidSequenceToken { expected: Option<String> },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Service returned status {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    /// HTTP status the service answered with, where known
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::InvalidSequenceToken { .. }
            | ClientError::ResourceNotFound(_)
            | ClientError::ResourceAlreadyExists(_) => Some(400),
            ClientError::Service { status, .. } => Some(*status),
            ClientError::Transport(_) => None,
        }
    }
}

/// Asynchronous CloudWatch Logs capability consumed by [CloudWatchPusher](crate::CloudWatchPusher)
pub trait LogsClient: Send + Sync {
    /// Log groups whose name starts with `prefix`
    fn describe_log_groups<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<LogGroup>, ClientError>>;

    fn create_log_group<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ClientError>>;

    fn create_log_stream<'a>(&'a self, log_group: &'a str, log_stream: &'a str)
        -> BoxFuture<'a, Result<(), ClientError>>;

    fn put_log_events<'a>(
        &'a self,
        request: PutLogEventsRequest<'a>,
    ) -> BoxFuture<'a, Result<PutLogEventsResponse, ClientError>>;
}
