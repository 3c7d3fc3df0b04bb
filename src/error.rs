//! Error types

use super::client::ClientError;
use super::point::MetricKind;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The point kind has no EMF rendering, fails the whole export cycle
    #[error("Unsupported metric type {kind} for metric {name}")]
    UnsupportedMetricKind { name: String, kind: MetricKind },

    /// Log group or stream is missing or could not be created
    #[error("Log stream provisioning failed: {0}")]
    StreamProvisioning(#[source] ClientError),

    /// Someone else advanced the stream
    #[error("Log stream sequence conflict: {0}")]
    SequenceConflict(#[source] ClientError),

    #[error("Transient delivery failure: {0}")]
    TransientDelivery(#[source] ClientError),

    #[error("Delivery did not complete within {timeout:?}, dropped {dropped} queued records")]
    DeliveryTimeout { dropped: usize, timeout: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to start export runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl Error {
    /// Errors the delivery engine answers by provisioning a fresh log stream
    pub fn requires_new_stream(&self) -> bool {
        matches!(self, Error::StreamProvisioning(_) | Error::SequenceConflict(_))
    }
}
