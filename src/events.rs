//! # Events
//!
//! Observation points of the delivery engine. [TracingEvents] forwards them to [tracing].

use super::client::ClientError;
use super::error::Error;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Structured log sink injected into the pusher and exporter
pub trait DeliveryEvents: Send + Sync {
    /// A CloudWatch Logs call failed
    fn api_error(&self, method: &'static str, target: &str, error: &ClientError);

    fn sending_events(&self, count: usize, log_group: &str, log_stream: &str);

    fn stream_provisioned(&self, log_group: &str, log_stream: &str);

    fn backing_off(&self, delay: Duration);

    /// The flush deadline passed and `dropped` queued records were discarded
    fn delivery_timeout(&self, dropped: usize, timeout: Duration);

    /// A single record is larger than a whole batch may be, it is dropped
    fn oversized_record(&self, estimated_size: usize);

    fn export_failed(&self, error: &Error);
}

/// Default [DeliveryEvents] emitting [tracing] events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl DeliveryEvents for TracingEvents {
    fn api_error(&self, method: &'static str, target: &str, error: &ClientError) {
        error!(method, resource = target, status = error.status(), %error, "CloudWatchLogs API error");
    }

    fn sending_events(&self, count: usize, log_group: &str, log_stream: &str) {
        trace!(count, log_group, log_stream, "Sending events to CloudWatch Logs");
    }

    fn stream_provisioned(&self, log_group: &str, log_stream: &str) {
        debug!(log_group, log_stream, "Created log stream");
    }

    fn backing_off(&self, delay: Duration) {
        warn!(delay_ms = delay.as_millis() as u64, "Backing off before retrying PutLogEvents");
    }

    fn delivery_timeout(&self, dropped: usize, timeout: Duration) {
        error!(dropped, timeout_ms = timeout.as_millis() as u64, "Dropping queued log events after timeout");
    }

    fn oversized_record(&self, estimated_size: usize) {
        warn!(estimated_size, "Dropping log event larger than the batch size limit");
    }

    fn export_failed(&self, error: &Error) {
        error!(%error, "Exception thrown when pushing metrics to CloudWatch");
    }
}
