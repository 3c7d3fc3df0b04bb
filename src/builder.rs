use super::adapter::DocumentAdapter;
use super::client::LogsClient;
use super::error::{Error, Result};
use super::events::{DeliveryEvents, TracingEvents};
use super::exporter::{Config, Exporter};
use super::point::{AttributeValue, Resource};
use super::pusher::CloudWatchPusher;
use metrics::SharedString;
use std::sync::Arc;
use std::time::Duration;

/// Builder for the CloudWatch EMF Exporter
///
/// # Example
/// ```no_run
/// # fn client() -> std::sync::Arc<dyn metrics_cloudwatch_emf::LogsClient> { unimplemented!() }
///  let exporter = metrics_cloudwatch_emf::Builder::new()
///      .log_group("/metrics/my-application")
///      .default_namespace("MyApplication")
///      .build(client())
///      .unwrap();
/// ```
pub struct Builder {
    config: Config,
    resource: Resource,
    events: Option<Arc<dyn DeliveryEvents>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// Starts from a configuration loaded by the host
    pub fn from_config(config: Config) -> Self {
        Builder {
            config,
            resource: Resource::default(),
            events: None,
        }
    }

    /// Sets the CloudWatch Logs log group, created on first send if missing
    /// * Defaults to `/metrics/default`
    pub fn log_group(mut self, log_group: impl Into<SharedString>) -> Self {
        self.config.pusher.log_group = log_group.into().into_owned();
        self
    }

    /// Bounds the time a single flush may spend sending and retrying
    /// * Defaults to 10 seconds
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.pusher.send_timeout = timeout;
        self
    }

    /// Sets the CloudWatch namespace for metrics whose name carries no `namespace.` prefix
    pub fn default_namespace(mut self, namespace: impl Into<SharedString>) -> Self {
        self.config.default_namespace = namespace.into().into_owned();
        self
    }

    /// Names the resource attributes to emit as dimensions on every document
    /// * Resource attributes not listed here are ignored
    pub fn resource_attribute_dimensions<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.config.resource_attribute_dimensions = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the resource describing this process
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// Adds a single resource attribute
    /// * This method can be called multiple times with distinct names
    pub fn with_resource_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.resource = self.resource.with_attribute(key, value);
        self
    }

    /// Routes delivery events somewhere other than [tracing]
    pub fn with_events(mut self, events: Arc<dyn DeliveryEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Carried for the caller's periodic reader
    pub fn export_interval(mut self, interval: Duration) -> Self {
        self.config.export_interval = interval;
        self
    }

    /// Carried for the caller's periodic reader
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.config.export_timeout = Some(timeout);
        self
    }

    /// Private helper for validating the configuration
    fn validate(config: &Config) -> Result<()> {
        if config.pusher.log_group.is_empty() {
            return Err(Error::Config("log_group missing".to_string()));
        }
        if config.default_namespace.is_empty() {
            return Err(Error::Config("default_namespace missing".to_string()));
        }
        if config.pusher.send_timeout.is_zero() {
            return Err(Error::Config("send_timeout must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Build the exporter around a CloudWatch Logs client
    pub fn build(self, client: Arc<dyn LogsClient>) -> Result<Exporter> {
        Self::validate(&self.config)?;

        let events = self.events.unwrap_or_else(|| Arc::new(TracingEvents));
        let adapter = DocumentAdapter::new(self.config.default_namespace.as_str())
            .with_resource_dimensions(&self.resource, &self.config.resource_attribute_dimensions);
        let pusher = CloudWatchPusher::with_events(client, self.config.pusher.clone(), events.clone());

        Ok(Exporter::new(self.config, adapter, pusher, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ScriptedClient;

    #[test]
    fn setters_land_in_config() {
        let exporter = Builder::new()
            .log_group("/metrics/orders")
            .send_timeout(Duration::from_secs(3))
            .default_namespace("Orders")
            .resource_attribute_dimensions(["service.name"])
            .export_interval(Duration::from_secs(15))
            .export_timeout(Duration::from_secs(5))
            .build(Arc::new(ScriptedClient::default()))
            .unwrap();

        let config = exporter.config();
        assert_eq!(config.pusher.log_group, "/metrics/orders");
        assert_eq!(exporter.pusher().config().send_timeout, Duration::from_secs(3));
        assert_eq!(config.default_namespace, "Orders");
        assert_eq!(config.resource_attribute_dimensions, vec!["service.name"]);
        assert_eq!(config.export_interval, Duration::from_secs(15));
        assert_eq!(config.export_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Builder::new()
            .log_group("")
            .build(Arc::new(ScriptedClient::default()))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Configuration error: log_group missing");

        let err = Builder::new()
            .send_timeout(Duration::ZERO)
            .build(Arc::new(ScriptedClient::default()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
