//! # Exporter
//!
//! Export cycle returned from metrics_cloudwatch_emf::Builder: metric points in, one EMF log event per point out

use super::adapter::DocumentAdapter;
use super::emf::DEFAULT_NAMESPACE;
use super::error::{Error, Result};
use super::events::DeliveryEvents;
use super::point::MetricPoint;
use super::pusher::{CloudWatchPusher, PusherConfig};
use serde::{Deserialize, Deserializer};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Runtime;

pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn duration_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn optional_duration_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}

/// Configuration via Builder, or deserialized by the host
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Used for metric names without a `namespace.` prefix
    pub default_namespace: String,
    /// Resource attribute keys to mirror as dimensions
    pub resource_attribute_dimensions: Vec<String>,
    /// How often the caller should export, not enforced here
    #[serde(rename = "export_interval_ms", deserialize_with = "duration_ms")]
    pub export_interval: Duration,
    /// Deadline the caller applies to a whole export, not enforced here
    #[serde(rename = "export_timeout_ms", deserialize_with = "optional_duration_ms")]
    pub export_timeout: Option<Duration>,
    pub pusher: PusherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            resource_attribute_dimensions: Vec::new(),
            export_interval: DEFAULT_EXPORT_INTERVAL,
            export_timeout: None,
            pusher: PusherConfig::default(),
        }
    }
}

/// CloudWatch EMF metric exporter
///
/// Use [Builder](super::Builder) to construct
///
/// # Example
/// ```no_run
/// # fn client() -> std::sync::Arc<dyn metrics_cloudwatch_emf::LogsClient> { unimplemented!() }
/// use metrics_cloudwatch_emf::{MetricData, MetricPoint, NumberValue};
///
/// let exporter = metrics_cloudwatch_emf::Builder::new()
///     .log_group("/metrics/my-application")
///     .default_namespace("MyApplication")
///     .build(client())
///     .unwrap();
///
/// exporter
///     .export(&[MetricPoint::new("requests", MetricData::Sum(NumberValue::Long(1))).with_tag("Method", "Default")])
///     .unwrap();
/// ```
pub struct Exporter {
    adapter: DocumentAdapter,
    pusher: CloudWatchPusher,
    events: Arc<dyn DeliveryEvents>,
    /// Created on the first blocking export so async-only users never own (and drop) a runtime
    runtime: OnceLock<Runtime>,
    config: Config,
}

impl Exporter {
    pub(crate) fn new(
        config: Config,
        adapter: DocumentAdapter,
        pusher: CloudWatchPusher,
        events: Arc<dyn DeliveryEvents>,
    ) -> Self {
        Self {
            adapter,
            pusher,
            events,
            runtime: OnceLock::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pusher(&self) -> &CloudWatchPusher {
        &self.pusher
    }

    /// Export one cycle of points, blocking until delivered or the send timeout passes.
    ///
    /// Must not be called from within an async runtime, use [Exporter::export_async] there.
    pub fn export(&self, points: &[MetricPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.runtime()?.block_on(self.export_async(points))
    }

    /// Export one cycle of points. Either every point is delivered or the cycle fails.
    pub async fn export_async(&self, points: &[MetricPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let result = match self.render(points) {
            Ok(messages) => self.pusher.push(messages).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.events.export_failed(err);
        }
        result
    }

    /// One serialized document per point, failing on the first point that can't be rendered
    fn render(&self, points: &[MetricPoint]) -> Result<Vec<String>> {
        points
            .iter()
            .map(|point| Ok(self.adapter.build_document(point)?.to_json()?))
            .collect()
    }

    fn runtime(&self) -> Result<&Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(Error::Runtime)?;
        Ok(self.runtime.get_or_init(|| runtime))
    }
}
