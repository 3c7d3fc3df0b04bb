//! # EMF
//!
//! Document model for CloudWatch Embedded Metrics. Rendering lives in [serializer](crate::serializer).
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatch/latest/monitoring/CloudWatch_Embedded_Metric_Format_Specification.html>

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Namespace used when neither the metric name nor the configuration supplies one
pub const DEFAULT_NAMESPACE: &str = "DefaultCustomNamespace";

/// Milliseconds since the Unix epoch, clamped to zero for times before it
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert a metrics::Unit into the cloudwatch string
///
/// <https://docs.aws.amazon.com/AmazonCloudWatch/latest/APIReference/API_MetricDatum.html>
pub fn unit_to_str(unit: &metrics::Unit) -> &'static str {
    match unit {
        metrics::Unit::Count => "Count",
        metrics::Unit::Percent => "Percent",
        metrics::Unit::Seconds => "Seconds",
        metrics::Unit::Milliseconds => "Milliseconds",
        metrics::Unit::Microseconds => "Microseconds",
        metrics::Unit::Nanoseconds => "Nanoseconds",
        metrics::Unit::Tebibytes => "Terabytes",
        metrics::Unit::Gibibytes => "Gigabytes",
        metrics::Unit::Mebibytes => "Megabytes",
        metrics::Unit::Kibibytes => "Kilobytes",
        metrics::Unit::Bytes => "Bytes",
        metrics::Unit::TerabitsPerSecond => "Terabits/Second",
        metrics::Unit::GigabitsPerSecond => "Gigabits/Second",
        metrics::Unit::MegabitsPerSecond => "Megabits/Second",
        metrics::Unit::KilobitsPerSecond => "Kilobits/Second",
        metrics::Unit::BitsPerSecond => "Bits/Second",
        metrics::Unit::CountPerSecond => "Count/Second",
    }
}

/// Dimension names mapped to values, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionSet {
    dimensions: Vec<(String, String)>,
}

impl DimensionSet {
    /// Creates a set holding a single dimension
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut set = Self::default();
        set.add_dimension(key, value);
        set
    }

    /// Adds a dimension, replacing the value in place if the name is already present
    pub fn add_dimension(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.dimensions.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.dimensions.push((key, value)),
        }
    }

    /// Adds every dimension of `other`, later values win
    pub fn merge(&mut self, other: DimensionSet) {
        for (key, value) in other.dimensions {
            self.add_dimension(key, value);
        }
    }

    pub fn dimension_keys(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|(k, _)| k.as_str())
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dimensions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.dimensions.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// Pre-aggregated distribution emitted in place of raw samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticSet {
    pub sum: f64,
    pub count: f64,
    pub min: f64,
    pub max: f64,
}

/// Values carried by a metric definition, raw samples and statistics never mix
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValues {
    Samples(Vec<f64>),
    Statistics(StatisticSet),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    name: String,
    unit: Option<metrics::Unit>,
    values: MetricValues,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, unit: Option<metrics::Unit>, value: f64) -> Self {
        Self {
            name: name.into(),
            unit,
            values: MetricValues::Samples(vec![value]),
        }
    }

    pub fn with_statistics(name: impl Into<String>, unit: Option<metrics::Unit>, statistics: StatisticSet) -> Self {
        Self {
            name: name.into(),
            unit,
            values: MetricValues::Statistics(statistics),
        }
    }

    /// Appends a raw sample, returns false when the definition holds a [StatisticSet]
    pub fn add_value(&mut self, value: f64) -> bool {
        match &mut self.values {
            MetricValues::Samples(samples) => {
                samples.push(value);
                true
            }
            MetricValues::Statistics(_) => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` is CloudWatch's "None" unit
    pub fn unit(&self) -> Option<metrics::Unit> {
        self.unit
    }

    pub fn values(&self) -> &MetricValues {
        &self.values
    }
}

/// Instructs CloudWatch which members of the document are dimensions and metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDirective {
    namespace: String,
    dimension_sets: Vec<DimensionSet>,
    metrics: Vec<MetricDefinition>,
}

impl Default for MetricDirective {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl MetricDirective {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            dimension_sets: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    /// Adds to the first dimension set, creating it if there is none
    pub fn add_dimension(&mut self, key: impl Into<String>, value: impl Into<String>) {
        match self.dimension_sets.first_mut() {
            Some(set) => set.add_dimension(key, value),
            None => self.dimension_sets.push(DimensionSet::new(key, value)),
        }
    }

    /// Appends an additional dimension set
    pub fn add_dimension_set(&mut self, set: DimensionSet) {
        self.dimension_sets.push(set);
    }

    pub fn dimension_sets(&self) -> &[DimensionSet] {
        &self.dimension_sets
    }

    /// Appends a sample to the metric named `name`, creating the definition on first use.
    /// The unit of an existing definition is kept.
    pub fn put_metric(&mut self, name: impl Into<String>, value: f64, unit: Option<metrics::Unit>) {
        let name = name.into();
        match self.metrics.iter_mut().find(|m| m.name == name) {
            Some(metric) => {
                if !metric.add_value(value) {
                    warn!("Dropping sample for metric {name} as it already carries a statistic set");
                }
            }
            None => self.metrics.push(MetricDefinition::new(name, unit, value)),
        }
    }

    /// Sets the statistic set for `name`, replacing any samples already recorded under it
    pub fn put_statistic_set(&mut self, name: impl Into<String>, unit: Option<metrics::Unit>, statistics: StatisticSet) {
        let definition = MetricDefinition::with_statistics(name, unit, statistics);
        match self.metrics.iter_mut().find(|m| m.name == definition.name) {
            Some(metric) => *metric = definition,
            None => self.metrics.push(definition),
        }
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }
}

/// The `_aws` block of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    timestamp: u64,
    // This crate never uses more than one directive in a metrics document
    directive: MetricDirective,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(MetricDirective::default())
    }
}

impl Metadata {
    /// Creates metadata stamped with the current time
    pub fn new(directive: MetricDirective) -> Self {
        Self {
            timestamp: unix_millis(SystemTime::now()),
            directive,
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, time: SystemTime) {
        self.timestamp = unix_millis(time);
    }

    pub fn set_timestamp_millis(&mut self, millis: u64) {
        self.timestamp = millis;
    }

    pub fn directive(&self) -> &MetricDirective {
        &self.directive
    }

    pub fn directive_mut(&mut self) -> &mut MetricDirective {
        &mut self.directive
    }
}

/// Root of an embedded metrics document, one per metric point
///
/// # Example
/// ```
/// let mut document = metrics_cloudwatch_emf::Document::new("GameServerMetrics");
/// document.add_dimension("Address", "10.172.207.225");
/// document.put_metric("FrameTime", 10.0);
/// document.metadata_mut().set_timestamp_millis(1687394207903);
///
/// assert_eq!(
///     document.to_json().unwrap(),
///     r#"{"_aws":{"Timestamp":1687394207903,"CloudWatchMetrics":[{"Namespace":"GameServerMetrics","Dimensions":[["Address"]],"Metrics":[{"Name":"FrameTime"}]}]},"Address":"10.172.207.225","FrameTime":10.0}"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    metadata: Metadata,
}

impl Document {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(MetricDirective::new(namespace)),
        }
    }

    pub fn add_dimension(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.directive.add_dimension(key, value);
    }

    pub fn put_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metadata.directive.put_metric(name, value, None);
    }

    pub fn put_metric_with_unit(&mut self, name: impl Into<String>, value: f64, unit: metrics::Unit) {
        self.metadata.directive.put_metric(name, value, Some(unit));
    }

    pub fn put_statistic_set(&mut self, name: impl Into<String>, unit: Option<metrics::Unit>, statistics: StatisticSet) {
        self.metadata.directive.put_statistic_set(name, unit, statistics);
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
