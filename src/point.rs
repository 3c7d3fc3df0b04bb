//! # Point
//!
//! Flat, already aggregated metric points handed over by the instrumentation pipeline once per export cycle

use std::fmt;
use std::time::SystemTime;

/// Attribute value on a point tag or resource, rendered with [Display](fmt::Display) when used as a dimension
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(value) => f.write_str(value),
            AttributeValue::Bool(value) => write!(f, "{value}"),
            AttributeValue::I64(value) => write!(f, "{value}"),
            AttributeValue::F64(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

/// Attributes describing the process producing the metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    attributes: Vec<(String, AttributeValue)>,
}

impl Resource {
    pub fn new<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        Self {
            attributes: attributes.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    Long(i64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(self) -> f64 {
        match self {
            NumberValue::Long(value) => value as f64,
            NumberValue::Double(value) => value,
        }
    }
}

impl From<i64> for NumberValue {
    fn from(value: i64) -> Self {
        NumberValue::Long(value)
    }
}

impl From<f64> for NumberValue {
    fn from(value: f64) -> Self {
        NumberValue::Double(value)
    }
}

/// Histogram aggregate, bucket counts are not carried because nothing downstream uses them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramData {
    pub sum: f64,
    pub count: u64,
}

/// Aggregated value of a point
#[derive(Debug, Clone, PartialEq)]
pub enum MetricData {
    Sum(NumberValue),
    Gauge(NumberValue),
    Histogram(HistogramData),
    /// Exponential bucket histograms, produced by some pipelines but not exportable as EMF here
    ExponentialHistogram(HistogramData),
}

impl MetricData {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricData::Sum(NumberValue::Long(_)) => MetricKind::LongSum,
            MetricData::Sum(NumberValue::Double(_)) => MetricKind::DoubleSum,
            MetricData::Gauge(NumberValue::Long(_)) => MetricKind::LongGauge,
            MetricData::Gauge(NumberValue::Double(_)) => MetricKind::DoubleGauge,
            MetricData::Histogram(_) => MetricKind::Histogram,
            MetricData::ExponentialHistogram(_) => MetricKind::ExponentialHistogram,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    LongSum,
    DoubleSum,
    LongGauge,
    DoubleGauge,
    Histogram,
    ExponentialHistogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::LongSum => "LongSum",
            MetricKind::DoubleSum => "DoubleSum",
            MetricKind::LongGauge => "LongGauge",
            MetricKind::DoubleGauge => "DoubleGauge",
            MetricKind::Histogram => "Histogram",
            MetricKind::ExponentialHistogram => "ExponentialHistogram",
        })
    }
}

/// A single aggregated metric point
///
/// # Example
/// ```
/// use metrics_cloudwatch_emf::{MetricData, MetricPoint, NumberValue};
///
/// let point = MetricPoint::new("messaging.successes", MetricData::Sum(NumberValue::Long(3)))
///     .with_tag("TagName1", "Default")
///     .with_unit(metrics::Unit::Count);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub data: MetricData,
    pub unit: Option<metrics::Unit>,
    pub tags: Vec<(String, AttributeValue)>,
    pub end_time: SystemTime,
}

impl MetricPoint {
    /// Creates an untagged point ending now
    pub fn new(name: impl Into<String>, data: MetricData) -> Self {
        Self {
            name: name.into(),
            data,
            unit: None,
            tags: Vec::new(),
            end_time: SystemTime::now(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn with_unit(mut self, unit: metrics::Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_end_time(mut self, end_time: SystemTime) -> Self {
        self.end_time = end_time;
        self
    }
}
