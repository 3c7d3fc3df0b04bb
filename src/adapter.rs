//! # Adapter
//!
//! Builds one EMF [Document] per aggregated [MetricPoint]

use super::emf::{Document, StatisticSet};
use super::error::{Error, Result};
use super::point::{MetricData, MetricPoint, Resource};

/// Separates a namespace prefix from the metric name, `lambda-function-metrics.Time`
pub const NAMESPACE_SEPARATOR: char = '.';

/// Splits `name` at the first separator into `(namespace, metric)`.
///
/// Empty segments are skipped, so names like `Time`, `.Time` or `Time.` have no namespace part.
pub fn split_namespace(name: &str) -> Option<(&str, &str)> {
    let (namespace, metric) = name.trim_start_matches(NAMESPACE_SEPARATOR).split_once(NAMESPACE_SEPARATOR)?;
    let metric = metric.trim_start_matches(NAMESPACE_SEPARATOR);
    if metric.is_empty() {
        return None;
    }
    Some((namespace, metric))
}

pub struct DocumentAdapter {
    default_namespace: String,
    /// Allow-listed resource attributes, already stringified
    resource_dimensions: Vec<(String, String)>,
}

impl DocumentAdapter {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            resource_dimensions: Vec::new(),
        }
    }

    /// Mirrors the resource attributes named in `allow_list` as dimensions on every document
    pub fn with_resource_dimensions<S: AsRef<str>>(mut self, resource: &Resource, allow_list: &[S]) -> Self {
        self.resource_dimensions = resource
            .attributes()
            .filter(|(key, _)| allow_list.iter().any(|allowed| allowed.as_ref() == *key))
            .map(|(key, value)| (key.to_owned(), value.to_string()))
            .collect();
        self
    }

    pub fn build_document(&self, point: &MetricPoint) -> Result<Document> {
        let (namespace, metric_name) =
            split_namespace(&point.name).unwrap_or((self.default_namespace.as_str(), point.name.as_str()));

        let mut document = Document::new(namespace);
        document.metadata_mut().set_timestamp(point.end_time);

        for (key, value) in &self.resource_dimensions {
            document.add_dimension(key.as_str(), value.as_str());
        }
        for (key, value) in &point.tags {
            document.add_dimension(key.as_str(), value.to_string());
        }

        let directive = document.metadata_mut().directive_mut();
        match &point.data {
            MetricData::Sum(value) | MetricData::Gauge(value) => {
                directive.put_metric(metric_name, value.as_f64(), point.unit);
            }
            MetricData::Histogram(histogram) => {
                let count = histogram.count as f64;
                // Per bucket min/max are not aggregated upstream, so both bounds report the mean
                let avg = if histogram.count > 0 { histogram.sum / count } else { 0.0 };
                directive.put_statistic_set(
                    metric_name,
                    point.unit,
                    StatisticSet {
                        sum: histogram.sum,
                        count,
                        min: avg,
                        max: avg,
                    },
                );
            }
            MetricData::ExponentialHistogram(_) => {
                return Err(Error::UnsupportedMetricKind {
                    name: point.name.clone(),
                    kind: point.data.kind(),
                })
            }
        }

        Ok(document)
    }
}
