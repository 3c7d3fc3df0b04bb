//! # Serializer
//!
//! Hand written [serde::Serialize] impls for the [Document](crate::emf::Document) model so the field order of the
//! rendered JSON is fixed and nothing is buffered in an intermediate `Value` tree.
//!
//! ```plaintext
//! {"_aws":{"Timestamp":..,"CloudWatchMetrics":[{"Namespace":..,"Dimensions":[[..]],"Metrics":[{"Name":..}]}]},
//!  <dimension>:<value>,..,<metric>:<value | [values] | {"Sum","Count","Min","Max"}>}
//! ```

use super::emf::{self, DimensionSet, Document, Metadata, MetricDefinition, MetricDirective, MetricValues, StatisticSet};
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct, Serializer};
use serde::Serialize;

impl Document {
    /// Render the document as a single line of minified JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Render the document to an implementation of [std::io::Write]
    pub fn write_to(&self, writer: impl std::io::Write) -> serde_json::Result<()> {
        serde_json::to_writer(writer, self)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let directive = self.metadata().directive();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("_aws", self.metadata())?;

        // Dimension and metric names share the top level, a collision emits the key twice
        for set in directive.dimension_sets() {
            for (key, value) in set.dimensions() {
                map.serialize_entry(key, value)?;
            }
        }

        for metric in directive.metrics() {
            map.serialize_entry(metric.name(), metric.values())?;
        }

        map.end()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Metadata", 2)?;
        state.serialize_field("Timestamp", &self.timestamp())?;
        state.serialize_field("CloudWatchMetrics", std::slice::from_ref(self.directive()))?;
        state.end()
    }
}

impl Serialize for MetricDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetricDirective", 3)?;
        state.serialize_field("Namespace", self.namespace())?;
        state.serialize_field("Dimensions", &DimensionSets(self.dimension_sets()))?;
        state.serialize_field("Metrics", &MetricDeclarations(self.metrics()))?;
        state.end()
    }
}

/// CloudWatch requires at least one dimension set, even if it is empty
struct DimensionSets<'a>(&'a [DimensionSet]);

impl Serialize for DimensionSets<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            let mut seq = serializer.serialize_seq(Some(1))?;
            seq.serialize_element(&[(); 0])?;
            return seq.end();
        }
        serializer.collect_seq(self.0)
    }
}

impl Serialize for DimensionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.dimension_keys())
    }
}

struct MetricDeclarations<'a>(&'a [MetricDefinition]);

impl Serialize for MetricDeclarations<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(MetricDeclaration))
    }
}

struct MetricDeclaration<'a>(&'a MetricDefinition);

impl Serialize for MetricDeclaration<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let unit = self.0.unit();
        let mut state = serializer.serialize_struct("MetricDefinition", 1 + unit.is_some() as usize)?;
        state.serialize_field("Name", self.0.name())?;
        if let Some(unit) = unit {
            state.serialize_field("Unit", emf::unit_to_str(&unit))?;
        }
        state.end()
    }
}

impl Serialize for MetricValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValues::Samples(samples) if samples.len() == 1 => serializer.serialize_f64(samples[0]),
            MetricValues::Samples(samples) => serializer.collect_seq(samples),
            MetricValues::Statistics(statistics) => statistics.serialize(serializer),
        }
    }
}

impl Serialize for StatisticSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StatisticSet", 4)?;
        state.serialize_field("Sum", &self.sum)?;
        state.serialize_field("Count", &self.count)?;
        state.serialize_field("Min", &self.min)?;
        state.serialize_field("Max", &self.max)?;
        state.end()
    }
}
