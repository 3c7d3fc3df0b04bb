pub use {
    adapter::{split_namespace, DocumentAdapter, NAMESPACE_SEPARATOR},
    builder::Builder,
    client::{
        ClientError, InputLogEvent, LogGroup, LogsClient, PutLogEventsRequest, PutLogEventsResponse, LOGS_FORMAT_EMF,
        LOGS_FORMAT_HEADER,
    },
    emf::{
        DimensionSet, Document, Metadata, MetricDefinition, MetricDirective, MetricValues, StatisticSet,
        DEFAULT_NAMESPACE,
    },
    error::{Error, Result},
    events::{DeliveryEvents, TracingEvents},
    exporter::{Config, Exporter},
    point::{AttributeValue, HistogramData, MetricData, MetricKind, MetricPoint, NumberValue, Resource},
    pusher::{estimated_size, CloudWatchPusher, PusherConfig, StreamState, MAX_BATCH_BYTES},
};

mod adapter;
mod builder;
mod client;
mod emf;
mod error;
mod events;
mod exporter;
mod point;
mod pusher;
mod serializer;
