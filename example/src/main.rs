#![allow(non_snake_case)]
use futures::future::{self, BoxFuture, FutureExt};
use metrics_cloudwatch_emf::{
    ClientError, HistogramData, LogGroup, LogsClient, MetricData, MetricPoint, NumberValue, PutLogEventsRequest,
    PutLogEventsResponse,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Prints every log event to stdout, the way the CloudWatch agent would receive them
#[derive(Default)]
struct StdoutClient {
    log_groups: Mutex<Vec<String>>,
    sequence: AtomicU64,
}

impl LogsClient for StdoutClient {
    fn describe_log_groups<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<LogGroup>, ClientError>> {
        let groups = self
            .log_groups
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| LogGroup { name: name.clone() })
            .collect();
        future::ready(Ok(groups)).boxed()
    }

    fn create_log_group<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ClientError>> {
        tracing::info!(log_group = name, "CreateLogGroup");
        self.log_groups.lock().unwrap().push(name.to_string());
        future::ready(Ok(())).boxed()
    }

    fn create_log_stream<'a>(&'a self, group: &'a str, stream: &'a str) -> BoxFuture<'a, Result<(), ClientError>> {
        tracing::info!(log_group = group, log_stream = stream, "CreateLogStream");
        future::ready(Ok(())).boxed()
    }

    fn put_log_events<'a>(
        &'a self,
        request: PutLogEventsRequest<'a>,
    ) -> BoxFuture<'a, Result<PutLogEventsResponse, ClientError>> {
        for event in request.log_events {
            println!("{}", event.message);
        }
        let next = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        future::ready(Ok(PutLogEventsResponse {
            next_sequence_token: Some(next.to_string()),
        }))
        .boxed()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), metrics_cloudwatch_emf::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .compact()
        .init();

    let exporter = metrics_cloudwatch_emf::Builder::new()
        .log_group("/metrics/emf-stdout")
        .default_namespace("EmfStdout")
        .with_resource_attribute("service.name", "emf-stdout")
        .resource_attribute_dimensions(["service.name"])
        .build(Arc::new(StdoutClient::default()))?;

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    for tick in 0..3i64 {
        interval.tick().await;
        exporter
            .export_async(&[
                MetricPoint::new("requests", MetricData::Sum(NumberValue::Long(tick + 1))).with_tag("Method", "Default"),
                MetricPoint::new("EmfStdout.latency", MetricData::Histogram(HistogramData { sum: 71.9, count: 3 }))
                    .with_unit(metrics::Unit::Milliseconds),
            ])
            .await?;
    }
    Ok(())
}
