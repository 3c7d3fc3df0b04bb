//! # Pusher
//!
//! Batches serialized EMF documents into `PutLogEvents` calls against a single log stream.
//!
//! Delivery runs as a small state machine over [StreamState]:
//!
//! ```plaintext
//! Uninitialized --provisioned--> StreamReady --batch pending--> Sending --ok--> StreamReady
//!       ^    \                        ^                            |
//!       |     `--provisioning failed--+-------> Backoff <--other---+
//!       `------------------- invalid sequence token / stream missing
//! ```
//!
//! The whole sequence is bounded by [PusherConfig::send_timeout]; on expiry the queued events are dropped and
//! [Error::DeliveryTimeout] is returned.

use super::client::{ClientError, InputLogEvent, LogsClient, PutLogEventsRequest};
use super::emf::unix_millis;
use super::error::{Error, Result};
use super::events::{DeliveryEvents, TracingEvents};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use uuid::Uuid;

/// CloudWatch Logs caps a `PutLogEvents` batch at 1 MiB
pub const MAX_BATCH_BYTES: usize = 1024 * 1024;

pub const DEFAULT_LOG_GROUP: &str = "/metrics/default";
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const STREAM_NAME_PREFIX: &str = "opentelemetry-metrics-emf-";
const MIN_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 600;

/// Worst case encoded size of `message`: two bytes per UTF-16 code unit plus one extra unit
pub fn estimated_size(message: &str) -> usize {
    (message.encode_utf16().count() + 1) * 2
}

fn backoff_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(MIN_BACKOFF_MS..=MAX_BACKOFF_MS))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PusherConfig {
    /// Created if it doesn't exist
    pub log_group: String,
    /// Upper bound on a single flush including retries, in milliseconds when deserialized
    #[serde(rename = "send_timeout_ms", deserialize_with = "crate::exporter::duration_ms")]
    pub send_timeout: Duration,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            log_group: DEFAULT_LOG_GROUP.to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No usable log stream, the next send provisions one
    Uninitialized,
    StreamReady,
    Sending,
    Backoff,
}

/// Pending log events for the current stream plus its sequence token
#[derive(Debug, Default)]
pub(crate) struct Batch {
    events: Vec<InputLogEvent>,
    total_size: usize,
    sequence_token: Option<String>,
}

impl Batch {
    /// Would adding `size` more bytes go over [MAX_BATCH_BYTES]
    fn would_exceed(&self, size: usize) -> bool {
        self.total_size + size > MAX_BATCH_BYTES
    }

    fn push(&mut self, event: InputLogEvent, size: usize) {
        self.total_size += size;
        self.events.push(event);
    }

    /// CloudWatch rejects batches that are not in chronological order
    fn sort(&mut self) {
        self.events.sort_by_key(|event| event.timestamp);
    }

    /// Drops the events, keeps the sequence token. Returns the number dropped.
    fn clear(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        self.total_size = 0;
        dropped
    }

    fn complete(&mut self, next_sequence_token: Option<String>) {
        self.clear();
        self.sequence_token = next_sequence_token;
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Pusher state used to batch and deliver
/// This lives within a mutex, held for the whole of an append + flush
struct PusherState {
    batch: Batch,
    log_stream: Option<String>,
    stream_state: StreamState,
}

/// Delivers log events to one CloudWatch Logs stream, one send in flight at a time
pub struct CloudWatchPusher {
    client: Arc<dyn LogsClient>,
    events: Arc<dyn DeliveryEvents>,
    config: PusherConfig,
    state: Mutex<PusherState>,
}

impl CloudWatchPusher {
    pub fn new(client: Arc<dyn LogsClient>, config: PusherConfig) -> Self {
        Self::with_events(client, config, Arc::new(TracingEvents))
    }

    pub fn with_events(client: Arc<dyn LogsClient>, config: PusherConfig, events: Arc<dyn DeliveryEvents>) -> Self {
        Self {
            client,
            events,
            config,
            state: Mutex::new(PusherState {
                batch: Batch::default(),
                log_stream: None,
                stream_state: StreamState::Uninitialized,
            }),
        }
    }

    pub fn config(&self) -> &PusherConfig {
        &self.config
    }

    /// Queue `messages` stamped with the current time, then flush
    pub async fn push(&self, messages: impl IntoIterator<Item = String>) -> Result<()> {
        self.push_events(messages.into_iter().map(|message| InputLogEvent {
            timestamp: unix_millis(SystemTime::now()),
            message,
        }))
        .await
    }

    /// Queue `events`, flushing early whenever the batch would exceed [MAX_BATCH_BYTES], then flush.
    ///
    /// Records over [MAX_BATCH_BYTES] on their own are dropped. If a flush times out, every record not yet
    /// delivered is dropped and counted, including those not queued yet.
    pub async fn push_events(&self, events: impl IntoIterator<Item = InputLogEvent>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            let enqueued = self.enqueue(&mut state, event).await;
            if enqueued.is_err() {
                // The record in hand never made it into the batch
                return self.report_timeout(enqueued, 1 + events.by_ref().count());
            }
        }
        let flushed = self.flush_locked(&mut state).await;
        self.report_timeout(flushed, 0)
    }

    /// Send whatever is queued
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let flushed = self.flush_locked(&mut state).await;
        self.report_timeout(flushed, 0)
    }

    pub async fn stream_state(&self) -> StreamState {
        self.state.lock().await.stream_state
    }

    pub async fn log_stream_name(&self) -> Option<String> {
        self.state.lock().await.log_stream.clone()
    }

    pub async fn sequence_token(&self) -> Option<String> {
        self.state.lock().await.batch.sequence_token.clone()
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.batch.len()
    }

    async fn enqueue(&self, state: &mut PusherState, event: InputLogEvent) -> Result<()> {
        let size = estimated_size(&event.message);
        if size > MAX_BATCH_BYTES {
            self.events.oversized_record(size);
            return Ok(());
        }
        if state.batch.would_exceed(size) {
            self.flush_locked(state).await?;
        }
        state.batch.push(event, size);
        Ok(())
    }

    /// Adds the `unqueued` records to a timeout's drop count and reports it
    fn report_timeout(&self, result: Result<()>, unqueued: usize) -> Result<()> {
        match result {
            Err(Error::DeliveryTimeout { dropped, timeout }) => {
                let dropped = dropped + unqueued;
                self.events.delivery_timeout(dropped, timeout);
                Err(Error::DeliveryTimeout { dropped, timeout })
            }
            other => other,
        }
    }

    async fn flush_locked(&self, state: &mut PusherState) -> Result<()> {
        if state.batch.is_empty() {
            return Ok(());
        }

        let timeout = self.config.send_timeout;
        let outcome = tokio::time::timeout(timeout, self.deliver(state)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let dropped = state.batch.clear();
                state.stream_state = match state.log_stream {
                    Some(_) => StreamState::StreamReady,
                    None => StreamState::Uninitialized,
                };
                Err(Error::DeliveryTimeout { dropped, timeout })
            }
        }
    }

    /// Drive the state machine until the batch is delivered
    async fn deliver(&self, state: &mut PusherState) -> Result<()> {
        loop {
            state.stream_state = match state.stream_state {
                StreamState::Uninitialized => {
                    let provisioned = self.provision(state).await;
                    match provisioned {
                        Ok(()) => StreamState::StreamReady,
                        Err(_) => StreamState::Backoff,
                    }
                }
                StreamState::StreamReady => {
                    if state.batch.is_empty() {
                        return Ok(());
                    }
                    state.batch.sort();
                    StreamState::Sending
                }
                StreamState::Sending => {
                    let sent = self.send(state).await;
                    match sent {
                        Ok(()) => StreamState::StreamReady,
                        Err(err) if err.requires_new_stream() => {
                            state.log_stream = None;
                            StreamState::Uninitialized
                        }
                        Err(_) => StreamState::Backoff,
                    }
                }
                StreamState::Backoff => {
                    let delay = backoff_delay();
                    self.events.backing_off(delay);
                    tokio::time::sleep(delay).await;
                    match state.log_stream {
                        Some(_) => StreamState::StreamReady,
                        None => StreamState::Uninitialized,
                    }
                }
            };
        }
    }

    /// Make sure the log group exists and create a fresh stream with an empty sequence token
    async fn provision(&self, state: &mut PusherState) -> Result<()> {
        let log_group = self.config.log_group.as_str();

        let groups = self
            .client
            .describe_log_groups(log_group)
            .await
            .map_err(|err| self.provisioning_error("DescribeLogGroups", log_group, err))?;

        // Describe matches by prefix
        if !groups.iter().any(|group| group.name == log_group) {
            match self.client.create_log_group(log_group).await {
                Ok(()) | Err(ClientError::ResourceAlreadyExists(_)) => {}
                Err(err) => return Err(self.provisioning_error("CreateLogGroup", log_group, err)),
            }
        }

        let log_stream = format!("{STREAM_NAME_PREFIX}{}", Uuid::new_v4());
        self.client
            .create_log_stream(log_group, &log_stream)
            .await
            .map_err(|err| self.provisioning_error("CreateLogStream", &log_stream, err))?;

        self.events.stream_provisioned(log_group, &log_stream);
        state.log_stream = Some(log_stream);
        state.batch.sequence_token = None;
        Ok(())
    }

    fn provisioning_error(&self, method: &'static str, target: &str, err: ClientError) -> Error {
        self.events.api_error(method, target, &err);
        Error::StreamProvisioning(err)
    }

    async fn send(&self, state: &mut PusherState) -> Result<()> {
        let Some(log_stream) = state.log_stream.as_deref() else {
            return Err(Error::StreamProvisioning(ClientError::ResourceNotFound(
                "log stream not provisioned".to_string(),
            )));
        };

        self.events
            .sending_events(state.batch.len(), &self.config.log_group, log_stream);

        let request = PutLogEventsRequest {
            log_group_name: &self.config.log_group,
            log_stream_name: log_stream,
            sequence_token: state.batch.sequence_token.as_deref(),
            log_events: &state.batch.events,
        };

        let response = self.client.put_log_events(request).await;
        match response {
            Ok(response) => {
                state.batch.complete(response.next_sequence_token);
                Ok(())
            }
            Err(err) => {
                self.events.api_error("PutLogEvents", log_stream, &err);
                Err(match err {
                    ClientError::InvalidSequenceToken { .. } => Error::SequenceConflict(err),
                    ClientError::ResourceNotFound(_) => Error::StreamProvisioning(err),
                    _ => Error::TransientDelivery(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{Call, RecordingEvents, ScriptedClient};

    fn pusher(client: &Arc<ScriptedClient>, events: &Arc<RecordingEvents>) -> CloudWatchPusher {
        CloudWatchPusher::with_events(client.clone(), PusherConfig::default(), events.clone())
    }

    fn event(timestamp: u64, message: &str) -> InputLogEvent {
        InputLogEvent {
            timestamp,
            message: message.to_string(),
        }
    }

    fn invalid_token() -> ClientError {
        ClientError::InvalidSequenceToken {
            expected: Some("49590302".to_string()),
        }
    }

    #[test]
    fn size_estimate_is_worst_case_utf16() {
        assert_eq!(estimated_size(""), 2);
        assert_eq!(estimated_size("abc"), 8);
        // Outside the BMP, two UTF-16 code units
        assert_eq!(estimated_size("\u{1F600}"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn provisions_then_sends() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);
        assert_eq!(pusher.stream_state().await, StreamState::Uninitialized);

        pusher.push_events([event(1, "a"), event(2, "b")]).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], Call::DescribeLogGroups(DEFAULT_LOG_GROUP.to_string()));
        assert_eq!(calls[1], Call::CreateLogGroup(DEFAULT_LOG_GROUP.to_string()));
        let Call::CreateLogStream { stream, .. } = &calls[2] else {
            panic!("expected CreateLogStream, got {:?}", calls[2]);
        };
        assert!(stream.starts_with(STREAM_NAME_PREFIX));
        assert_eq!(calls[3].messages(), vec!["a", "b"]);
        assert_eq!(calls[3].token(), None);

        assert_eq!(pusher.stream_state().await, StreamState::StreamReady);
        assert_eq!(pusher.pending().await, 0);
        assert_eq!(pusher.sequence_token().await.as_deref(), Some("token-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_log_group_is_not_created() {
        let client = Arc::new(ScriptedClient::with_log_group(DEFAULT_LOG_GROUP));
        let events = Arc::new(RecordingEvents::default());
        pusher(&client, &events).push_events([event(1, "a")]).await.unwrap();

        assert!(!client
            .calls()
            .iter()
            .any(|call| matches!(call, Call::CreateLogGroup(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_match_is_not_enough() {
        let client = Arc::new(ScriptedClient::with_log_group("/metrics/default-other"));
        let events = Arc::new(RecordingEvents::default());
        pusher(&client, &events).push_events([event(1, "a")]).await.unwrap();

        assert!(client
            .calls()
            .contains(&Call::CreateLogGroup(DEFAULT_LOG_GROUP.to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_sorted_by_timestamp() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        pusher(&client, &events)
            .push_events([event(3, "T3"), event(1, "T1"), event(2, "T2")])
            .await
            .unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].messages(), vec!["T1", "T2", "T3"]);
        assert_eq!(puts[0].timestamps(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_before_exceeding_size_ceiling() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        // Each message is estimated at exactly 300_000 bytes
        let message = "x".repeat(149_999);
        assert_eq!(estimated_size(&message), 300_000);

        pusher(&client, &events)
            .push_events((0..4).map(|i| event(i, &message)))
            .await
            .unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].timestamps(), vec![0, 1, 2]);
        assert_eq!(puts[1].timestamps(), vec![3]);
        for put in &puts {
            let size: usize = put.messages().iter().map(|m| estimated_size(m)).sum();
            assert!(size <= MAX_BATCH_BYTES);
        }
        // Second batch continues the stream
        assert_eq!(puts[1].token(), Some("token-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_token_carries_across_flushes() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);

        pusher.push_events([event(1, "a")]).await.unwrap();
        pusher.push_events([event(2, "b")]).await.unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].token(), None);
        assert_eq!(puts[1].token(), Some("token-1"));
        assert_eq!(puts[0].stream(), puts[1].stream());
        assert_eq!(client.stream_creations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_sequence_token_reprovisions_and_retries() {
        let client = Arc::new(ScriptedClient::default());
        client.script_put(Err(invalid_token()));
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);

        pusher
            .push_events([event(2, "b"), event(1, "a")])
            .await
            .unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 2);
        assert_ne!(puts[0].stream(), puts[1].stream());
        assert_eq!(puts[1].token(), None);
        assert_eq!(puts[0].messages(), puts[1].messages());
        assert_eq!(puts[1].messages(), vec!["a", "b"]);
        assert_eq!(client.stream_creations(), 2);
        assert_eq!(events.count("backing_off"), 0);
        assert_eq!(pusher.log_stream_name().await.as_deref(), Some(puts[1].stream()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_stream_reprovisions_and_retries() {
        let client = Arc::new(ScriptedClient::default());
        client.script_put(Err(ClientError::ResourceNotFound("stream".to_string())));
        let events = Arc::new(RecordingEvents::default());
        pusher(&client, &events).push_events([event(1, "a")]).await.unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 2);
        assert_ne!(puts[0].stream(), puts[1].stream());
        assert_eq!(puts[1].messages(), vec!["a"]);
        assert_eq!(events.count("api_error:PutLogEvents"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_back_off_on_the_same_stream() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);
        pusher.push_events([event(1, "a")]).await.unwrap();

        client.script_put(Err(ClientError::Service {
            status: 503,
            message: "throttled".to_string(),
        }));
        client.script_put(Err(ClientError::Transport("connection reset".into())));
        pusher.push_events([event(2, "b")]).await.unwrap();

        let puts = client.puts();
        assert_eq!(puts.len(), 4);
        assert!(puts.iter().all(|put| put.stream() == puts[0].stream()));
        // Retries reuse the token the failed attempts carried
        assert!(puts[1..].iter().all(|put| put.token() == Some("token-1")));
        assert_eq!(puts[3].messages(), vec!["b"]);
        assert_eq!(client.stream_creations(), 1);
        assert_eq!(events.count("backing_off"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_failure_backs_off_and_retries() {
        let client = Arc::new(ScriptedClient::default());
        client.fail_next_stream_creation(ClientError::Service {
            status: 500,
            message: "internal".to_string(),
        });
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);

        pusher.push_events([event(1, "a")]).await.unwrap();

        assert_eq!(events.count("api_error:CreateLogStream"), 1);
        assert_eq!(events.count("backing_off"), 1);
        assert_eq!(client.puts().len(), 1);
        assert_eq!(pusher.stream_state().await, StreamState::StreamReady);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_log_group_creation_is_tolerated() {
        let client = Arc::new(ScriptedClient::default());
        client.fail_next_group_creation(ClientError::ResourceAlreadyExists(DEFAULT_LOG_GROUP.to_string()));
        let events = Arc::new(RecordingEvents::default());

        pusher(&client, &events).push_events([event(1, "a")]).await.unwrap();

        assert_eq!(events.count("backing_off"), 0);
        assert_eq!(client.puts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_drops_queued_events() {
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..200 {
            client.script_put(Err(ClientError::Service {
                status: 500,
                message: "unavailable".to_string(),
            }));
        }
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);

        let err = pusher
            .push_events([event(1, "a"), event(2, "b")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DeliveryTimeout { dropped: 2, timeout } if timeout == DEFAULT_SEND_TIMEOUT
        ));
        assert_eq!(pusher.pending().await, 0);
        assert_eq!(events.count("delivery_timeout"), 1);
        // Bounded by the deadline, not by the scripted failures
        assert!(client.puts().len() < 200);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_send_times_out() {
        let client = Arc::new(ScriptedClient::default());
        client.hang_next_put();
        let events = Arc::new(RecordingEvents::default());
        let pusher = CloudWatchPusher::with_events(
            client.clone(),
            PusherConfig {
                send_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            events.clone(),
        );

        let err = pusher.push_events([event(1, "a")]).await.unwrap_err();
        assert!(matches!(err, Error::DeliveryTimeout { dropped: 1, .. }));

        // Later cycles are unaffected
        pusher.push_events([event(2, "b")]).await.unwrap();
        assert_eq!(client.puts().last().unwrap().messages(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_during_early_flush_counts_unqueued_records() {
        let client = Arc::new(ScriptedClient::default());
        client.hang_next_put();
        let events = Arc::new(RecordingEvents::default());
        let pusher = CloudWatchPusher::with_events(
            client.clone(),
            PusherConfig {
                send_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            events.clone(),
        );
        // Three per batch at 300_000 bytes each
        let message = "x".repeat(149_999);

        let err = pusher
            .push_events((0..6).map(|i| event(i, &message)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeliveryTimeout { dropped: 6, .. }));
        assert_eq!(events.count("delivery_timeout"), 1);
        assert_eq!(pusher.pending().await, 0);
        assert_eq!(client.puts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_record_is_dropped_not_sent() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        let oversized = "y".repeat(MAX_BATCH_BYTES);
        assert!(estimated_size(&oversized) > MAX_BATCH_BYTES);

        pusher(&client, &events)
            .push_events([event(1, "a"), event(2, &oversized), event(3, "b")])
            .await
            .unwrap();

        assert_eq!(events.count("oversized_record"), 1);
        let puts = client.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].messages(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_flush_does_nothing() {
        let client = Arc::new(ScriptedClient::default());
        let events = Arc::new(RecordingEvents::default());
        let pusher = pusher(&client, &events);

        pusher.flush().await.unwrap();
        pusher.push(Vec::new()).await.unwrap();

        assert!(client.calls().is_empty());
        assert_eq!(pusher.stream_state().await, StreamState::Uninitialized);
    }
}
