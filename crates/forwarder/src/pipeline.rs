//! Change-stream ingestion pipeline
//!
//! Records are decoded on submission and routed to a worker chosen by a
//! hash of their dedup key, so every key has exactly one writer while
//! distinct keys proceed in parallel. Bad records are logged, counted and
//! skipped; only a failing alert store halts the pipeline.

use crate::settings::ForwarderSettings;
use crate::publisher::{AlertNotice, AlertPublisher};
use alerting::{AggregationError, AlertAggregator, DedupKey, Outcome};
use dedup_event::{extract, AttributeMap, DedupEvent};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// A worker hit a fatal store failure; call `shutdown` for the cause
    #[error("Forwarder halted after a fatal error")]
    Halted,
    /// Alert store failed; records from this point must be re-delivered
    #[error("Fatal alert store failure: {0}")]
    Fatal(AggregationError),
    #[error("Worker task failed: {0}")]
    WorkerFailed(String),
    /// Reading the change stream failed; the pipeline was shut down
    #[error("Input error: {0}")]
    Input(#[from] std::io::Error),
}

/// One change-stream record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Position in the stream, for logging
    #[serde(default)]
    pub sequence: u64,
    /// Item image after the change; absent for deletions
    #[serde(default)]
    pub new_image: Option<AttributeMap>,
}

/// Counters accumulated over the pipeline's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwarderStats {
    pub received: u64,
    /// Input lines that were not a change record
    pub malformed: u64,
    /// Records with nothing to extract
    pub empty: u64,
    /// Records that failed extraction or carried an invalid key
    pub rejected: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub stale: u64,
    pub rolled: u64,
    /// Non-fatal aggregation failures, e.g. exhausted conflict retries
    pub failed: u64,
    pub publish_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    empty: AtomicU64,
    rejected: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    unchanged: AtomicU64,
    stale: AtomicU64,
    rolled: AtomicU64,
    failed: AtomicU64,
    publish_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Created => &self.created,
            Outcome::Updated => &self.updated,
            Outcome::Unchanged => &self.unchanged,
            Outcome::Stale => &self.stale,
            Outcome::Rolled { .. } => &self.rolled,
        };
        Self::bump(counter);
        metrics::counter!("alerts_outcomes_total", "outcome" => outcome.as_str()).increment(1);
    }

    fn snapshot(&self) -> ForwarderStats {
        ForwarderStats {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            rolled: self.rolled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

struct Routed {
    sequence: u64,
    key: DedupKey,
    event: DedupEvent,
}

/// Worker pool folding change records into alerts
pub struct Forwarder {
    routes: Vec<mpsc::Sender<Routed>>,
    workers: Vec<JoinHandle<Result<(), AggregationError>>>,
    counters: Arc<Counters>,
    halted: Arc<AtomicBool>,
}

impl Forwarder {
    /// Spawn the worker pool; must be called within a tokio runtime
    pub fn start(
        settings: &ForwarderSettings,
        aggregator: Arc<AlertAggregator>,
        publisher: Arc<dyn AlertPublisher>,
    ) -> Self {
        let worker_count = settings.workers.max(1);
        let counters = Arc::new(Counters::default());
        let halted = Arc::new(AtomicBool::new(false));

        let mut routes = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(settings.queue_depth.max(1));
            routes.push(tx);
            workers.push(tokio::spawn(run_worker(
                id,
                rx,
                aggregator.clone(),
                publisher.clone(),
                counters.clone(),
                halted.clone(),
            )));
        }

        info!("Forwarder started with {} workers", worker_count);
        Self {
            routes,
            workers,
            counters,
            halted,
        }
    }

    /// Decode a record and queue it for its key's worker
    ///
    /// Extraction and key failures are counted and skipped. Waits when the
    /// worker's queue is full.
    pub async fn submit(&self, record: ChangeRecord) -> Result<(), ForwarderError> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(ForwarderError::Halted);
        }
        Counters::bump(&self.counters.received);
        let sequence = record.sequence;

        let event = match extract(record.new_image.as_ref()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(sequence, "Skipping record without an image");
                Counters::bump(&self.counters.empty);
                return Ok(());
            }
            Err(err) => {
                warn!(sequence, kind = err.kind(), error = %err, "Rejected change record");
                Counters::bump(&self.counters.rejected);
                metrics::counter!("alerts_extraction_failures_total", "kind" => err.kind())
                    .increment(1);
                return Ok(());
            }
        };

        let key = match DedupKey::of(&event) {
            Ok(key) => key,
            Err(err) => {
                warn!(sequence, error = %err, "Rejected change record");
                Counters::bump(&self.counters.rejected);
                metrics::counter!("alerts_extraction_failures_total", "kind" => "invalid_key")
                    .increment(1);
                return Ok(());
            }
        };

        let route = &self.routes[self.route(&key)];
        route
            .send(Routed {
                sequence,
                key,
                event,
            })
            .await
            .map_err(|_| ForwarderError::Halted)
    }

    /// Count an input line that could not be decoded
    pub(crate) fn note_malformed(&self) {
        Counters::bump(&self.counters.malformed);
        metrics::counter!("alerts_extraction_failures_total", "kind" => "malformed_record")
            .increment(1);
    }

    /// Counters so far
    pub fn stats(&self) -> ForwarderStats {
        self.counters.snapshot()
    }

    /// Whether a worker has stopped on a fatal error
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Drain all queued records and stop the workers
    pub async fn shutdown(self) -> Result<ForwarderStats, ForwarderError> {
        let Forwarder {
            routes,
            workers,
            counters,
            ..
        } = self;
        drop(routes);

        let mut fatal = None;
        for handle in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    fatal.get_or_insert(err);
                }
                Err(join) => return Err(ForwarderError::WorkerFailed(join.to_string())),
            }
        }

        let stats = counters.snapshot();
        info!(?stats, "Forwarder stopped");
        match fatal {
            Some(err) => Err(ForwarderError::Fatal(err)),
            None => Ok(stats),
        }
    }

    fn route(&self, key: &DedupKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.routes.len() as u64) as usize
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Routed>,
    aggregator: Arc<AlertAggregator>,
    publisher: Arc<dyn AlertPublisher>,
    counters: Arc<Counters>,
    halted: Arc<AtomicBool>,
) -> Result<(), AggregationError> {
    debug!(worker = id, "Worker started");
    while let Some(Routed {
        sequence,
        key,
        event,
    }) = rx.recv().await
    {
        // Store calls may block; keep them off the async workers
        let applying = aggregator.clone();
        let result = tokio::task::spawn_blocking(move || {
            let result = applying.apply(&key, &event);
            (key, result)
        })
        .await;
        let (key, result) = match result {
            Ok(done) => done,
            Err(join) => {
                error!(worker = id, sequence, error = %join, "Apply task failed");
                Counters::bump(&counters.failed);
                metrics::counter!("alerts_apply_failures_total", "kind" => "panic").increment(1);
                continue;
            }
        };

        match result {
            Ok(applied) => {
                counters.record(&applied.outcome);
                if let Some(notice) = AlertNotice::from_applied(&applied) {
                    if let Err(err) = publisher.publish(&notice) {
                        error!(worker = id, sequence, alert_id = %notice.alert.id, error = %err, "Failed to publish alert");
                        Counters::bump(&counters.publish_failures);
                        metrics::counter!("alerts_publish_failures_total").increment(1);
                    }
                }
            }
            Err(err) if err.is_fatal() => {
                error!(worker = id, sequence, %key, error = %err, "Alert store failure, halting");
                halted.store(true, Ordering::SeqCst);
                return Err(err);
            }
            Err(err) => {
                warn!(worker = id, sequence, %key, kind = err.kind(), error = %err, "Failed to apply dedup event");
                Counters::bump(&counters.failed);
                metrics::counter!("alerts_apply_failures_total", "kind" => err.kind()).increment(1);
            }
        }
    }
    debug!(worker = id, "Worker drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{AlertChange, ChannelPublisher, PublishError};
    use alerting::{AggregatorConfig, NoRuleMetadata};
    use dedup_event::AttributeValue;
    use std::collections::BTreeSet;
    use storage::{AlertStore, MemoryStore};

    fn image(rule_id: &str, dedup: &str, event_count: i64, log_type: &str) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert("ruleId".into(), rule_id.into());
        map.insert("ruleVersion".into(), "v1".into());
        map.insert("dedup".into(), dedup.into());
        map.insert("alertCount".into(), AttributeValue::number(1));
        map.insert("alertCreationTime".into(), AttributeValue::number(1000));
        map.insert("alertUpdateTime".into(), AttributeValue::number(1000 + event_count));
        map.insert("eventCount".into(), AttributeValue::number(event_count));
        map.insert("logTypes".into(), AttributeValue::string_set([log_type]));
        map
    }

    fn record(sequence: u64, new_image: AttributeMap) -> ChangeRecord {
        ChangeRecord {
            sequence,
            new_image: Some(new_image),
        }
    }

    fn pipeline(
        workers: usize,
    ) -> (
        Arc<MemoryStore>,
        Forwarder,
        mpsc::UnboundedReceiver<AlertNotice>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Arc::new(AlertAggregator::new(
            store.clone(),
            Arc::new(NoRuleMetadata),
            AggregatorConfig::default(),
        ));
        let (publisher, rx) = ChannelPublisher::new();
        let settings = ForwarderSettings {
            workers,
            queue_depth: 16,
            ..Default::default()
        };
        let forwarder = Forwarder::start(&settings, aggregator, Arc::new(publisher));
        (store, forwarder, rx)
    }

    #[tokio::test]
    async fn test_scenario_create_then_update() {
        let (store, forwarder, mut rx) = pipeline(2);

        forwarder.submit(record(1, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();
        forwarder.submit(record(2, image("R1", "d1", 2, "aws.guardduty"))).await.unwrap();
        let stats = forwarder.shutdown().await.unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.updated, 1);

        let key = DedupKey::new("R1", "d1").unwrap();
        let alert = store.get(&key).unwrap().unwrap().alert;
        assert_eq!(alert.id, alerting::alert_id("R1", 1, "d1"));
        assert_eq!(alert.event_count(), 2);
        assert_eq!(
            alert.log_types,
            BTreeSet::from(["aws.cloudtrail".to_string(), "aws.guardduty".to_string()])
        );

        assert_eq!(rx.recv().await.unwrap().change, AlertChange::Created);
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.change, AlertChange::Updated);
        assert_eq!(updated.alert, alert);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_records_do_not_stop_ingestion() {
        let (store, forwarder, _rx) = pipeline(2);

        let mut missing = image("R1", "d1", 1, "aws.cloudtrail");
        missing.remove("eventCount");
        let mut mistyped = image("R1", "d1", 1, "aws.cloudtrail");
        mistyped.insert("alertCreationTime".into(), "yesterday".into());
        let empty_key = image("", "d1", 1, "aws.cloudtrail");

        forwarder.submit(record(1, missing)).await.unwrap();
        forwarder.submit(record(2, mistyped)).await.unwrap();
        forwarder.submit(record(3, empty_key)).await.unwrap();
        forwarder
            .submit(ChangeRecord {
                sequence: 4,
                new_image: None,
            })
            .await
            .unwrap();
        forwarder.submit(record(5, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();

        let stats = forwarder.shutdown().await.unwrap();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.empty, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_and_reordering() {
        let (store, forwarder, mut rx) = pipeline(4);

        for (sequence, count) in [(1, 1), (2, 3), (3, 2), (4, 3), (5, 1)] {
            forwarder
                .submit(record(sequence, image("R1", "d1", count, "aws.cloudtrail")))
                .await
                .unwrap();
        }
        let stats = forwarder.shutdown().await.unwrap();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.stale, 2);
        assert_eq!(stats.unchanged, 1);

        let key = DedupKey::new("R1", "d1").unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap().alert.event_count(), 3);

        let mut published = 0;
        while rx.recv().await.is_some() {
            published += 1;
        }
        assert_eq!(published, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keys_are_processed_in_parallel() {
        let (store, forwarder, _rx) = pipeline(4);

        let mut sequence = 0;
        for count in 1..=5 {
            for rule in 0..40 {
                sequence += 1;
                let rule_id = format!("R{}", rule);
                forwarder
                    .submit(record(sequence, image(&rule_id, "shared", count, "aws.cloudtrail")))
                    .await
                    .unwrap();
            }
        }
        let stats = forwarder.shutdown().await.unwrap();

        assert_eq!(stats.created, 40);
        assert_eq!(stats.updated, 160);
        assert_eq!(store.len(), 40);
        for alert in store.snapshot().unwrap() {
            assert_eq!(alert.event_count(), 5);
        }
    }

    #[tokio::test]
    async fn test_store_failure_halts() {
        let (store, forwarder, _rx) = pipeline(1);
        store.set_available(false);

        forwarder.submit(record(1, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();

        let err = forwarder.shutdown().await.unwrap_err();
        assert!(matches!(
            err,
            ForwarderError::Fatal(AggregationError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_halt() {
        let (store, forwarder, _rx) = pipeline(1);
        store.set_available(false);

        forwarder.submit(record(1, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();
        while !forwarder.is_halted() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            forwarder.submit(record(2, image("R1", "d1", 2, "aws.cloudtrail"))).await,
            Err(ForwarderError::Halted)
        ));
    }

    struct FailingPublisher;

    impl AlertPublisher for FailingPublisher {
        fn publish(&self, _notice: &AlertNotice) -> Result<(), PublishError> {
            Err(PublishError::Closed)
        }
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Arc::new(AlertAggregator::new(
            store.clone(),
            Arc::new(NoRuleMetadata),
            AggregatorConfig::default(),
        ));
        let forwarder = Forwarder::start(
            &ForwarderSettings::default(),
            aggregator,
            Arc::new(FailingPublisher),
        );

        forwarder.submit(record(1, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();
        forwarder.submit(record(2, image("R1", "d1", 2, "aws.cloudtrail"))).await.unwrap();
        let stats = forwarder.shutdown().await.unwrap();

        assert_eq!(stats.publish_failures, 2);
        assert_eq!(stats.updated, 1);
        assert_eq!(store.len(), 1);
    }

    struct PanickingStore;

    impl AlertStore for PanickingStore {
        fn get(&self, _key: &DedupKey) -> Result<Option<storage::StoredAlert>, storage::StorageError> {
            panic!("store bug");
        }

        fn put(
            &self,
            _key: &DedupKey,
            _alert: &storage::Alert,
            _expected_version: Option<u64>,
        ) -> Result<u64, storage::StorageError> {
            panic!("store bug");
        }
    }

    #[tokio::test]
    async fn test_store_panic_is_contained() {
        let aggregator = Arc::new(AlertAggregator::new(
            Arc::new(PanickingStore),
            Arc::new(NoRuleMetadata),
            AggregatorConfig::default(),
        ));
        let (publisher, _rx) = ChannelPublisher::new();
        let settings = ForwarderSettings {
            workers: 1,
            ..Default::default()
        };
        let forwarder = Forwarder::start(&settings, aggregator, Arc::new(publisher));

        forwarder.submit(record(1, image("R1", "d1", 1, "aws.cloudtrail"))).await.unwrap();
        forwarder.submit(record(2, image("R1", "d1", 2, "aws.cloudtrail"))).await.unwrap();
        let stats = forwarder.shutdown().await.unwrap();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.created, 0);
    }

    #[test]
    fn test_change_record_json() {
        let json = r#"{"sequence": 7, "newImage": {"ruleId": {"S": "R1"}, "eventCount": {"N": "2"}}}"#;
        let record: ChangeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.sequence, 7);
        assert_eq!(record.new_image.unwrap()["eventCount"].as_integer(), Ok(2));

        let deletion: ChangeRecord = serde_json::from_str(r#"{"sequence": 8}"#).unwrap();
        assert!(deletion.new_image.is_none());
    }
}
