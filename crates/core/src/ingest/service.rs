//! Per-cycle ingestion state machine.
//!
//! One cycle: drain due dead letters in a bounded batch, then
//! fetch → process → checkpoint-or-record-failure. The watermark advances
//! to the cycle's `poll_start` only when every item in the batch processed
//! successfully; otherwise the whole window, including already-succeeded
//! idempotent items, is re-fetched next cycle.
//!
//! `poll_start` is captured by the caller *before* the fetch is issued, and
//! the fetch window starts `overlap_buffer` before the stored watermark.
//! The overlap compensates for clock skew and in-flight writes at the
//! source, so no item is permanently skipped even when cycle windows
//! overlap.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use tradewatch_domain::{CycleReport, DeadLetterStatus, IngestConfig, ProcessError, Result, TradeEvent};

use super::ports::{CheckpointStore, DeadLetterQueue, ItemProcessor, TradeFeedSource};

/// Window and dead-letter knobs for one source's cycles.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub source_name: String,
    pub overlap_buffer: Duration,
    pub initial_lookback: Duration,
    pub dlq_drain_batch: usize,
}

impl IngestionSettings {
    /// Per-source settings from the application ingest configuration.
    pub fn for_source(source_name: impl Into<String>, config: &IngestConfig) -> Self {
        Self {
            source_name: source_name.into(),
            overlap_buffer: Duration::seconds(config.overlap_buffer_seconds as i64),
            initial_lookback: Duration::seconds(config.initial_lookback_seconds as i64),
            dlq_drain_batch: config.dlq_drain_batch,
        }
    }
}

/// Orchestrates fetch → process → checkpoint for one named source.
///
/// The service is cycle-scoped and synchronous in structure; interval
/// timing, drift correction and cancellation belong to the worker that
/// calls [`IngestionService::run_cycle`] once per tick.
pub struct IngestionService {
    settings: IngestionSettings,
    feed: Arc<dyn TradeFeedSource>,
    processor: Arc<dyn ItemProcessor>,
    checkpoints: Arc<dyn CheckpointStore>,
    dead_letters: Arc<dyn DeadLetterQueue>,
}

impl IngestionService {
    pub fn new(
        settings: IngestionSettings,
        feed: Arc<dyn TradeFeedSource>,
        processor: Arc<dyn ItemProcessor>,
        checkpoints: Arc<dyn CheckpointStore>,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> Self {
        Self { settings, feed, processor, checkpoints, dead_letters }
    }

    pub fn source_name(&self) -> &str {
        &self.settings.source_name
    }

    /// Run one full cycle with `poll_start` captured before the fetch.
    ///
    /// Feed failures (including protection-stack rejections) are recorded
    /// via the checkpoint store and reported, not propagated: a failed
    /// cycle leaves the watermark untouched and the loop continues on
    /// schedule. Only storage errors bubble up, since without the store
    /// no progress can be recorded at all.
    pub async fn run_cycle(&self, poll_start: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.drain_dead_letters(poll_start, &mut report).await?;

        let watermark = match self.checkpoints.get(&self.settings.source_name).await? {
            Some(checkpoint) => checkpoint.watermark,
            None => poll_start - self.settings.initial_lookback,
        };
        let since = watermark - self.settings.overlap_buffer;

        let items = match self.feed.fetch(since, poll_start).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    source = %self.settings.source_name,
                    error = %err,
                    "fetch failed, checkpoint left untouched"
                );
                self.checkpoints
                    .record_failure(&self.settings.source_name, watermark, &err.to_string(), 0)
                    .await?;
                return Ok(report);
            }
        };

        report.fetched = items.len();
        debug!(
            source = %self.settings.source_name,
            fetched = items.len(),
            since = %since,
            until = %poll_start,
            "fetched polling window"
        );

        let mut last_failure: Option<String> = None;
        for item in &items {
            match self.processor.process(item).await {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        source = %self.settings.source_name,
                        trade_key = %item.trade_key,
                        error = %err,
                        "item processing failed, parking in dead-letter queue"
                    );
                    self.park_failed_item(item, &err).await?;
                    last_failure = Some(format!("{}: {err}", item.trade_key));
                }
            }
        }

        if report.failed == 0 {
            self.checkpoints
                .save(&self.settings.source_name, poll_start, report.processed as u64)
                .await?;
            report.checkpoint_advanced = true;
            if report.processed > 0 {
                info!(
                    source = %self.settings.source_name,
                    processed = report.processed,
                    watermark = %poll_start,
                    "batch complete, checkpoint advanced"
                );
            }
        } else {
            let reason = last_failure.unwrap_or_else(|| "item processing failed".into());
            self.checkpoints
                .record_failure(
                    &self.settings.source_name,
                    watermark,
                    &reason,
                    report.failed as u64,
                )
                .await?;
            warn!(
                source = %self.settings.source_name,
                processed = report.processed,
                failed = report.failed,
                "batch had failures, checkpoint NOT updated; window will be re-fetched"
            );
        }

        Ok(report)
    }

    /// Park one failed item. Permanent failures skip the retry schedule
    /// and land directly in ABANDONED, still queryable for audit.
    async fn park_failed_item(&self, item: &TradeEvent, err: &ProcessError) -> Result<()> {
        let payload = serde_json::to_value(item)
            .unwrap_or_else(|_| serde_json::Value::String(item.trade_key.clone()));
        self.dead_letters.add(&item.trade_key, &payload, &err.to_string()).await?;
        if !err.is_transient() {
            self.dead_letters.abandon(&item.trade_key, &err.to_string()).await?;
        }
        Ok(())
    }

    /// Reprocess due dead letters in a bounded batch before the fetch.
    async fn drain_dead_letters(
        &self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let due = self.dead_letters.get_due(now, self.settings.dlq_drain_batch).await?;
        if due.is_empty() {
            return Ok(());
        }
        info!(
            source = %self.settings.source_name,
            due = due.len(),
            "retrying due dead-letter items"
        );

        for dead in due {
            let event: TradeEvent = match serde_json::from_value(dead.payload.clone()) {
                Ok(event) => event,
                Err(err) => {
                    // An unreadable snapshot can never succeed.
                    warn!(trade_key = %dead.trade_key, error = %err, "dead-letter payload unreadable");
                    self.dead_letters
                        .abandon(&dead.trade_key, &format!("payload unreadable: {err}"))
                        .await?;
                    report.dead_letters_abandoned += 1;
                    continue;
                }
            };

            match self.processor.process(&event).await {
                Ok(()) => {
                    self.dead_letters.mark_resolved(&dead.trade_key).await?;
                    report.dead_letters_resolved += 1;
                    info!(trade_key = %dead.trade_key, "dead-letter item resolved");
                }
                Err(err) if err.is_transient() => {
                    let status =
                        self.dead_letters.increment_retry(&dead.trade_key, now).await?;
                    if status == DeadLetterStatus::Abandoned {
                        report.dead_letters_abandoned += 1;
                        warn!(trade_key = %dead.trade_key, "dead-letter item abandoned after exhausting retries");
                    } else {
                        report.dead_letters_retried += 1;
                    }
                }
                Err(err) => {
                    self.dead_letters.abandon(&dead.trade_key, &err.to_string()).await?;
                    report.dead_letters_abandoned += 1;
                    warn!(trade_key = %dead.trade_key, error = %err, "dead-letter item abandoned");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tradewatch_domain::{DeadLetterTrade, PollCheckpoint, TradewatchError};

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn event(key: &str, at: DateTime<Utc>) -> TradeEvent {
        TradeEvent {
            trade_key: key.to_string(),
            wallet: Some("0xabc".into()),
            market_id: Some("m-1".into()),
            market_title: Some("Will it happen?".into()),
            side: Some("BUY".into()),
            price: 0.4,
            size: 50_000.0,
            notional_usd: 20_000.0,
            occurred_at: at,
            payload: serde_json::json!({"transactionHash": key}),
        }
    }

    #[derive(Default)]
    struct MockFeed {
        items: Mutex<Vec<TradeEvent>>,
        windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
        fail: bool,
    }

    #[async_trait]
    impl TradeFeedSource for MockFeed {
        async fn fetch(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<TradeEvent>> {
            self.windows.lock().unwrap().push((since, until));
            if self.fail {
                return Err(TradewatchError::Network("feed unavailable".into()));
            }
            Ok(self.items.lock().unwrap().clone())
        }
    }

    /// Processor that fails configured keys and remembers everything it saw.
    #[derive(Default)]
    struct MockProcessor {
        transient_failures: HashSet<String>,
        permanent_failures: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ItemProcessor for MockProcessor {
        async fn process(&self, item: &TradeEvent) -> std::result::Result<(), ProcessError> {
            self.seen.lock().unwrap().push(item.trade_key.clone());
            if self.permanent_failures.contains(&item.trade_key) {
                return Err(ProcessError::Permanent("bad data".into()));
            }
            if self.transient_failures.contains(&item.trade_key) {
                return Err(ProcessError::Transient("downstream timeout".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockCheckpoints {
        stored: Mutex<Option<PollCheckpoint>>,
        failures: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl CheckpointStore for MockCheckpoints {
        async fn get(&self, _source: &str) -> Result<Option<PollCheckpoint>> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn save(
            &self,
            source: &str,
            watermark: DateTime<Utc>,
            processed: u64,
        ) -> Result<()> {
            let mut stored = self.stored.lock().unwrap();
            let previous = stored.take();
            *stored = Some(PollCheckpoint {
                source_name: source.to_string(),
                watermark,
                total_processed: previous.as_ref().map_or(0, |c| c.total_processed) + processed,
                total_failures: previous.as_ref().map_or(0, |c| c.total_failures),
                last_failure_at: None,
                last_failure_reason: None,
                created_at: watermark,
                updated_at: watermark,
            });
            Ok(())
        }

        async fn record_failure(
            &self,
            _source: &str,
            _watermark: DateTime<Utc>,
            reason: &str,
            failed: u64,
        ) -> Result<()> {
            self.failures.lock().unwrap().push((reason.to_string(), failed));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDlq {
        items: Mutex<HashMap<String, DeadLetterTrade>>,
        max_retries: u32,
    }

    impl MockDlq {
        fn with_due(items: Vec<DeadLetterTrade>) -> Self {
            let map = items.into_iter().map(|i| (i.trade_key.clone(), i)).collect();
            Self { items: Mutex::new(map), max_retries: 5 }
        }

        fn status_of(&self, key: &str) -> Option<DeadLetterStatus> {
            self.items.lock().unwrap().get(key).map(|i| i.status)
        }
    }

    fn dead(key: &str, at: DateTime<Utc>, retry_count: u32) -> DeadLetterTrade {
        DeadLetterTrade {
            trade_key: key.to_string(),
            payload: serde_json::to_value(event(key, at)).unwrap(),
            failure_reason: "downstream timeout".into(),
            failure_count: 1,
            first_failure_at: at,
            last_failure_at: at,
            retry_count,
            max_retries: 5,
            next_retry_at: Some(at),
            status: DeadLetterStatus::Pending,
            resolved_at: None,
            resolution_notes: None,
        }
    }

    #[async_trait]
    impl DeadLetterQueue for MockDlq {
        async fn add(
            &self,
            trade_key: &str,
            payload: &serde_json::Value,
            reason: &str,
        ) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(existing) = items.get_mut(trade_key) {
                existing.failure_count += 1;
                existing.failure_reason = reason.to_string();
            } else {
                let mut item = dead(trade_key, Utc::now(), 0);
                item.payload = payload.clone();
                item.failure_reason = reason.to_string();
                // Fresh items are eligible for the next drain immediately.
                item.next_retry_at = None;
                items.insert(trade_key.to_string(), item);
            }
            Ok(())
        }

        async fn get_due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<DeadLetterTrade>> {
            let items = self.items.lock().unwrap();
            let mut due: Vec<_> = items
                .values()
                .filter(|i| !i.status.is_terminal())
                .filter(|i| i.next_retry_at.map_or(true, |at| at <= now))
                .cloned()
                .collect();
            due.sort_by_key(|i| i.first_failure_at);
            due.truncate(limit);
            Ok(due)
        }

        async fn mark_resolved(&self, trade_key: &str) -> Result<()> {
            if let Some(item) = self.items.lock().unwrap().get_mut(trade_key) {
                item.status = DeadLetterStatus::Resolved;
            }
            Ok(())
        }

        async fn increment_retry(
            &self,
            trade_key: &str,
            _now: DateTime<Utc>,
        ) -> Result<DeadLetterStatus> {
            let mut items = self.items.lock().unwrap();
            let item = items
                .get_mut(trade_key)
                .ok_or_else(|| TradewatchError::NotFound(trade_key.to_string()))?;
            item.retry_count += 1;
            item.status = if item.retry_count >= self.max_retries.max(1) {
                DeadLetterStatus::Abandoned
            } else {
                DeadLetterStatus::Retrying
            };
            Ok(item.status)
        }

        async fn abandon(&self, trade_key: &str, notes: &str) -> Result<()> {
            if let Some(item) = self.items.lock().unwrap().get_mut(trade_key) {
                item.status = DeadLetterStatus::Abandoned;
                item.resolution_notes = Some(notes.to_string());
            }
            Ok(())
        }

        async fn pending_count(&self) -> Result<u64> {
            Ok(self.items.lock().unwrap().values().filter(|i| !i.status.is_terminal()).count()
                as u64)
        }
    }

    fn settings() -> IngestionSettings {
        IngestionSettings {
            source_name: "trade-feed".into(),
            overlap_buffer: Duration::seconds(5),
            initial_lookback: Duration::seconds(3600),
            dlq_drain_batch: 10,
        }
    }

    fn service(
        feed: Arc<MockFeed>,
        processor: Arc<MockProcessor>,
        checkpoints: Arc<MockCheckpoints>,
        dlq: Arc<MockDlq>,
    ) -> IngestionService {
        IngestionService::new(settings(), feed, processor, checkpoints, dlq)
    }

    #[tokio::test]
    async fn clean_batch_advances_watermark_to_poll_start() {
        let poll_start = ts(1_700_000_000);
        let feed = Arc::new(MockFeed {
            items: Mutex::new(vec![event("t1", poll_start), event("t2", poll_start)]),
            ..MockFeed::default()
        });
        let checkpoints = Arc::new(MockCheckpoints::default());
        let svc = service(
            Arc::clone(&feed),
            Arc::new(MockProcessor::default()),
            Arc::clone(&checkpoints),
            Arc::new(MockDlq::default()),
        );

        let report = svc.run_cycle(poll_start).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert!(report.checkpoint_advanced);
        let stored = checkpoints.stored.lock().unwrap().clone().unwrap();
        assert_eq!(stored.watermark, poll_start);
        assert_eq!(stored.total_processed, 2);
    }

    #[tokio::test]
    async fn any_failure_leaves_watermark_untouched_and_parks_item() {
        let poll_start = ts(1_700_000_000);
        let feed = Arc::new(MockFeed {
            items: Mutex::new(vec![event("ok", poll_start), event("bad", poll_start)]),
            ..MockFeed::default()
        });
        let checkpoints = Arc::new(MockCheckpoints::default());
        let dlq = Arc::new(MockDlq::default());
        let processor = Arc::new(MockProcessor {
            transient_failures: HashSet::from(["bad".to_string()]),
            ..MockProcessor::default()
        });
        let svc = service(feed, processor, Arc::clone(&checkpoints), Arc::clone(&dlq));

        let report = svc.run_cycle(poll_start).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.checkpoint_advanced);
        assert!(checkpoints.stored.lock().unwrap().is_none());
        assert_eq!(checkpoints.failures.lock().unwrap().len(), 1);
        assert_eq!(dlq.status_of("bad"), Some(DeadLetterStatus::Pending));
    }

    #[tokio::test]
    async fn permanent_failure_goes_straight_to_abandoned() {
        let poll_start = ts(1_700_000_000);
        let feed = Arc::new(MockFeed {
            items: Mutex::new(vec![event("poison", poll_start)]),
            ..MockFeed::default()
        });
        let dlq = Arc::new(MockDlq::default());
        let processor = Arc::new(MockProcessor {
            permanent_failures: HashSet::from(["poison".to_string()]),
            ..MockProcessor::default()
        });
        let svc =
            service(feed, processor, Arc::new(MockCheckpoints::default()), Arc::clone(&dlq));

        svc.run_cycle(poll_start).await.unwrap();

        assert_eq!(dlq.status_of("poison"), Some(DeadLetterStatus::Abandoned));
    }

    #[tokio::test]
    async fn fetch_failure_records_without_crashing_or_checkpointing() {
        let poll_start = ts(1_700_000_000);
        let feed = Arc::new(MockFeed { fail: true, ..MockFeed::default() });
        let checkpoints = Arc::new(MockCheckpoints::default());
        let svc = service(
            feed,
            Arc::new(MockProcessor::default()),
            Arc::clone(&checkpoints),
            Arc::new(MockDlq::default()),
        );

        let report = svc.run_cycle(poll_start).await.unwrap();

        assert_eq!(report.fetched, 0);
        assert!(!report.checkpoint_advanced);
        assert!(checkpoints.stored.lock().unwrap().is_none());
        let failures = checkpoints.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].0.contains("feed unavailable"));
    }

    #[tokio::test]
    async fn first_cycle_uses_initial_lookback_then_watermark_with_overlap() {
        let first_start = ts(1_700_000_000);
        let feed = Arc::new(MockFeed::default());
        let checkpoints = Arc::new(MockCheckpoints::default());
        let svc = service(
            Arc::clone(&feed),
            Arc::new(MockProcessor::default()),
            Arc::clone(&checkpoints),
            Arc::new(MockDlq::default()),
        );

        svc.run_cycle(first_start).await.unwrap();
        // Second cycle 60s later; the empty first batch advanced the watermark.
        let second_start = first_start + Duration::seconds(60);
        svc.run_cycle(second_start).await.unwrap();

        let windows = feed.windows.lock().unwrap();
        assert_eq!(windows[0], (first_start - Duration::seconds(3600 + 5), first_start));
        assert_eq!(windows[1], (first_start - Duration::seconds(5), second_start));
    }

    #[tokio::test]
    async fn failed_item_window_is_refetched_and_succeeds_next_cycle() {
        // End-to-end over mocks: cycle 1 has a failing item, watermark
        // holds; cycle 2 re-fetches the same window and succeeds.
        let first_start = ts(1_700_000_000);
        let trade_at = first_start - Duration::seconds(2);
        let feed = Arc::new(MockFeed {
            items: Mutex::new(vec![event("flaky", trade_at)]),
            ..MockFeed::default()
        });
        let checkpoints = Arc::new(MockCheckpoints::default());
        let dlq = Arc::new(MockDlq::default());
        let processor = Arc::new(MockProcessor {
            transient_failures: HashSet::from(["flaky".to_string()]),
            ..MockProcessor::default()
        });
        let svc = service(
            Arc::clone(&feed),
            Arc::clone(&processor),
            Arc::clone(&checkpoints),
            Arc::clone(&dlq),
        );

        svc.run_cycle(first_start).await.unwrap();
        assert!(checkpoints.stored.lock().unwrap().is_none());

        // The item heals; drain also replays it from the dead-letter queue.
        let svc = service(
            Arc::clone(&feed),
            Arc::new(MockProcessor::default()),
            Arc::clone(&checkpoints),
            Arc::clone(&dlq),
        );
        let second_start = first_start + Duration::seconds(60);
        let report = svc.run_cycle(second_start).await.unwrap();

        assert!(report.checkpoint_advanced);
        assert_eq!(report.dead_letters_resolved, 1);
        let stored = checkpoints.stored.lock().unwrap().clone().unwrap();
        assert_eq!(stored.watermark, second_start);
        // The second window still covered the failed trade's timestamp.
        let windows = feed.windows.lock().unwrap();
        assert!(windows[1].0 <= trade_at && trade_at <= windows[1].1);
    }

    #[tokio::test]
    async fn due_dead_letters_are_drained_before_the_fetch() {
        let now = ts(1_700_000_000);
        let dlq = Arc::new(MockDlq::with_due(vec![
            dead("heals", now - Duration::seconds(120), 1),
            dead("still-broken", now - Duration::seconds(60), 1),
        ]));
        let processor = Arc::new(MockProcessor {
            transient_failures: HashSet::from(["still-broken".to_string()]),
            ..MockProcessor::default()
        });
        let svc = service(
            Arc::new(MockFeed::default()),
            Arc::clone(&processor),
            Arc::new(MockCheckpoints::default()),
            Arc::clone(&dlq),
        );

        let report = svc.run_cycle(now).await.unwrap();

        assert_eq!(report.dead_letters_resolved, 1);
        assert_eq!(report.dead_letters_retried, 1);
        assert_eq!(dlq.status_of("heals"), Some(DeadLetterStatus::Resolved));
        assert_eq!(dlq.status_of("still-broken"), Some(DeadLetterStatus::Retrying));
        // Oldest first: "heals" was seen before "still-broken".
        let seen = processor.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["heals", "still-broken"]);
    }

    #[tokio::test]
    async fn reprocessing_already_succeeded_items_is_harmless() {
        // The overlap re-fetch hands the same key to the processor twice;
        // idempotent downstreams make that a no-op.
        let poll_start = ts(1_700_000_000);
        let item = event("dup", poll_start - Duration::seconds(1));
        let feed = Arc::new(MockFeed {
            items: Mutex::new(vec![item.clone()]),
            ..MockFeed::default()
        });
        let processor = Arc::new(MockProcessor::default());
        let checkpoints = Arc::new(MockCheckpoints::default());
        let svc = service(
            Arc::clone(&feed),
            Arc::clone(&processor),
            Arc::clone(&checkpoints),
            Arc::new(MockDlq::default()),
        );

        svc.run_cycle(poll_start).await.unwrap();
        svc.run_cycle(poll_start + Duration::seconds(60)).await.unwrap();

        let seen = processor.seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|k| *k == "dup").count(), 2);
        let stored = checkpoints.stored.lock().unwrap().clone().unwrap();
        // Counted twice upstream, but both cycles checkpointed cleanly.
        assert_eq!(stored.total_processed, 2);
    }
}
