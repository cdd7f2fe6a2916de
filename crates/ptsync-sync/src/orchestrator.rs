use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use ptsync_adapters::{ProfileScraper, ScrapeError, TerminalKind};
use ptsync_core::{header_row, Classification, ProfileField, WorkItem, SCHEMA_VERSION};
use ptsync_storage::{row_range, RateLimitedClient, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::coordinator::{AppliedProfile, ApplyError, WriteCoordinator};
use crate::index::EntityIndex;
use crate::summary::{append_dashboard_row, ensure_dashboard_header, next_run_number, RunOutcome, RunSummary};
use crate::tags::TagMap;
use crate::work_queue::{WorkQueue, WORK_HEADER};

/// How one work item ended when it did not reconcile cleanly.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error("snapshot has a blank profile key")]
    MissingKey,
    #[error("{0}")]
    Retryable(String),
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Fatal(StoreError),
}

impl From<ApplyError> for ItemFailure {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::MissingKey => ItemFailure::MissingKey,
            ApplyError::Store(err) if err.is_rate_limited() => ItemFailure::Retryable(err.to_string()),
            ApplyError::Store(err) => ItemFailure::Fatal(err),
        }
    }
}

#[derive(Debug)]
pub enum ItemOutcome {
    Applied(AppliedProfile),
    /// Account can no longer be scraped; what was known has been persisted.
    Terminal { kind: TerminalKind, reason: String },
}

pub struct RunOrchestrator {
    config: EngineConfig,
    client: Arc<RateLimitedClient>,
    scraper: Arc<dyn ProfileScraper>,
}

impl RunOrchestrator {
    pub fn new(config: EngineConfig, client: Arc<RateLimitedClient>, scraper: Arc<dyn ProfileScraper>) -> Self {
        Self {
            config,
            client,
            scraper,
        }
    }

    /// Create missing sheets and header rows. The tag sheet is optional and left alone.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        let sheets = &self.config.sheets;
        for sheet in [&sheets.profiles, &sheets.work_items, &sheets.dashboard] {
            self.client.ensure_sheet(sheet).await?;
        }
        if self.ensure_header(&sheets.profiles, header_row()).await? {
            info!(sheet = %sheets.profiles, schema_version = SCHEMA_VERSION, "profile columns initialized");
            if let Err(err) = self.client.freeze_header_row(&sheets.profiles).await {
                warn!(sheet = %sheets.profiles, error = %err, "could not freeze header row");
            }
        }
        let work_header = WORK_HEADER.iter().map(|h| h.to_string()).collect();
        self.ensure_header(&sheets.work_items, work_header).await?;
        ensure_dashboard_header(&self.client, &sheets.dashboard).await
    }

    /// Returns true when the header had to be written.
    async fn ensure_header(&self, sheet: &str, header: Vec<String>) -> Result<bool, StoreError> {
        let rows = self.client.read_all(sheet).await?;
        let blank = rows
            .first()
            .map_or(true, |first| first.iter().all(|cell| cell.trim().is_empty()));
        if !blank {
            return Ok(false);
        }
        info!(sheet, "initializing header row");
        let range = row_range(1, 0, header.len().saturating_sub(1));
        self.client.write_range(sheet, &range, vec![header]).await?;
        Ok(true)
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.client.sleep(duration) => true,
        }
    }

    async fn process_item(
        &self,
        coordinator: &mut WriteCoordinator,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, ItemFailure> {
        let scraped = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ItemFailure::Interrupted),
            scraped = self.scraper.scrape(&item.key) => scraped,
        };

        let outcome = match scraped {
            Ok(snapshot) => {
                let snapshot = snapshot.with(ProfileField::Source, item.source.as_str());
                ItemOutcome::Applied(coordinator.apply(&snapshot).await?)
            }
            Err(ScrapeError::Terminal {
                kind,
                reason,
                snapshot,
            }) => {
                let snapshot = (*snapshot).with(ProfileField::Source, item.source.as_str());
                coordinator.apply(&snapshot).await?;
                ItemOutcome::Terminal { kind, reason }
            }
            Err(err @ (ScrapeError::Timeout(_) | ScrapeError::Blocked(_) | ScrapeError::Extract(_))) => {
                return Err(ItemFailure::Retryable(err.to_string()));
            }
        };

        // The write has finished; a cancel that arrived meanwhile still leaves the item pending.
        if cancel.is_cancelled() {
            return Err(ItemFailure::Interrupted);
        }
        Ok(outcome)
    }

    /// Flush queued statuses. Returns the error only when it should end the run.
    async fn flush(&self, queue: &mut WorkQueue) -> Result<(), StoreError> {
        match queue.flush().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_rate_limited() => {
                warn!(queued = queue.queued(), error = %err, "status flush deferred");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::new(Uuid::new_v4(), self.config.trigger);
        let sheets = &self.config.sheets;
        let clock = self.config.clock;

        self.bootstrap().await.context("preparing sheets")?;
        let mut queue = WorkQueue::new(self.client.clone(), &sheets.work_items, clock);
        if let Err(err) = queue.normalize_statuses().await {
            warn!(error = %err, "status normalization failed");
        }
        let index = EntityIndex::load(&self.client, &sheets.profiles)
            .await
            .context("loading profile index")?;
        let tags = TagMap::load(&self.client, &sheets.tags)
            .await
            .context("loading tag lookup")?;
        let mut items = queue.load_pending().await.context("loading work items")?;
        if self.config.max_items_per_run > 0 {
            items.truncate(self.config.max_items_per_run);
        }

        let mut coordinator = WriteCoordinator::new(
            self.client.clone(),
            sheets.profiles.as_str(),
            index,
            tags,
            clock,
            self.config.site_base_url.as_str(),
        );
        let total = items.len();
        info!(run_id = %summary.run_id, total, trigger = self.config.trigger.as_str(), "starting run");

        for (position, item) in items.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                summary.outcome = RunOutcome::Interrupted;
                break;
            }

            let span = info_span!("work_item", run_id = %summary.run_id, key = %item.key, row = item.row);
            info!(parent: &span, progress = position + 1, total, "processing");
            let result = self
                .process_item(&mut coordinator, item, cancel)
                .instrument(span)
                .await;

            match result {
                Ok(ItemOutcome::Applied(applied)) => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                    match applied.classification {
                        Classification::New => summary.new += 1,
                        Classification::Updated => summary.updated += 1,
                        Classification::Unchanged => summary.unchanged += 1,
                    }
                    queue.mark_done(item, &applied);
                }
                Ok(ItemOutcome::Terminal { kind, reason }) => {
                    summary.processed += 1;
                    summary.suspended += 1;
                    warn!(key = %item.key, %kind, reason = %reason, "account is not scrapable");
                    queue.mark_terminal(item, kind, &reason);
                }
                Err(ItemFailure::MissingKey) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    error!(key = %item.key, "scraped snapshot has no profile key");
                    queue.mark_missing_key(item);
                }
                Err(ItemFailure::Retryable(message)) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    error!(key = %item.key, error = %message, "item failed, will retry next run");
                    queue.mark_retry(item, &message);
                }
                Err(ItemFailure::Interrupted) => {
                    summary.interrupted += 1;
                    summary.outcome = RunOutcome::Interrupted;
                    warn!(key = %item.key, "run interrupted");
                    queue.mark_interrupted(item);
                    break;
                }
                Err(ItemFailure::Fatal(err)) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    summary.outcome = RunOutcome::Aborted;
                    summary.error = Some(err.to_string());
                    error!(key = %item.key, error = %err, "remote store failure, aborting run");
                    queue.mark_run_error(item, &err.to_string());
                    break;
                }
            }

            let done = position + 1;
            if done == total {
                break;
            }
            if self.config.batch_size > 0 && done % self.config.batch_size == 0 {
                if let Err(err) = self.flush(&mut queue).await {
                    error!(error = %err, "status flush failed, aborting run");
                    summary.outcome = RunOutcome::Aborted;
                    summary.error = Some(err.to_string());
                    break;
                }
                info!(cooloff_secs = self.config.batch_cooloff.as_secs_f64(), "batch cool-off");
                self.client.on_batch().await;
                if !self.pause(self.config.batch_cooloff, cancel).await {
                    summary.outcome = RunOutcome::Interrupted;
                    break;
                }
            }
            let pace = self.client.next_pace().await;
            if !self.pause(pace, cancel).await {
                summary.outcome = RunOutcome::Interrupted;
                break;
            }
        }

        if let Err(err) = queue.flush().await {
            error!(queued = queue.queued(), error = %err, "final status flush failed; items stay pending");
            if summary.outcome == RunOutcome::Completed {
                summary.outcome = RunOutcome::Aborted;
            }
            summary.error.get_or_insert_with(|| err.to_string());
        }

        summary.finished_at = Utc::now();
        let stats = self.client.stats();
        summary.remote_calls = stats.calls;
        summary.rate_limit_hits = stats.rate_limit_hits;

        if summary.outcome != RunOutcome::Aborted {
            self.record_on_dashboard(&mut summary).await;
        }

        let outcome = summary.outcome.as_str();
        if summary.is_success() {
            info!(
                run_id = %summary.run_id,
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                suspended = summary.suspended,
                new = summary.new,
                updated = summary.updated,
                unchanged = summary.unchanged,
                remote_calls = summary.remote_calls,
                rate_limit_hits = summary.rate_limit_hits,
                "run completed"
            );
        } else {
            warn!(
                run_id = %summary.run_id,
                outcome,
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                interrupted = summary.interrupted,
                error = summary.error.as_deref().unwrap_or_default(),
                "run did not complete"
            );
        }
        Ok(summary)
    }

    async fn record_on_dashboard(&self, summary: &mut RunSummary) {
        let sheet = &self.config.sheets.dashboard;
        let recorded = async {
            summary.run_number = next_run_number(&self.client, sheet).await?;
            append_dashboard_row(&self.client, sheet, summary, &self.config.clock).await
        }
        .await;
        if let Err(err) = recorded {
            warn!(sheet = %sheet, error = %err, "dashboard update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ptsync_core::{ProfileRecord, WorkStatus};
    use ptsync_storage::{ClientConfig, MemorySheetStore, Pause, RecordingPause, SheetStore, StoreOp};

    use super::*;
    use crate::config::SheetNames;
    use crate::summary::DASHBOARD_HEADER;

    enum Script {
        Profile(ProfileRecord),
        Timeout,
        Suspended,
        BlankKey,
        CancelWhileScraping(CancellationToken),
    }

    #[derive(Default)]
    struct ScriptedScraper {
        scripts: HashMap<String, Script>,
    }

    impl ScriptedScraper {
        fn with(mut self, key: &str, script: Script) -> Self {
            self.scripts.insert(key.to_string(), script);
            self
        }
    }

    #[async_trait]
    impl ProfileScraper for ScriptedScraper {
        async fn scrape(&self, key: &str) -> Result<ProfileRecord, ScrapeError> {
            match self.scripts.get(key) {
                Some(Script::Profile(record)) => Ok(record.clone()),
                Some(Script::Timeout) => Err(ScrapeError::Timeout(format!("/users/{key}/"))),
                Some(Script::Suspended) => Err(ScrapeError::Terminal {
                    kind: TerminalKind::Suspended,
                    reason: "accounts suspend".to_string(),
                    snapshot: Box::new(
                        ProfileRecord::for_key(key)
                            .with(ProfileField::Status, "Banned")
                            .with(ProfileField::Intro, "Account Suspended: accounts suspend"),
                    ),
                }),
                Some(Script::BlankKey) => Ok(ProfileRecord::empty()),
                Some(Script::CancelWhileScraping(token)) => {
                    token.cancel();
                    Ok(ProfileRecord::for_key(key))
                }
                None => Ok(ProfileRecord::for_key(key).with(ProfileField::City, "Lahore")),
            }
        }
    }

    struct Harness {
        store: Arc<MemorySheetStore>,
        pause: Arc<RecordingPause>,
        orchestrator: RunOrchestrator,
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn work_sheet(keys: &[&str]) -> Vec<Vec<String>> {
        std::iter::once(row(&WORK_HEADER))
            .chain(keys.iter().map(|k| row(&[k, ""])))
            .collect()
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            batch_size: 2,
            batch_cooloff: Duration::from_secs(8),
            ..EngineConfig::default()
        }
    }

    /// Cancels `cancel` on its `cancel_on`-th call and then never wakes; other calls return at once.
    struct CancellingPause {
        cancel: CancellationToken,
        cancel_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Pause for CancellingPause {
        async fn pause(&self, _duration: Duration) {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_on {
                self.cancel.cancel();
                std::future::pending::<()>().await;
            }
        }
    }

    fn orchestrator_with(
        store: &Arc<MemorySheetStore>,
        pause: Arc<dyn Pause>,
        scraper: ScriptedScraper,
        config: EngineConfig,
    ) -> RunOrchestrator {
        let client = Arc::new(RateLimitedClient::new(
            store.clone(),
            pause,
            ClientConfig {
                write_pause: Duration::ZERO,
                ..ClientConfig::default()
            },
        ));
        RunOrchestrator::new(config, client, Arc::new(scraper))
    }

    fn harness(store: MemorySheetStore, scraper: ScriptedScraper, config: EngineConfig) -> Harness {
        let store = Arc::new(store);
        let pause = Arc::new(RecordingPause::new());
        let orchestrator = orchestrator_with(&store, pause.clone(), scraper, config);
        Harness {
            store,
            pause,
            orchestrator,
        }
    }

    fn seeded(work: Vec<Vec<String>>, profiles: Vec<Vec<String>>) -> MemorySheetStore {
        let sheets = SheetNames::default();
        MemorySheetStore::new()
            .with_sheet(&sheets.profiles, profiles)
            .with_sheet(&sheets.work_items, work)
    }

    async fn status_of(store: &MemorySheetStore, row: usize) -> (String, String) {
        let sheet = store.sheet("Target").await.unwrap();
        let cells = &sheet[row - 1];
        (
            cells.get(1).cloned().unwrap_or_default(),
            cells.get(2).cloned().unwrap_or_default(),
        )
    }

    #[tokio::test]
    async fn run_reconciles_every_kind_of_item() {
        let sara_before = ProfileRecord::for_key("sara")
            .with(ProfileField::Age, "24")
            .with(ProfileField::Source, "Target")
            .to_row();
        let store = seeded(
            work_sheet(&["ali", "sara", "umar", "zoya"]),
            vec![header_row(), sara_before],
        );
        let scraper = ScriptedScraper::default()
            .with("sara", Script::Profile(ProfileRecord::for_key("sara").with(ProfileField::Age, "25")))
            .with("umar", Script::Timeout)
            .with("zoya", Script::Suspended);
        let h = harness(store, scraper, engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.suspended, 1);
        assert_eq!((summary.new, summary.updated, summary.unchanged), (1, 1, 0));
        assert_eq!(summary.run_number, 1);

        let (status, remark) = status_of(&h.store, 2).await;
        assert_eq!(status, WorkStatus::Done.marker());
        assert!(remark.starts_with("[NEW] New Profile added @ "), "{remark}");
        let (status, remark) = status_of(&h.store, 3).await;
        assert_eq!(status, WorkStatus::Done.marker());
        assert!(remark.starts_with("[UPDATED] Updated: AGE @ "), "{remark}");
        let (status, remark) = status_of(&h.store, 4).await;
        assert_eq!(status, WorkStatus::Pending.marker());
        assert!(remark.starts_with("Retry needed: timed out loading /users/umar/"), "{remark}");
        let (status, remark) = status_of(&h.store, 5).await;
        assert_eq!(status, WorkStatus::Error.marker());
        assert!(remark.starts_with("Suspended: accounts suspend @ "), "{remark}");

        let profiles = h.store.sheet("ProfilesTarget").await.unwrap();
        assert_eq!(profiles.len(), 4);
        let zoya = profiles
            .iter()
            .find(|r| r[ProfileField::NickName.index()] == "zoya")
            .unwrap();
        assert_eq!(zoya[ProfileField::Status.index()], "Banned");
        assert_eq!(zoya[ProfileField::Intro.index()], "Account Suspended: accounts suspend");

        // One cool-off after the first batch of two; none after the last item.
        let cooloffs = h
            .pause
            .recorded()
            .into_iter()
            .filter(|d| *d == Duration::from_secs(8))
            .count();
        assert_eq!(cooloffs, 1);
        assert_eq!(h.store.count_calls(StoreOp::BatchWrite).await, 2);

        let dashboard = h.store.sheet("Dashboard").await.unwrap();
        assert_eq!(dashboard[0], row(&DASHBOARD_HEADER));
        assert_eq!(dashboard[1][0], "1");
        assert_eq!(dashboard[1][2], "4");
    }

    #[tokio::test]
    async fn interrupted_item_is_left_pending() {
        let cancel = CancellationToken::new();
        let store = seeded(work_sheet(&["ali", "sara"]), vec![header_row()]);
        let scraper = ScriptedScraper::default().with("ali", Script::CancelWhileScraping(cancel.clone()));
        let h = harness(store, scraper, engine_config());

        let summary = h.orchestrator.run(&cancel).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert!(!summary.is_success());
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.succeeded, 0);

        let (status, remark) = status_of(&h.store, 2).await;
        assert_eq!(status, WorkStatus::Pending.marker());
        assert!(remark.starts_with("Interrupted @ "), "{remark}");
        assert_eq!(status_of(&h.store, 3).await, (String::new(), String::new()));
    }

    #[tokio::test]
    async fn cancel_during_pacing_stops_before_the_next_item() {
        let cancel = CancellationToken::new();
        let store = Arc::new(seeded(work_sheet(&["ali", "sara", "umar"]), vec![header_row()]));
        let pause = Arc::new(CancellingPause {
            cancel: cancel.clone(),
            cancel_on: 1,
            calls: AtomicUsize::new(0),
        });
        let config = EngineConfig {
            batch_size: 10,
            ..engine_config()
        };
        let orchestrator = orchestrator_with(&store, pause, ScriptedScraper::default(), config);

        let summary = orchestrator.run(&cancel).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert_eq!((summary.processed, summary.succeeded), (1, 1));

        let (status, remark) = status_of(&store, 2).await;
        assert_eq!(status, WorkStatus::Done.marker());
        assert!(remark.starts_with("[NEW] "), "{remark}");
        assert_eq!(status_of(&store, 3).await, (String::new(), String::new()));
        assert_eq!(status_of(&store, 4).await, (String::new(), String::new()));
        assert_eq!(store.sheet("ProfilesTarget").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_during_cooloff_keeps_the_finished_batch() {
        let cancel = CancellationToken::new();
        let store = Arc::new(seeded(work_sheet(&["ali", "sara", "umar"]), vec![header_row()]));
        // First pause paces after ali; the second is the cool-off after the batch of two.
        let pause = Arc::new(CancellingPause {
            cancel: cancel.clone(),
            cancel_on: 2,
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator_with(&store, pause, ScriptedScraper::default(), engine_config());

        let summary = orchestrator.run(&cancel).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert_eq!((summary.processed, summary.succeeded, summary.interrupted), (2, 2, 0));

        assert_eq!(status_of(&store, 2).await.0, WorkStatus::Done.marker());
        assert_eq!(status_of(&store, 3).await.0, WorkStatus::Done.marker());
        assert_eq!(status_of(&store, 4).await, (String::new(), String::new()));
        let dashboard = store.sheet("Dashboard").await.unwrap();
        assert_eq!(dashboard.len(), 2);
    }

    #[tokio::test]
    async fn unparseable_post_ages_are_stored_verbatim() {
        let store = seeded(work_sheet(&["ali", "sara"]), vec![header_row()]);
        let scraper = ScriptedScraper::default().with(
            "sara",
            Script::Profile(
                ProfileRecord::for_key("sara").with(ProfileField::LastPostTime, "1000000 years ago"),
            ),
        );
        let h = harness(store, scraper, engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(status_of(&h.store, 2).await.0, WorkStatus::Done.marker());
        assert_eq!(status_of(&h.store, 3).await.0, WorkStatus::Done.marker());

        let profiles = h.store.sheet("ProfilesTarget").await.unwrap();
        assert_eq!(profiles[2][ProfileField::KEY.index()], "sara");
        assert_eq!(profiles[2][ProfileField::LastPostTime.index()], "1000000 years ago");
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = seeded(work_sheet(&["ali"]), vec![header_row()]);
        let h = harness(store, ScriptedScraper::default(), engine_config());

        let summary = h.orchestrator.run(&cancel).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert_eq!(summary.processed, 0);
        assert_eq!(h.store.sheet("ProfilesTarget").await.unwrap().len(), 1);
        assert_eq!(h.store.count_calls(StoreOp::BatchWrite).await, 0);
    }

    #[tokio::test]
    async fn remote_outage_aborts_and_resets_the_item() {
        let store = seeded(work_sheet(&["ali", "sara"]), vec![header_row()]);
        store
            .fail_next(
                StoreOp::AppendRow,
                StoreError::Remote {
                    status: 500,
                    message: "internal".into(),
                },
            )
            .await;
        let h = harness(store, ScriptedScraper::default(), engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Aborted);
        assert!(summary.error.as_deref().unwrap().contains("internal"));
        assert_eq!(summary.processed, 1);

        let (status, remark) = status_of(&h.store, 2).await;
        assert_eq!(status, WorkStatus::Pending.marker());
        assert!(remark.starts_with("Run error: "), "{remark}");
        assert_eq!(status_of(&h.store, 3).await, (String::new(), String::new()));
        assert_eq!(h.store.sheet("Dashboard").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quota_exhaustion_is_retried_next_run() {
        let store = seeded(work_sheet(&["ali", "sara"]), vec![header_row()]);
        for _ in 0..4 {
            store
                .fail_next(StoreOp::AppendRow, StoreError::RateLimited("429".into()))
                .await;
        }
        let h = harness(store, ScriptedScraper::default(), engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!((summary.failed, summary.succeeded), (1, 1));
        assert_eq!(summary.rate_limit_hits, 4);

        let backoffs: Vec<_> = h
            .pause
            .recorded()
            .into_iter()
            .filter(|d| *d >= Duration::from_secs(30))
            .collect();
        assert_eq!(
            backoffs,
            vec![Duration::from_secs(30), Duration::from_secs(60), Duration::from_secs(120)]
        );
        let (status, remark) = status_of(&h.store, 2).await;
        assert_eq!(status, WorkStatus::Pending.marker());
        assert!(remark.starts_with("Retry needed: remote quota exceeded"), "{remark}");
        assert_eq!(status_of(&h.store, 3).await.0, WorkStatus::Done.marker());
    }

    #[tokio::test]
    async fn blank_snapshot_key_marks_error_and_continues() {
        let store = seeded(work_sheet(&["ali", "sara"]), vec![header_row()]);
        let scraper = ScriptedScraper::default().with("ali", Script::BlankKey);
        let h = harness(store, scraper, engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!((summary.failed, summary.succeeded), (1, 1));
        let (status, remark) = status_of(&h.store, 2).await;
        assert_eq!(status, WorkStatus::Error.marker());
        assert!(remark.starts_with("Missing nick name @ "), "{remark}");
        assert_eq!(h.store.sheet("ProfilesTarget").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn items_per_run_are_capped() {
        let store = seeded(work_sheet(&["ali", "sara", "umar"]), vec![header_row()]);
        let config = EngineConfig {
            max_items_per_run: 2,
            ..engine_config()
        };
        let h = harness(store, ScriptedScraper::default(), config);

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(status_of(&h.store, 4).await.0, "");
    }

    #[tokio::test]
    async fn second_run_sees_no_changes() {
        let store = seeded(work_sheet(&["ali"]), vec![header_row()]);
        let h = harness(store, ScriptedScraper::default(), engine_config());
        h.orchestrator.run(&CancellationToken::new()).await.unwrap();

        h.store
            .write_range("Target", "B2:C2", vec![row(&["pending", ""])])
            .await
            .unwrap();
        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!((summary.new, summary.unchanged), (0, 1));
        assert_eq!(summary.run_number, 2);
        let (_, remark) = status_of(&h.store, 2).await;
        assert!(remark.starts_with("No data changes @ "), "{remark}");
    }

    #[tokio::test]
    async fn bootstrap_creates_sheets_and_headers() {
        let h = harness(MemorySheetStore::new(), ScriptedScraper::default(), engine_config());

        let summary = h.orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.processed, 0);

        assert_eq!(h.store.sheet("ProfilesTarget").await.unwrap(), vec![header_row()]);
        assert!(h.store.is_frozen("ProfilesTarget").await);
        assert_eq!(h.store.sheet("Target").await.unwrap(), vec![row(&WORK_HEADER)]);
        assert_eq!(h.store.sheet("Dashboard").await.unwrap().len(), 2);
    }
}
