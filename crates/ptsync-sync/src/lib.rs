//! Reconciliation engine: loads the known profiles, diffs fresh snapshots against them,
//! writes through the rate-limited client and keeps the work-item sheet in step.

mod config;
mod coordinator;
mod diff;
mod index;
mod orchestrator;
mod summary;
mod tags;
mod work_queue;

use std::sync::Arc;

use anyhow::{Context, Result};
use ptsync_adapters::HtmlProfileScraper;
use ptsync_storage::{RateLimitedClient, SheetStore, TokioPause};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use config::{EngineConfig, FileConfig, SheetNames, SyncConfig, Trigger};
pub use coordinator::{rewrite_post_link, AppliedProfile, ApplyError, WriteCoordinator};
pub use diff::{change_note, classify};
pub use index::{EntityIndex, IndexEntry};
pub use orchestrator::{ItemFailure, ItemOutcome, RunOrchestrator};
pub use summary::{RunOutcome, RunSummary, DASHBOARD_HEADER};
pub use tags::TagMap;
pub use work_queue::{canonical_status, pending_items, WorkQueue, WORK_HEADER};

pub const CRATE_NAME: &str = "ptsync-sync";

fn build_client(config: &SyncConfig) -> Result<Arc<RateLimitedClient>> {
    let store: Arc<dyn SheetStore> = Arc::new(config.build_store()?);
    Ok(Arc::new(RateLimitedClient::new(
        store,
        Arc::new(TokioPause),
        config.client_config(),
    )))
}

/// One full run against the configured spreadsheet and site.
pub async fn run_sync(config: &SyncConfig, cancel: &CancellationToken) -> Result<RunSummary> {
    let client = build_client(config)?;
    let scraper = HtmlProfileScraper::new(config.site_config())?;
    RunOrchestrator::new(config.engine_config(), client, Arc::new(scraper))
        .run(cancel)
        .await
}

pub async fn run_sync_once_from_env(cancel: &CancellationToken) -> Result<RunSummary> {
    let config = SyncConfig::from_env()?;
    run_sync(&config, cancel).await
}

/// Rewrite legacy status cells on the work-item sheet. Returns how many changed.
pub async fn normalize_statuses_from_env() -> Result<usize> {
    let config = SyncConfig::from_env()?;
    let client = build_client(&config)?;
    let queue = WorkQueue::new(client, config.sheets.work_items.as_str(), config.display_clock());
    queue
        .normalize_statuses()
        .await
        .context("normalizing work item statuses")
}

/// Cron-driven runs. A tick that fires while a run is still active is skipped.
pub async fn build_scheduler(config: SyncConfig, cancel: CancellationToken) -> Result<JobScheduler> {
    let cron = config.cron.clone();
    let config = config.with_trigger(Trigger::Scheduled);
    let active = Arc::new(Mutex::new(()));

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let config = config.clone();
        let cancel = cancel.clone();
        let active = active.clone();
        Box::pin(async move {
            let Ok(_guard) = active.try_lock() else {
                warn!("previous run still active, skipping scheduled tick");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            match run_sync(&config, &cancel).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    outcome = summary.outcome.as_str(),
                    processed = summary.processed,
                    "scheduled run finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Run the scheduler until `cancel` fires.
pub async fn run_scheduled(config: SyncConfig, cancel: CancellationToken) -> Result<()> {
    let cron = config.cron.clone();
    let mut sched = build_scheduler(config, cancel.clone()).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %cron, "scheduler started");
    cancel.cancelled().await;
    sched.shutdown().await.context("stopping scheduler")?;
    info!("scheduler stopped");
    Ok(())
}
