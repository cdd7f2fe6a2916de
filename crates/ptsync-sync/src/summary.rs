use chrono::{DateTime, Utc};
use ptsync_core::{format_stamp, DisplayClock};
use ptsync_storage::{column_letter, row_range, RateLimitedClient, StoreError};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::Trigger;

pub const DASHBOARD_HEADER: [&str; 11] = [
    "Run#",
    "Timestamp",
    "Profiles",
    "Success",
    "Failed",
    "New",
    "Updated",
    "Unchanged",
    "Trigger",
    "Start",
    "End",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    Interrupted,
    Aborted,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub suspended: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub interrupted: usize,
    pub trigger: Trigger,
    pub outcome: RunOutcome,
    /// Set when the run aborted on a remote failure.
    pub error: Option<String>,
    pub remote_calls: u64,
    pub rate_limit_hits: u64,
}

impl RunSummary {
    pub fn new(run_id: Uuid, trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            run_number: 0,
            started_at: now,
            finished_at: now,
            processed: 0,
            succeeded: 0,
            failed: 0,
            suspended: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            interrupted: 0,
            trigger,
            outcome: RunOutcome::Completed,
            error: None,
            remote_calls: 0,
            rate_limit_hits: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub fn dashboard_row(&self, clock: &DisplayClock) -> Vec<String> {
        let end = format_stamp(clock.localize(self.finished_at));
        vec![
            self.run_number.to_string(),
            end.clone(),
            self.processed.to_string(),
            self.succeeded.to_string(),
            self.failed.to_string(),
            self.new.to_string(),
            self.updated.to_string(),
            self.unchanged.to_string(),
            self.trigger.as_str().to_string(),
            format_stamp(clock.localize(self.started_at)),
            end,
        ]
    }
}

fn dashboard_header() -> Vec<String> {
    DASHBOARD_HEADER.iter().map(|h| h.to_string()).collect()
}

/// A row whose first cell is a run number.
fn is_run_row(row: &[String]) -> bool {
    row.first().is_some_and(|cell| cell.trim().parse::<u32>().is_ok())
}

/// Make sure the dashboard's first row is the expected header.
///
/// A stale header is replaced. Run rows already sitting in row 1 are shifted down under the
/// new header rather than overwritten, and leftover cells from wider layouts are blanked.
pub async fn ensure_dashboard_header(client: &RateLimitedClient, sheet: &str) -> Result<(), StoreError> {
    let rows = client.read_all(sheet).await?;
    let header = dashboard_header();
    let Some(first) = rows.first() else {
        info!(sheet, "writing dashboard header");
        client
            .write_range(sheet, &row_range(1, 0, DASHBOARD_HEADER.len() - 1), vec![header])
            .await?;
        return Ok(());
    };
    if *first == header {
        return Ok(());
    }

    let kept = if is_run_row(first) { &rows[..] } else { &rows[1..] };
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(header.len());
    let mut rewritten = Vec::with_capacity(kept.len() + 1);
    rewritten.push(header);
    rewritten.extend(kept.iter().cloned());
    for row in &mut rewritten {
        row.resize(width, String::new());
    }
    info!(sheet, runs_kept = kept.len(), "rewriting dashboard header");
    let range = format!("A1:{}{}", column_letter(width - 1), rewritten.len());
    client.write_range(sheet, &range, rewritten).await
}

/// One more than the number of recorded runs.
pub async fn next_run_number(client: &RateLimitedClient, sheet: &str) -> Result<u32, StoreError> {
    let rows = client.read_all(sheet).await?;
    Ok(rows.len().max(1) as u32)
}

pub async fn append_dashboard_row(
    client: &RateLimitedClient,
    sheet: &str,
    summary: &RunSummary,
    clock: &DisplayClock,
) -> Result<(), StoreError> {
    client
        .append_row(sheet, summary.dashboard_row(clock))
        .await
        .map(|_| ())
}
