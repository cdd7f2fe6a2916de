use std::collections::BTreeMap;
use std::sync::Arc;

use ptsync_adapters::TerminalKind;
use ptsync_core::{truncate_chars, Classification, DisplayClock, ProfileField, WorkItem, WorkStatus};
use ptsync_storage::{RangeUpdate, RateLimitedClient, StoreError};
use tracing::{debug, info};

use crate::coordinator::AppliedProfile;

pub const WORK_HEADER: [&str; 4] = ["Nickname", "Status", "Remarks", "Source"];
pub const DEFAULT_SOURCE: &str = "Target";

const REMARK_FIELDS: usize = 5;
const REMARK_MESSAGE_CHARS: usize = 120;

/// Remark for a successfully reconciled item.
pub fn applied_remark(applied: &AppliedProfile, at: &str) -> String {
    match applied.classification {
        Classification::New => format!("[NEW] New Profile added @ {at}"),
        Classification::Updated => {
            let mut names: Vec<&str> = applied
                .changed
                .iter()
                .filter(|field| !field.is_volatile())
                .take(REMARK_FIELDS)
                .map(|field| field.header())
                .collect();
            if applied.changed.len() > REMARK_FIELDS {
                names.push("...");
            }
            format!("[UPDATED] Updated: {} @ {at}", names.join(", "))
        }
        Classification::Unchanged => format!("No data changes @ {at}"),
    }
}

pub fn terminal_remark(kind: TerminalKind, reason: &str, at: &str) -> String {
    let label = match kind {
        TerminalKind::Suspended => "Suspended",
        TerminalKind::Unverified => "Unverified",
    };
    format!("{label}: {reason} @ {at}")
}

pub fn retry_remark(message: &str, at: &str) -> String {
    format!("Retry needed: {} @ {at}", truncate_chars(message, REMARK_MESSAGE_CHARS))
}

/// Canonical marker for a status cell that needs rewriting; `None` when the cell is
/// blank or already canonical. Unrecognized text becomes pending.
pub fn canonical_status(cell: &str) -> Option<&'static str> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    let marker = WorkStatus::parse(trimmed)
        .unwrap_or(WorkStatus::Pending)
        .marker();
    (trimmed != marker).then_some(marker)
}

/// Pending rows of the work-item sheet (header first). Rows are 1-based.
pub fn pending_items(rows: &[Vec<String>]) -> Vec<WorkItem> {
    let cell = |row: &Vec<String>, idx: usize| row.get(idx).map(|c| c.trim().to_string()).unwrap_or_default();
    rows.iter()
        .enumerate()
        .skip(1)
        .filter_map(|(offset, row)| {
            let key = cell(row, 0);
            let status = cell(row, 1);
            if key.is_empty() || !WorkStatus::is_pending_cell(&status) {
                return None;
            }
            let source = Some(cell(row, 3))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
            Some(WorkItem {
                key,
                row: (offset + 1) as u32,
                status: WorkStatus::Pending,
                remark: cell(row, 2),
                source,
            })
        })
        .collect()
}

/// Work-item status state machine. Transitions are queued locally and written as one
/// batched update per flush; an unflushed item still reads as pending remotely.
pub struct WorkQueue {
    client: Arc<RateLimitedClient>,
    sheet: String,
    clock: DisplayClock,
    queued: BTreeMap<u32, (WorkStatus, String)>,
}

impl WorkQueue {
    pub fn new(client: Arc<RateLimitedClient>, sheet: impl Into<String>, clock: DisplayClock) -> Self {
        Self {
            client,
            sheet: sheet.into(),
            clock,
            queued: BTreeMap::new(),
        }
    }

    pub async fn load_pending(&self) -> Result<Vec<WorkItem>, StoreError> {
        let rows = self.client.read_all(&self.sheet).await?;
        let items = pending_items(&rows);
        info!(sheet = %self.sheet, pending = items.len(), "fetched pending work items");
        Ok(items)
    }

    fn transition(&mut self, item: &mut WorkItem, status: WorkStatus, remark: String) {
        debug!(key = %item.key, row = item.row, status = %status, remark = %remark, "work item transition");
        item.status = status;
        item.remark.clone_from(&remark);
        self.queued.insert(item.row, (status, remark));
    }

    pub fn mark_done(&mut self, item: &mut WorkItem, applied: &AppliedProfile) {
        let remark = applied_remark(applied, &self.clock.time_of_day());
        self.transition(item, WorkStatus::Done, remark);
    }

    pub fn mark_terminal(&mut self, item: &mut WorkItem, kind: TerminalKind, reason: &str) {
        let remark = terminal_remark(kind, reason, &self.clock.time_of_day());
        self.transition(item, WorkStatus::Error, remark);
    }

    pub fn mark_missing_key(&mut self, item: &mut WorkItem) {
        let remark = format!("Missing {} @ {}", ProfileField::KEY.header().to_lowercase(), self.clock.time_of_day());
        self.transition(item, WorkStatus::Error, remark);
    }

    pub fn mark_retry(&mut self, item: &mut WorkItem, message: &str) {
        let remark = retry_remark(message, &self.clock.time_of_day());
        self.transition(item, WorkStatus::Pending, remark);
    }

    pub fn mark_interrupted(&mut self, item: &mut WorkItem) {
        let remark = format!("Interrupted @ {}", self.clock.time_of_day());
        self.transition(item, WorkStatus::Pending, remark);
    }

    pub fn mark_run_error(&mut self, item: &mut WorkItem, message: &str) {
        let remark = format!("Run error: {}", truncate_chars(message, REMARK_MESSAGE_CHARS));
        self.transition(item, WorkStatus::Pending, remark);
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Write every queued transition in one batch. On failure the queue is kept.
    pub async fn flush(&mut self) -> Result<usize, StoreError> {
        if self.queued.is_empty() {
            return Ok(0);
        }
        let updates: Vec<RangeUpdate> = self
            .queued
            .iter()
            .map(|(row, (status, remark))| RangeUpdate {
                range: format!("B{row}:C{row}"),
                values: vec![vec![status.marker().to_string(), remark.clone()]],
            })
            .collect();
        let count = updates.len();
        self.client.batch_write(&self.sheet, updates).await?;
        self.queued.clear();
        debug!(sheet = %self.sheet, count, "flushed work item statuses");
        Ok(count)
    }

    /// Rewrite legacy status spellings to the canonical markers in a single batch.
    pub async fn normalize_statuses(&self) -> Result<usize, StoreError> {
        let rows = self.client.read_all(&self.sheet).await?;
        let updates: Vec<RangeUpdate> = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(offset, row)| {
                let marker = canonical_status(row.get(1)?)?;
                Some(RangeUpdate {
                    range: format!("B{}", offset + 1),
                    values: vec![vec![marker.to_string()]],
                })
            })
            .collect();
        let count = updates.len();
        if count > 0 {
            info!(sheet = %self.sheet, count, "normalizing work item statuses");
            self.client.batch_write(&self.sheet, updates).await?;
        }
        Ok(count)
    }
}
