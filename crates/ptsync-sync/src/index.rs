use std::collections::HashMap;

use ptsync_core::{normalize_key, ProfileRecord};
use ptsync_storage::{RateLimitedClient, StoreError};
use tracing::{info, warn};

/// Last materialized state of one profile row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// 1-based row in the profiles sheet.
    pub row: u32,
    pub values: ProfileRecord,
}

/// Key → row cache of the profiles sheet, loaded once per run and kept current by the
/// write path. Never re-read mid-run.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    entries: HashMap<String, IndexEntry>,
}

impl EntityIndex {
    pub async fn load(client: &RateLimitedClient, sheet: &str) -> Result<Self, StoreError> {
        let rows = client.read_all(sheet).await?;
        let index = Self::from_rows(&rows);
        info!(sheet, profiles = index.len(), "loaded existing profiles");
        Ok(index)
    }

    /// Build from raw sheet rows, header first. Rows with a blank key are skipped.
    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let mut entries = HashMap::new();
        for (offset, raw) in rows.iter().enumerate().skip(1) {
            let values = ProfileRecord::from_sheet_row(raw);
            let key = normalize_key(values.key());
            if key.is_empty() {
                continue;
            }
            let row = (offset + 1) as u32;
            if let Some(previous) = entries.insert(key.clone(), IndexEntry { row, values }) {
                warn!(key = %key, first_row = previous.row, row, "duplicate profile key; keeping the later row");
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(&normalize_key(key))
    }

    pub fn put(&mut self, key: &str, entry: IndexEntry) {
        self.entries.insert(normalize_key(key), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
