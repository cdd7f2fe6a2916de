use std::collections::HashMap;

use ptsync_core::{normalize_key, normalize_value};
use ptsync_storage::{RateLimitedClient, StoreError};
use tracing::info;

/// Profile key → comma-joined tag labels, read from a sheet whose column headers are
/// tags and whose cells list the profiles carrying each tag.
#[derive(Debug, Clone, Default)]
pub struct TagMap {
    tags: HashMap<String, String>,
}

impl TagMap {
    /// A missing tag sheet yields an empty map.
    pub async fn load(client: &RateLimitedClient, sheet: &str) -> Result<Self, StoreError> {
        match client.read_all(sheet).await {
            Ok(rows) => {
                let map = Self::from_rows(&rows);
                info!(sheet, tagged_profiles = map.len(), "loaded tag lookup");
                Ok(map)
            }
            Err(StoreError::SheetNotFound(_)) => {
                info!(sheet, "tag sheet not found, skipping");
                Ok(Self::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let Some((header, body)) = rows.split_first() else {
            return Self::default();
        };
        let mut labels: HashMap<String, Vec<String>> = HashMap::new();
        for (col, raw_tag) in header.iter().enumerate() {
            let tag = normalize_value(raw_tag);
            if tag.is_empty() {
                continue;
            }
            for row in body {
                let Some(cell) = row.get(col) else { continue };
                let key = normalize_key(cell);
                if key.is_empty() {
                    continue;
                }
                let entry = labels.entry(key).or_default();
                if !entry.contains(&tag) {
                    entry.push(tag.clone());
                }
            }
        }
        Self {
            tags: labels
                .into_iter()
                .map(|(key, tags)| (key, tags.join(", ")))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
