use std::sync::Arc;

use ptsync_core::{normalize_value, Classification, DisplayClock, ProfileField, ProfileRecord};
use ptsync_storage::{row_range, RateLimitedClient, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::{change_note, classify};
use crate::index::{EntityIndex, IndexEntry};
use crate::tags::TagMap;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("snapshot has a blank profile key")]
    MissingKey,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one successful `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedProfile {
    pub classification: Classification,
    pub changed: Vec<ProfileField>,
    pub row: u32,
}

/// `/content/<id>/g/...` posts are image posts; link them by their comment page.
pub fn rewrite_post_link(link: &str, base_url: &str) -> String {
    if !(link.contains("/content/") && link.contains("/g/")) {
        return link.to_string();
    }
    let id = link
        .split("/content/")
        .last()
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default();
    if id.is_empty() {
        return link.to_string();
    }
    format!("{}/comments/image/{id}", base_url.trim_end_matches('/'))
}

/// Owns the profiles sheet write path and the index that mirrors it.
pub struct WriteCoordinator {
    client: Arc<RateLimitedClient>,
    sheet: String,
    index: EntityIndex,
    tags: TagMap,
    clock: DisplayClock,
    site_base_url: String,
}

impl WriteCoordinator {
    pub fn new(
        client: Arc<RateLimitedClient>,
        sheet: impl Into<String>,
        index: EntityIndex,
        tags: TagMap,
        clock: DisplayClock,
        site_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            sheet: sheet.into(),
            index,
            tags,
            clock,
            site_base_url: site_base_url.into(),
        }
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    /// Final row values: normalized, tagged, stamped, with dates and links resolved.
    pub fn materialize(&self, snapshot: &ProfileRecord) -> ProfileRecord {
        let mut row = snapshot.normalized();
        let posted = self
            .clock
            .relative_to_absolute(snapshot.get(ProfileField::LastPostTime));
        row.set(ProfileField::LastPostTime, normalize_value(&posted));
        row.set(ProfileField::ScrapedAt, self.clock.stamp());
        if let Some(tags) = self.tags.get(snapshot.key()) {
            row.set(ProfileField::Tags, tags);
        }
        let post = rewrite_post_link(row.get(ProfileField::LastPost), &self.site_base_url);
        row.set(ProfileField::LastPost, post);
        row
    }

    /// Insert or overwrite the profile row for the snapshot's key, then update the index.
    pub async fn apply(&mut self, snapshot: &ProfileRecord) -> Result<AppliedProfile, ApplyError> {
        let key = snapshot.key().to_string();
        if key.is_empty() {
            return Err(ApplyError::MissingKey);
        }

        let values = self.materialize(snapshot);
        let previous = self.index.get(&key).cloned();
        let change = classify(previous.as_ref().map(|entry| &entry.values), &values);

        let row = match previous {
            None => {
                let reported = self.client.append_row(&self.sheet, values.to_row()).await?;
                let row = match reported {
                    Some(row) => row,
                    None => {
                        debug!(key = %key, "append position not reported, re-reading sheet");
                        let rows = self.client.read_all(&self.sheet).await?;
                        EntityIndex::from_rows(&rows)
                            .get(&key)
                            .map_or(rows.len() as u32, |entry| entry.row)
                    }
                };
                info!(key = %key, row, "added new profile");
                row
            }
            Some(entry) => {
                let range = row_range(entry.row, 0, ProfileField::COUNT - 1);
                self.client
                    .write_range(&self.sheet, &range, vec![values.to_row()])
                    .await?;
                if change.classification == Classification::Updated {
                    let note = change_note(&entry.values, &values, &change.changed);
                    if let Err(err) = self
                        .client
                        .annotate_row(&self.sheet, entry.row, ProfileField::COUNT, &note)
                        .await
                    {
                        warn!(key = %key, row = entry.row, error = %err, "change note failed");
                    }
                }
                debug!(key = %key, row = entry.row, classification = %change.classification, "overwrote profile");
                entry.row
            }
        };

        self.index.put(&key, IndexEntry { row, values });
        Ok(AppliedProfile {
            classification: change.classification,
            changed: change.changed,
            row,
        })
    }
}
