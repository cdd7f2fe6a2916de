//! Core profile schema, value normalization and work-item types for ptsync.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "ptsync-core";

/// Bumped whenever the profile column layout changes.
pub const SCHEMA_VERSION: u32 = 3;

pub const LINKS_SEPARATOR: &str = "--- LINKS ---";

/// Tokens the site (or older sheet rows) use to mean "no value".
const SENTINEL_TOKENS: &[&str] = &[
    "no city",
    "not set",
    "[no posts]",
    "n/a",
    "[no post url]",
    "[error]",
    "no set",
    "none",
    "null",
    "no age",
    "--- links ---",
];

/// One column of the profiles sheet, in sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProfileField {
    Id,
    NickName,
    Tags,
    Friend,
    City,
    Gender,
    Married,
    Age,
    Joined,
    Followers,
    Status,
    Posts,
    Intro,
    Source,
    ScrapedAt,
    MehfilName,
    MehfilDate,
    LinksSeparator,
    LastPost,
    LastPostTime,
    Image,
    ProfileLink,
    PostUrl,
}

impl ProfileField {
    pub const COUNT: usize = 23;

    pub const ALL: [ProfileField; Self::COUNT] = [
        ProfileField::Id,
        ProfileField::NickName,
        ProfileField::Tags,
        ProfileField::Friend,
        ProfileField::City,
        ProfileField::Gender,
        ProfileField::Married,
        ProfileField::Age,
        ProfileField::Joined,
        ProfileField::Followers,
        ProfileField::Status,
        ProfileField::Posts,
        ProfileField::Intro,
        ProfileField::Source,
        ProfileField::ScrapedAt,
        ProfileField::MehfilName,
        ProfileField::MehfilDate,
        ProfileField::LinksSeparator,
        ProfileField::LastPost,
        ProfileField::LastPostTime,
        ProfileField::Image,
        ProfileField::ProfileLink,
        ProfileField::PostUrl,
    ];

    /// The entity key column.
    pub const KEY: ProfileField = ProfileField::NickName;

    pub fn header(self) -> &'static str {
        match self {
            ProfileField::Id => "ID",
            ProfileField::NickName => "NICK NAME",
            ProfileField::Tags => "TAGS",
            ProfileField::Friend => "FRIEND",
            ProfileField::City => "CITY",
            ProfileField::Gender => "GENDER",
            ProfileField::Married => "MARRIED",
            ProfileField::Age => "AGE",
            ProfileField::Joined => "JOINED",
            ProfileField::Followers => "FOLLOWERS",
            ProfileField::Status => "STATUS",
            ProfileField::Posts => "POSTS",
            ProfileField::Intro => "INTRO",
            ProfileField::Source => "SOURCE",
            ProfileField::ScrapedAt => "DATETIME SCRAP",
            ProfileField::MehfilName => "MEHFIL NAME",
            ProfileField::MehfilDate => "MEHFIL DATE",
            ProfileField::LinksSeparator => LINKS_SEPARATOR,
            ProfileField::LastPost => "LAST POST",
            ProfileField::LastPostTime => "LAST POST TIME",
            ProfileField::Image => "IMAGE",
            ProfileField::ProfileLink => "PROFILE LINK",
            ProfileField::PostUrl => "POST URL",
        }
    }

    pub fn from_header(header: &str) -> Option<Self> {
        let header = header.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.header().eq_ignore_ascii_case(header))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Fields that change on every observation and never count as a change.
    pub fn is_volatile(self) -> bool {
        matches!(
            self,
            ProfileField::LastPost
                | ProfileField::LastPostTime
                | ProfileField::Joined
                | ProfileField::ProfileLink
                | ProfileField::ScrapedAt
                | ProfileField::LinksSeparator
        )
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

pub fn header_row() -> Vec<String> {
    ProfileField::ALL
        .iter()
        .map(|field| field.header().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown profile field `{0}`")]
    UnknownField(String),
    #[error("row has {found} cells but the profile schema has {expected} columns")]
    Arity { found: usize, expected: usize },
}

/// A full profile row: one string per [`ProfileField`]. Empty string means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ProfileRecord {
    values: Vec<String>,
}

impl TryFrom<Vec<String>> for ProfileRecord {
    type Error = SchemaError;

    fn try_from(row: Vec<String>) -> Result<Self, Self::Error> {
        Self::try_from_row(row)
    }
}

impl From<ProfileRecord> for Vec<String> {
    fn from(record: ProfileRecord) -> Self {
        record.values
    }
}

impl Default for ProfileRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl ProfileRecord {
    pub fn empty() -> Self {
        Self {
            values: vec![String::new(); ProfileField::COUNT],
        }
    }

    pub fn for_key(key: &str) -> Self {
        Self::empty().with(ProfileField::KEY, key.trim())
    }

    /// Build from a sheet row. Short rows are padded; cells past the schema width are ignored.
    pub fn from_sheet_row(row: &[String]) -> Self {
        let mut record = Self::empty();
        for (slot, cell) in record.values.iter_mut().zip(row.iter()) {
            slot.clone_from(cell);
        }
        record
    }

    /// Build from a row that must match the schema width exactly.
    pub fn try_from_row(row: Vec<String>) -> Result<Self, SchemaError> {
        if row.len() != ProfileField::COUNT {
            return Err(SchemaError::Arity {
                found: row.len(),
                expected: ProfileField::COUNT,
            });
        }
        Ok(Self { values: row })
    }

    /// Build from `(header, value)` pairs. Any header outside the schema is rejected.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut record = Self::empty();
        for (header, value) in pairs {
            let field = ProfileField::from_header(header.as_ref())
                .ok_or_else(|| SchemaError::UnknownField(header.as_ref().to_string()))?;
            record.set(field, value);
        }
        Ok(record)
    }

    pub fn get(&self, field: ProfileField) -> &str {
        &self.values[field.index()]
    }

    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        self.values[field.index()] = value.into();
    }

    pub fn with(mut self, field: ProfileField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn key(&self) -> &str {
        self.get(ProfileField::KEY).trim()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProfileField, &str)> + '_ {
        ProfileField::ALL
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn to_row(&self) -> Vec<String> {
        self.values.clone()
    }

    /// Every field passed through [`normalize_value`]; the separator column keeps its literal.
    pub fn normalized(&self) -> Self {
        let mut out = Self::empty();
        for (field, value) in self.iter() {
            let value = if field == ProfileField::LinksSeparator {
                LINKS_SEPARATOR.to_string()
            } else {
                normalize_value(value)
            };
            out.set(field, value);
        }
        out
    }
}

/// Trim, fold non-breaking spaces, collapse whitespace runs and map sentinel tokens to "".
pub fn normalize_value(value: &str) -> String {
    let collapsed = value
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if SENTINEL_TOKENS
        .iter()
        .any(|token| collapsed.eq_ignore_ascii_case(token))
    {
        String::new()
    } else {
        collapsed
    }
}

/// Case-insensitive entity key used for every index lookup.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    New,
    Updated,
    Unchanged,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Updated => "updated",
            Classification::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of diffing a snapshot against the last materialized row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub classification: Classification,
    /// Schema-ordered. For `New` this lists every field and is informational only.
    pub changed: Vec<ProfileField>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStatus {
    Pending,
    Done,
    Error,
}

impl WorkStatus {
    /// Canonical marker written to the work-item sheet.
    pub fn marker(self) -> &'static str {
        match self {
            WorkStatus::Pending => "⚡ Pending",
            WorkStatus::Done => "Done 💀",
            WorkStatus::Error => "Error 💥",
        }
    }

    /// Recognize any historical spelling of a status cell. Blank or unknown yields `None`.
    pub fn parse(cell: &str) -> Option<Self> {
        let cell = cell.trim();
        let lower = cell.to_lowercase();
        if lower.contains("pending") || cell.contains('⚡') {
            Some(WorkStatus::Pending)
        } else if lower.contains("done") || lower.contains("complete") {
            Some(WorkStatus::Done)
        } else if lower.contains("error") {
            Some(WorkStatus::Error)
        } else {
            None
        }
    }

    /// A blank cell counts as pending; so does any pending spelling.
    pub fn is_pending_cell(cell: &str) -> bool {
        cell.trim().is_empty() || Self::parse(cell) == Some(WorkStatus::Pending)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// A queued request to (re)scrape one profile, tied to its row in the work-item sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: String,
    pub row: u32,
    pub status: WorkStatus,
    pub remark: String,
    pub source: String,
}

/// Wall clock shifted into the operator's display zone (PKT by default).
#[derive(Debug, Clone, Copy)]
pub struct DisplayClock {
    offset: FixedOffset,
}

impl Default for DisplayClock {
    fn default() -> Self {
        Self::with_offset_hours(5)
    }
}

impl DisplayClock {
    pub fn with_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours.clamp(-23, 23) * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    /// `17-Oct-26 03:15 PM`
    pub fn stamp(&self) -> String {
        format_stamp(self.now())
    }

    /// `03:15 PM`
    pub fn time_of_day(&self) -> String {
        self.now().format("%I:%M %p").to_string()
    }

    pub fn relative_to_absolute(&self, text: &str) -> String {
        relative_to_absolute(text, self.now())
    }
}

pub fn format_stamp(at: DateTime<FixedOffset>) -> String {
    at.format("%d-%b-%y %I:%M %p").to_string()
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let unit = unit.trim_end_matches('s');
    let secs = match unit {
        "sec" | "second" => 1,
        "min" | "minute" => 60,
        "hr" | "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        "month" => 2_592_000,
        "year" => 31_536_000,
        _ => return None,
    };
    Some(secs)
}

/// Turn "5 mins ago" / "2hrs ago" into an absolute `dd-Mon-yy` date relative to `now`.
/// Text without a recognizable relative phrase is returned unchanged.
pub fn relative_to_absolute(text: &str, now: DateTime<FixedOffset>) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lower = trimmed.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let Some(ago_at) = tokens.iter().position(|t| *t == "ago") else {
        return text.to_string();
    };
    if ago_at == 0 {
        return text.to_string();
    }

    let unit_token = tokens[ago_at - 1];
    let digits_in_unit: String = unit_token.chars().take_while(|c| c.is_ascii_digit()).collect();
    let (amount, unit) = if digits_in_unit.is_empty() {
        let Some(amount_token) = ago_at.checked_sub(2).map(|i| tokens[i]) else {
            return text.to_string();
        };
        (amount_token.parse::<i64>().ok(), unit_token)
    } else {
        (
            digits_in_unit.parse::<i64>().ok(),
            &unit_token[digits_in_unit.len()..],
        )
    };

    match (amount, unit_seconds(unit)) {
        (Some(amount), Some(secs)) => ChronoDuration::try_seconds(amount.saturating_mul(secs))
            .and_then(|ago| now.checked_sub_signed(ago))
            .map(|at| at.format("%d-%b-%y").to_string())
            .unwrap_or_else(|| text.to_string()),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pkt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn normalization_trims_and_maps_sentinels() {
        assert_eq!(normalize_value("  Karachi  "), normalize_value("Karachi"));
        assert_eq!(normalize_value("Lahore\u{a0} \t Cantt"), "Lahore Cantt");
        for sentinel in ["N/A", "not set", "None", "NOT SET", "[No Posts]", "null"] {
            assert_eq!(normalize_value(sentinel), "", "{sentinel}");
        }
        assert_eq!(normalize_value("Nonexistent"), "Nonexistent");
    }

    #[test]
    fn schema_is_ordered_and_versioned() {
        assert_eq!(ProfileField::ALL.len(), ProfileField::COUNT);
        for (idx, field) in ProfileField::ALL.iter().enumerate() {
            assert_eq!(field.index(), idx);
        }
        let headers = header_row();
        assert_eq!(headers[1], "NICK NAME");
        assert_eq!(headers[17], LINKS_SEPARATOR);
        assert_eq!(headers.last().map(String::as_str), Some("POST URL"));
    }

    #[test]
    fn volatile_fields_match_the_highlight_exclusions() {
        let volatile: Vec<_> = ProfileField::ALL
            .iter()
            .filter(|f| f.is_volatile())
            .map(|f| f.header())
            .collect();
        assert_eq!(
            volatile,
            vec!["JOINED", "DATETIME SCRAP", LINKS_SEPARATOR, "LAST POST", "LAST POST TIME", "PROFILE LINK"]
        );
    }

    #[test]
    fn pairs_with_unknown_headers_are_rejected() {
        let err = ProfileRecord::try_from_pairs([("NICK NAME", "ali"), ("SHOE SIZE", "9")])
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("SHOE SIZE".into()));

        let record = ProfileRecord::try_from_pairs([("nick name", " ali "), ("CITY", "Lahore")])
            .expect("known headers");
        assert_eq!(record.key(), "ali");
        assert_eq!(record.get(ProfileField::City), "Lahore");
    }

    #[test]
    fn short_sheet_rows_are_padded() {
        let record = ProfileRecord::from_sheet_row(&["7".into(), "Ali".into()]);
        assert_eq!(record.get(ProfileField::Id), "7");
        assert_eq!(record.key(), "Ali");
        assert_eq!(record.get(ProfileField::PostUrl), "");
        assert!(ProfileRecord::try_from_row(vec!["x".into()]).is_err());
    }

    #[test]
    fn status_cells_parse_every_historical_spelling() {
        assert_eq!(WorkStatus::parse("pending"), Some(WorkStatus::Pending));
        assert_eq!(WorkStatus::parse("⚡ Pending"), Some(WorkStatus::Pending));
        assert_eq!(WorkStatus::parse("⚡"), Some(WorkStatus::Pending));
        assert_eq!(WorkStatus::parse("Completed"), Some(WorkStatus::Done));
        assert_eq!(WorkStatus::parse("Done 💀"), Some(WorkStatus::Done));
        assert_eq!(WorkStatus::parse("ERROR"), Some(WorkStatus::Error));
        assert_eq!(WorkStatus::parse("queued"), None);
        assert!(WorkStatus::is_pending_cell("   "));
        assert!(WorkStatus::is_pending_cell("PENDING"));
        assert!(!WorkStatus::is_pending_cell("Done"));
    }

    #[test]
    fn relative_dates_become_absolute() {
        let now = pkt(2026, 10, 17, 15, 0);
        assert_eq!(relative_to_absolute("5 mins ago", now), "17-Oct-26");
        assert_eq!(relative_to_absolute("2 days ago", now), "15-Oct-26");
        assert_eq!(relative_to_absolute("3hrs ago", now), "17-Oct-26");
        assert_eq!(relative_to_absolute("1 week ago", now), "10-Oct-26");
        assert_eq!(relative_to_absolute("owner since 2 months ago", now), "18-Aug-26");
        assert_eq!(relative_to_absolute("12-Jan-24", now), "12-Jan-24");
        assert_eq!(relative_to_absolute("", now), "");
    }

    #[test]
    fn absurd_relative_amounts_are_left_as_text() {
        let now = pkt(2026, 10, 17, 15, 0);
        assert_eq!(relative_to_absolute("1000000 years ago", now), "1000000 years ago");
        assert_eq!(relative_to_absolute("99999999999 days ago", now), "99999999999 days ago");
    }

    #[test]
    fn stamps_use_sheet_format() {
        assert_eq!(format_stamp(pkt(2026, 10, 17, 15, 5)), "17-Oct-26 03:05 PM");
    }

    #[test]
    fn records_serialize() {
        let json = serde_json::to_string(&ProfileRecord::for_key("ali")).unwrap();
        assert!(json.contains("ali"));
    }
}
