use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use ptsync_adapters::SiteConfig;
use ptsync_core::DisplayClock;
use ptsync_storage::{
    spreadsheet_id_from_url, AdaptiveDelayConfig, BackoffPolicy, ClientConfig, GoogleSheetsConfig,
    GoogleSheetsStore, ServiceAccountKey, SheetsAuth,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SheetNames {
    pub profiles: String,
    pub work_items: String,
    pub tags: String,
    pub dashboard: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            profiles: "ProfilesTarget".to_string(),
            work_items: "Target".to_string(),
            tags: "Tags".to_string(),
            dashboard: "Dashboard".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Manual,
    Scheduled,
}

impl Trigger {
    /// `schedule` (the CI cron event name) means a scheduled run; anything else is manual.
    pub fn from_event_name(event: Option<&str>) -> Self {
        match event {
            Some(name) if name.trim().eq_ignore_ascii_case("schedule") => Trigger::Scheduled,
            _ => Trigger::Manual,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Manual => "Manual",
            Trigger::Scheduled => "Scheduled",
        }
    }
}

/// Everything the run orchestrator needs, resolved up front.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sheets: SheetNames,
    /// 0 means no cap.
    pub max_items_per_run: usize,
    /// 0 disables batch cool-off.
    pub batch_size: usize,
    pub batch_cooloff: Duration,
    pub clock: DisplayClock,
    pub site_base_url: String,
    pub trigger: Trigger,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sheets: SheetNames::default(),
            max_items_per_run: 100,
            batch_size: 10,
            batch_cooloff: Duration::from_secs(8),
            clock: DisplayClock::default(),
            site_base_url: SiteConfig::default().base_url,
            trigger: Trigger::Manual,
        }
    }
}

/// Optional YAML overlay loaded from `PTSYNC_CONFIG`. Environment variables win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sheet_id: Option<String>,
    pub sheets: Option<SheetNames>,
    pub max_profiles_per_run: Option<usize>,
    pub batch_size: Option<usize>,
    pub min_delay_secs: Option<f64>,
    pub max_delay_secs: Option<f64>,
    pub write_delay_secs: Option<f64>,
    pub batch_cooloff_secs: Option<f64>,
    pub rate_limit_backoff_secs: Option<u64>,
    pub page_load_timeout_secs: Option<u64>,
    pub site_base_url: Option<String>,
    pub display_utc_offset_hours: Option<i32>,
    pub cron: Option<String>,
}

impl FileConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sheet_id: Option<String>,
    /// Path to a service-account key file, or the key JSON itself.
    pub credentials: Option<String>,
    pub access_token: Option<String>,
    pub sheets: SheetNames,
    pub max_profiles_per_run: usize,
    pub batch_size: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub write_delay: Duration,
    pub batch_cooloff: Duration,
    pub rate_limit_backoff: Duration,
    pub page_load_timeout: Duration,
    pub site_base_url: String,
    pub session_cookie: Option<String>,
    pub display_offset_hours: i32,
    pub trigger: Trigger,
    pub cron: String,
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let file = match non_empty(std::env::var("PTSYNC_CONFIG").ok()) {
            Some(path) => FileConfig::from_path(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merge a file overlay with a variable lookup; the lookup takes precedence.
    pub fn from_sources(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| non_empty(lookup(key));
        fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.parse().ok())
        }

        let sheet_id = var("GOOGLE_SHEET_ID")
            .or_else(|| var("GOOGLE_SHEET_URL"))
            .or(file.sheet_id)
            .and_then(|raw| spreadsheet_id_from_url(&raw));

        Self {
            sheet_id,
            credentials: var("GOOGLE_CREDENTIALS_JSON"),
            access_token: var("GOOGLE_ACCESS_TOKEN"),
            sheets: file.sheets.unwrap_or_default(),
            max_profiles_per_run: parsed(var("MAX_PROFILES_PER_RUN"))
                .or(file.max_profiles_per_run)
                .unwrap_or(100),
            batch_size: parsed(var("BATCH_SIZE")).or(file.batch_size).unwrap_or(10),
            min_delay: secs(parsed(var("MIN_DELAY")).or(file.min_delay_secs).unwrap_or(0.5)),
            max_delay: secs(parsed(var("MAX_DELAY")).or(file.max_delay_secs).unwrap_or(1.0)),
            write_delay: secs(
                parsed(var("SHEET_WRITE_DELAY"))
                    .or(file.write_delay_secs)
                    .unwrap_or(1.5),
            ),
            batch_cooloff: secs(
                parsed(var("BATCH_COOLOFF"))
                    .or(file.batch_cooloff_secs)
                    .unwrap_or(8.0),
            ),
            rate_limit_backoff: Duration::from_secs(
                parsed(var("RATE_LIMIT_BACKOFF_SECS"))
                    .or(file.rate_limit_backoff_secs)
                    .unwrap_or(30),
            ),
            page_load_timeout: Duration::from_secs(
                parsed(var("PAGE_LOAD_TIMEOUT"))
                    .or(file.page_load_timeout_secs)
                    .unwrap_or(30),
            ),
            site_base_url: var("SITE_BASE_URL")
                .or(file.site_base_url)
                .unwrap_or_else(|| SiteConfig::default().base_url),
            session_cookie: var("SITE_SESSION_COOKIE"),
            display_offset_hours: parsed(var("DISPLAY_UTC_OFFSET_HOURS"))
                .or(file.display_utc_offset_hours)
                .unwrap_or(5),
            trigger: Trigger::from_event_name(var("GITHUB_EVENT_NAME").as_deref()),
            cron: var("PTSYNC_CRON")
                .or(file.cron)
                .unwrap_or_else(|| "0 0 */6 * * *".to_string()),
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn display_clock(&self) -> DisplayClock {
        DisplayClock::with_offset_hours(self.display_offset_hours)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sheets: self.sheets.clone(),
            max_items_per_run: self.max_profiles_per_run,
            batch_size: self.batch_size,
            batch_cooloff: self.batch_cooloff,
            clock: self.display_clock(),
            site_base_url: self.site_base_url.clone(),
            trigger: self.trigger,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            backoff: BackoffPolicy {
                max_retries: 3,
                base_delay: self.rate_limit_backoff,
                max_delay: self.rate_limit_backoff.saturating_mul(8),
            },
            delay: AdaptiveDelayConfig::with_floor(self.min_delay, self.max_delay),
            write_pause: self.write_delay,
        }
    }

    pub fn site_config(&self) -> SiteConfig {
        SiteConfig {
            base_url: self.site_base_url.clone(),
            session_cookie: self.session_cookie.clone(),
            timeout: self.page_load_timeout,
            display_clock: self.display_clock(),
            ..SiteConfig::default()
        }
    }

    pub fn sheets_auth(&self) -> Result<SheetsAuth> {
        if let Some(token) = &self.access_token {
            return Ok(SheetsAuth::AccessToken(token.clone()));
        }
        let raw = self
            .credentials
            .as_deref()
            .context("GOOGLE_CREDENTIALS_JSON or GOOGLE_ACCESS_TOKEN must be set")?;
        let key = if raw.starts_with('{') {
            ServiceAccountKey::from_json_str(raw)?
        } else {
            ServiceAccountKey::from_path(raw)?
        };
        Ok(SheetsAuth::ServiceAccount(key))
    }

    pub fn build_store(&self) -> Result<GoogleSheetsStore> {
        let sheet_id = self
            .sheet_id
            .clone()
            .context("GOOGLE_SHEET_ID or GOOGLE_SHEET_URL must be set")?;
        let mut config = GoogleSheetsConfig::new(sheet_id, self.sheets_auth()?);
        config.timeout = self.page_load_timeout;
        GoogleSheetsStore::new(config)
    }
}
