//! Remote tabular store access for ptsync: the narrow sheet interface, its Google Sheets
//! and in-memory implementations, and the rate-limited client every remote call goes through.

mod google;
mod memory;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

pub use google::{spreadsheet_id_from_url, GoogleSheetsConfig, GoogleSheetsStore, ServiceAccountKey, SheetsAuth};
pub use memory::MemorySheetStore;

pub const CRATE_NAME: &str = "ptsync-storage";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("remote quota exceeded: {0}")]
    RateLimited(String),
    #[error("sheet `{0}` not found")]
    SheetNotFound(String),
    #[error("remote error (status {status}): {message}")]
    Remote { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StoreError::RateLimited(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Parse(err.to_string())
    }
}

/// Kinds of remote operation, used for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    EnsureSheet,
    ReadAll,
    WriteRange,
    AppendRow,
    BatchWrite,
    Annotate,
    FreezeHeader,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::EnsureSheet => "ensure_sheet",
            StoreOp::ReadAll => "read_all",
            StoreOp::WriteRange => "write_range",
            StoreOp::AppendRow => "append_row",
            StoreOp::BatchWrite => "batch_write",
            StoreOp::Annotate => "annotate",
            StoreOp::FreezeHeader => "freeze_header",
        }
    }

    /// Operations that mutate cell values and are followed by the write pause.
    pub fn is_value_write(self) -> bool {
        matches!(
            self,
            StoreOp::WriteRange | StoreOp::AppendRow | StoreOp::BatchWrite
        )
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One A1 range (without sheet prefix) and the row-major values to place there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeUpdate {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

/// The only operations the engine needs from a tabular store.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn ensure_sheet(&self, sheet: &str) -> Result<(), StoreError>;

    /// Every populated row, header included. Rows may be ragged.
    async fn read_all(&self, sheet: &str) -> Result<Vec<Vec<String>>, StoreError>;

    async fn write_range(
        &self,
        sheet: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), StoreError>;

    /// Append after the last populated row. Returns the 1-based row number when the
    /// backend reports it.
    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<Option<u32>, StoreError>;

    async fn batch_write(&self, sheet: &str, updates: Vec<RangeUpdate>) -> Result<(), StoreError>;

    /// Attach a note to the first `width` cells of a row.
    async fn annotate_row(
        &self,
        sheet: &str,
        row: u32,
        width: usize,
        note: &str,
    ) -> Result<(), StoreError>;

    async fn freeze_header_row(&self, sheet: &str) -> Result<(), StoreError>;
}

/// Zero-based column index to its A1 letters (`0 → A`, `26 → AA`).
pub fn column_letter(index: usize) -> String {
    let mut out = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        out.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `A5:W5` style range covering columns `first..=last` of one row.
pub fn row_range(row: u32, first: usize, last: usize) -> String {
    format!("{}{row}:{}{row}", column_letter(first), column_letter(last))
}

/// Parse `B12` (or the first cell of `B12:C12`, optionally sheet-qualified) into
/// `(zero-based column, 1-based row)`.
pub fn parse_a1_cell(range: &str) -> Option<(usize, u32)> {
    let unqualified = range.rsplit('!').next().unwrap_or(range);
    let first = unqualified.split(':').next()?.trim();
    let letters: String = first.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &first[letters.len()..];
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for ch in letters.chars() {
        col = col * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    let row = digits.parse::<u32>().ok()?;
    Some((col - 1, row))
}

/// `'Sheet Name'!A1:B2`
pub fn qualified_range(sheet: &str, range: &str) -> String {
    format!("'{}'!{range}", sheet.replace('\'', "''"))
}

/// Sleep seam so backoff and pacing can be observed without waiting.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records every requested pause and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingPause {
    pauses: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.pauses
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Pause for RecordingPause {
    async fn pause(&self, duration: Duration) {
        if let Ok(mut guard) = self.pauses.lock() {
            guard.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(240),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveDelayConfig {
    pub floor_min: Duration,
    pub floor_max: Duration,
    pub ceiling_min: Duration,
    pub ceiling_max: Duration,
    pub batch_ceiling_min: Duration,
    pub batch_ceiling_max: Duration,
    pub decay_window: Duration,
}

impl Default for AdaptiveDelayConfig {
    fn default() -> Self {
        Self::with_floor(Duration::from_millis(500), Duration::from_secs(1))
    }
}

impl AdaptiveDelayConfig {
    pub fn with_floor(min: Duration, max: Duration) -> Self {
        Self {
            floor_min: min,
            floor_max: max.max(min),
            ceiling_min: Duration::from_secs(5),
            ceiling_max: Duration::from_secs(10),
            batch_ceiling_min: Duration::from_secs(3),
            batch_ceiling_max: Duration::from_secs(6),
            decay_window: Duration::from_secs(10),
        }
    }
}

const DECAY_FACTOR: f64 = 0.95;
const BATCH_GROWTH: f64 = 1.2;

fn bounded(value: f64, floor: Duration, ceiling: Duration) -> f64 {
    let floor = floor.as_secs_f64();
    value.max(floor).min(ceiling.as_secs_f64().max(floor))
}

/// Feedback controller for the inter-request pause window.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    config: AdaptiveDelayConfig,
    min_secs: f64,
    max_secs: f64,
    hits: u32,
    last_decay: Instant,
}

impl AdaptiveDelay {
    pub fn new(config: AdaptiveDelayConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: AdaptiveDelayConfig, now: Instant) -> Self {
        Self {
            config,
            min_secs: config.floor_min.as_secs_f64(),
            max_secs: config.floor_max.as_secs_f64(),
            hits: 0,
            last_decay: now,
        }
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn window(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.min_secs),
            Duration::from_secs_f64(self.max_secs),
        )
    }

    pub fn on_success(&mut self) {
        self.on_success_at(Instant::now());
    }

    /// Decay toward the floor once no rate limit has been seen for the decay window.
    pub fn on_success_at(&mut self, now: Instant) {
        self.hits = self.hits.saturating_sub(1);
        if now.saturating_duration_since(self.last_decay) > self.config.decay_window {
            self.min_secs = (self.min_secs * DECAY_FACTOR).max(self.config.floor_min.as_secs_f64());
            self.max_secs = (self.max_secs * DECAY_FACTOR).max(self.config.floor_max.as_secs_f64());
            self.last_decay = now;
        }
    }

    pub fn on_rate_limit(&mut self) {
        self.on_rate_limit_at(Instant::now());
    }

    pub fn on_rate_limit_at(&mut self, now: Instant) {
        self.hits = self.hits.saturating_add(1);
        let factor = 1.0 + (0.3 * f64::from(self.hits)).min(2.0);
        self.min_secs = bounded(self.min_secs * factor, self.config.floor_min, self.config.ceiling_min);
        self.max_secs = bounded(self.max_secs * factor, self.config.floor_max, self.config.ceiling_max)
            .max(self.min_secs);
        self.last_decay = now;
    }

    /// Gentle pre-emptive growth after each completed batch of work items.
    pub fn on_batch(&mut self) {
        if self.min_secs < self.config.batch_ceiling_min.as_secs_f64() {
            self.min_secs = bounded(
                self.min_secs * BATCH_GROWTH,
                self.config.floor_min,
                self.config.batch_ceiling_min,
            );
        }
        if self.max_secs < self.config.batch_ceiling_max.as_secs_f64() {
            self.max_secs = bounded(
                self.max_secs * BATCH_GROWTH,
                self.config.floor_max,
                self.config.batch_ceiling_max,
            );
        }
        self.max_secs = self.max_secs.max(self.min_secs);
    }

    pub fn next_pause(&self) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs_f64(self.min_secs);
        }
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    calls: AtomicU64,
    writes: AtomicU64,
    rate_limit_hits: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    pub writes: u64,
    pub rate_limit_hits: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub backoff: BackoffPolicy,
    pub delay: AdaptiveDelayConfig,
    /// Pause after every successful value write.
    pub write_pause: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            delay: AdaptiveDelayConfig::default(),
            write_pause: Duration::from_millis(1500),
        }
    }
}

/// Routes every remote call through quota backoff and the adaptive pacing controller.
pub struct RateLimitedClient {
    store: Arc<dyn SheetStore>,
    pause: Arc<dyn Pause>,
    backoff: BackoffPolicy,
    write_pause: Duration,
    delay: Mutex<AdaptiveDelay>,
    counters: CallCounters,
}

impl RateLimitedClient {
    pub fn new(store: Arc<dyn SheetStore>, pause: Arc<dyn Pause>, config: ClientConfig) -> Self {
        Self {
            store,
            pause,
            backoff: config.backoff,
            write_pause: config.write_pause,
            delay: Mutex::new(AdaptiveDelay::new(config.delay)),
            counters: CallCounters::default(),
        }
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::Relaxed),
        }
    }

    pub async fn delay_state(&self) -> AdaptiveDelay {
        self.delay.lock().await.clone()
    }

    pub async fn on_batch(&self) {
        let mut delay = self.delay.lock().await;
        delay.on_batch();
        let (min, max) = delay.window();
        debug!(min_secs = min.as_secs_f64(), max_secs = max.as_secs_f64(), "batch cool-down applied");
    }

    /// The jittered pause to take between work items.
    pub async fn next_pace(&self) -> Duration {
        self.delay.lock().await.next_pause()
    }

    pub async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            self.pause.pause(duration).await;
        }
    }

    async fn call<T, F, Fut>(&self, op: StoreOp, sheet: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let span = info_span!("sheet_call", op = op.as_str(), sheet);
        async move {
            let mut attempt = 0usize;
            loop {
                self.counters.calls.fetch_add(1, Ordering::Relaxed);
                if op.is_value_write() {
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                }

                match f().await {
                    Ok(value) => {
                        self.delay.lock().await.on_success();
                        if op.is_value_write() {
                            self.sleep(self.write_pause).await;
                        }
                        return Ok(value);
                    }
                    Err(err) if err.is_rate_limited() => {
                        self.counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                        let (min, max) = {
                            let mut delay = self.delay.lock().await;
                            delay.on_rate_limit();
                            delay.window()
                        };
                        if attempt >= self.backoff.max_retries {
                            warn!(attempt, "quota still exhausted after retries");
                            return Err(err);
                        }
                        let wait = self.backoff.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            wait_secs = wait.as_secs(),
                            pace_min_secs = min.as_secs_f64(),
                            pace_max_secs = max.as_secs_f64(),
                            "remote quota exceeded, backing off"
                        );
                        self.sleep(wait).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn ensure_sheet(&self, sheet: &str) -> Result<(), StoreError> {
        let store = &self.store;
        self.call(StoreOp::EnsureSheet, sheet, move || store.ensure_sheet(sheet))
            .await
    }

    pub async fn read_all(&self, sheet: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let store = &self.store;
        self.call(StoreOp::ReadAll, sheet, move || store.read_all(sheet))
            .await
    }

    pub async fn write_range(
        &self,
        sheet: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let store = &self.store;
        self.call(StoreOp::WriteRange, sheet, move || {
            store.write_range(sheet, range, values.clone())
        })
        .await
    }

    pub async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<Option<u32>, StoreError> {
        let store = &self.store;
        self.call(StoreOp::AppendRow, sheet, move || store.append_row(sheet, row.clone()))
            .await
    }

    pub async fn batch_write(&self, sheet: &str, updates: Vec<RangeUpdate>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let store = &self.store;
        self.call(StoreOp::BatchWrite, sheet, move || {
            store.batch_write(sheet, updates.clone())
        })
        .await
    }

    pub async fn annotate_row(
        &self,
        sheet: &str,
        row: u32,
        width: usize,
        note: &str,
    ) -> Result<(), StoreError> {
        let store = &self.store;
        self.call(StoreOp::Annotate, sheet, move || {
            store.annotate_row(sheet, row, width, note)
        })
        .await
    }

    pub async fn freeze_header_row(&self, sheet: &str) -> Result<(), StoreError> {
        let store = &self.store;
        self.call(StoreOp::FreezeHeader, sheet, move || store.freeze_header_row(sheet))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(store: Arc<MemorySheetStore>, pause: Arc<RecordingPause>) -> RateLimitedClient {
        RateLimitedClient::new(
            store,
            pause,
            ClientConfig {
                write_pause: Duration::ZERO,
                ..ClientConfig::default()
            },
        )
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(100),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(100));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(100));
    }

    #[test]
    fn a1_helpers_round_trip_columns() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(22), "W");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(row_range(5, 0, 22), "A5:W5");
        assert_eq!(parse_a1_cell("B12:C12"), Some((1, 12)));
        assert_eq!(parse_a1_cell("'ProfilesTarget'!A41:W41"), Some((0, 41)));
        assert_eq!(parse_a1_cell("AA3"), Some((26, 3)));
        assert_eq!(parse_a1_cell("nonsense"), None);
        assert_eq!(qualified_range("Bob's", "A1"), "'Bob''s'!A1");
    }

    #[tokio::test]
    async fn three_rate_limits_then_success_backs_off_three_times() {
        let store = Arc::new(MemorySheetStore::new().with_sheet("Target", vec![vec!["Nickname".into()]]));
        for _ in 0..3 {
            store.fail_next(StoreOp::ReadAll, StoreError::RateLimited("429".into())).await;
        }
        let pause = Arc::new(RecordingPause::new());
        let client = client_with(store.clone(), pause.clone());

        let rows = client.read_all("Target").await.expect("fourth attempt succeeds");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            pause.recorded(),
            vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120)
            ]
        );
        assert_eq!(client.stats().rate_limit_hits, 3);
        assert_eq!(client.stats().calls, 4);

        // the success already paid back one hit; sustained success drains the rest
        assert_eq!(client.delay_state().await.hits(), 2);
        client.read_all("Target").await.unwrap();
        client.read_all("Target").await.unwrap();
        assert_eq!(client.delay_state().await.hits(), 0);
    }

    #[tokio::test]
    async fn rate_limit_overflow_surfaces_after_bounded_retries() {
        let store = Arc::new(MemorySheetStore::new().with_sheet("Target", vec![]));
        for _ in 0..4 {
            store.fail_next(StoreOp::ReadAll, StoreError::RateLimited("429".into())).await;
        }
        let pause = Arc::new(RecordingPause::new());
        let client = client_with(store, pause.clone());

        let err = client.read_all("Target").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(pause.recorded().len(), 3);
    }

    #[tokio::test]
    async fn non_quota_errors_are_not_retried() {
        let store = Arc::new(MemorySheetStore::new().with_sheet("Target", vec![]));
        store
            .fail_next(
                StoreOp::WriteRange,
                StoreError::Remote {
                    status: 500,
                    message: "backend".into(),
                },
            )
            .await;
        let pause = Arc::new(RecordingPause::new());
        let client = client_with(store.clone(), pause.clone());

        let err = client
            .write_range("Target", "B2:C2", vec![vec!["x".into(), "y".into()]])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Remote { status: 500, .. }));
        assert!(pause.recorded().is_empty());
        assert_eq!(client.stats().calls, 1);
    }

    #[tokio::test]
    async fn writes_are_followed_by_the_write_pause() {
        let store = Arc::new(MemorySheetStore::new().with_sheet("Target", vec![]));
        let pause = Arc::new(RecordingPause::new());
        let client = RateLimitedClient::new(
            store,
            pause.clone(),
            ClientConfig {
                write_pause: Duration::from_millis(1500),
                ..ClientConfig::default()
            },
        );

        client.read_all("Target").await.unwrap();
        client
            .write_range("Target", "A1", vec![vec!["Nickname".into()]])
            .await
            .unwrap();
        assert_eq!(pause.recorded(), vec![Duration::from_millis(1500)]);
        assert_eq!(client.stats().writes, 1);
    }

    #[test]
    fn adaptive_delay_grows_on_quota_hits_and_respects_ceiling() {
        let start = Instant::now();
        let mut delay = AdaptiveDelay::new_at(AdaptiveDelayConfig::default(), start);
        for _ in 0..20 {
            delay.on_rate_limit_at(start);
        }
        let (min, max) = delay.window();
        assert_eq!(min, Duration::from_secs(5));
        assert_eq!(max, Duration::from_secs(10));
        assert_eq!(delay.hits(), 20);
    }

    #[test]
    fn adaptive_delay_decays_only_after_quiet_window_and_never_below_floor() {
        let start = Instant::now();
        let mut delay = AdaptiveDelay::new_at(AdaptiveDelayConfig::default(), start);
        delay.on_rate_limit_at(start);
        let (grown_min, _) = delay.window();
        assert!(grown_min > Duration::from_millis(500));

        delay.on_success_at(start + Duration::from_secs(2));
        assert_eq!(delay.window().0, grown_min);

        delay.on_success_at(start + Duration::from_secs(11));
        assert!(delay.window().0 < grown_min);

        let mut at = start + Duration::from_secs(11);
        for _ in 0..500 {
            at += Duration::from_secs(11);
            delay.on_success_at(at);
        }
        assert_eq!(delay.window(), (Duration::from_millis(500), Duration::from_secs(1)));
    }

    #[test]
    fn batch_growth_is_capped_by_batch_ceiling() {
        let mut delay = AdaptiveDelay::new(AdaptiveDelayConfig::default());
        delay.on_batch();
        let (min, max) = delay.window();
        assert!((min.as_secs_f64() - 0.6).abs() < 1e-9);
        assert!((max.as_secs_f64() - 1.2).abs() < 1e-9);
        for _ in 0..50 {
            delay.on_batch();
        }
        assert_eq!(delay.window(), (Duration::from_secs(3), Duration::from_secs(6)));
        let pause = delay.next_pause();
        assert!(pause >= Duration::from_secs(3) && pause <= Duration::from_secs(6));
    }

    #[test]
    fn floor_above_ceiling_still_holds_the_floor() {
        let mut delay = AdaptiveDelay::new(AdaptiveDelayConfig::with_floor(
            Duration::from_secs(8),
            Duration::from_secs(12),
        ));
        delay.on_rate_limit();
        delay.on_batch();
        assert_eq!(delay.window(), (Duration::from_secs(8), Duration::from_secs(12)));
    }
}
