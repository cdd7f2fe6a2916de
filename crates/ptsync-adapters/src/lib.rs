//! Profile scraper contract + the HTML profile page extractor.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use ptsync_core::{normalize_value, relative_to_absolute, truncate_chars, DisplayClock, ProfileField, ProfileRecord};
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "ptsync-adapters";

const INTRO_MAX_CHARS: usize = 250;

const SUSPENSION_INDICATORS: &[&str] = &[
    "accounts suspend",
    "aik se zyada fake accounts",
    "abuse ya harassment",
    "kisi aur user ki identity apnana",
    "accounts suspend kiye",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Suspended,
    Unverified,
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalKind::Suspended => f.write_str("suspended"),
            TerminalKind::Unverified => f.write_str("unverified"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("timed out loading {0}")]
    Timeout(String),
    #[error("blocked: {0}")]
    Blocked(String),
    #[error("could not extract profile: {0}")]
    Extract(String),
    /// The account can never be scraped normally. `snapshot` carries what is still known
    /// (status and reason) so it can be persisted.
    #[error("account {kind}: {reason}")]
    Terminal {
        kind: TerminalKind,
        reason: String,
        snapshot: Box<ProfileRecord>,
    },
}

/// Produces a full snapshot for one profile key.
#[async_trait]
pub trait ProfileScraper: Send + Sync {
    async fn scrape(&self, key: &str) -> Result<ProfileRecord, ScrapeError>;
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: String,
    /// Raw `Cookie` header value of an already authenticated session.
    pub session_cookie: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub fetch_recent_post: bool,
    pub display_clock: DisplayClock,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://damadam.pk".to_string(),
            session_cookie: None,
            user_agent: "ptsync/0.1".to_string(),
            timeout: Duration::from_secs(30),
            fetch_recent_post: true,
            display_clock: DisplayClock::default(),
        }
    }
}

impl SiteConfig {
    pub fn profile_url(&self, key: &str) -> String {
        format!("{}/users/{key}/", self.base_url.trim_end_matches('/'))
    }

    pub fn public_posts_url(&self, key: &str) -> String {
        format!("{}/profile/public/{key}", self.base_url.trim_end_matches('/'))
    }
}

pub fn to_absolute_url(base_url: &str, href: &str) -> String {
    let href = href.trim();
    let base = base_url.trim_end_matches('/');
    if href.is_empty() {
        String::new()
    } else if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{base}{href}")
    } else {
        format!("{base}/{href}")
    }
}

pub fn detect_suspension(page: &str) -> Option<&'static str> {
    let lower = page.to_lowercase();
    SUSPENSION_INDICATORS
        .iter()
        .copied()
        .find(|indicator| lower.contains(indicator))
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Extract(format!("selector `{css}`: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn select_first_text(scope: ElementRef<'_>, css: &str) -> Result<Option<String>, ScrapeError> {
    let sel = selector(css)?;
    Ok(scope.select(&sel).next().and_then(|n| text_or_none(element_text(n))))
}

fn select_first_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Result<Option<String>, ScrapeError> {
    let sel = selector(css)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

fn first_of(scope: ElementRef<'_>, candidates: &[&str]) -> Result<Option<String>, ScrapeError> {
    for css in candidates {
        if let Some(text) = select_first_text(scope, css)? {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

fn first_number(text: &str) -> Option<String> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Text of the `<span>` following a `<b>Label:</b>` marker.
fn labelled_value(root: ElementRef<'_>, label: &str) -> Result<Option<String>, ScrapeError> {
    let bold = selector("b")?;
    for b in root.select(&bold) {
        if !element_text(b).contains(label) {
            continue;
        }
        let value = b
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "span")
            .and_then(|span| text_or_none(element_text(span)));
        if value.is_some() {
            return Ok(value);
        }
    }
    Ok(None)
}

fn normalize_gender(value: &str) -> String {
    let lower = value.to_lowercase();
    if lower.contains("female") {
        "Female".to_string()
    } else if lower.contains("male") {
        "Male".to_string()
    } else {
        String::new()
    }
}

fn normalize_married(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "yes" | "married" => "Yes".to_string(),
        "no" | "single" | "unmarried" => "No".to_string(),
        _ => String::new(),
    }
}

fn base_snapshot(key: &str, site: &SiteConfig, now: DateTime<FixedOffset>) -> ProfileRecord {
    let profile_url = site.profile_url(key);
    ProfileRecord::for_key(key)
        .with(ProfileField::ProfileLink, profile_url.trim_end_matches('/'))
        .with(ProfileField::PostUrl, site.public_posts_url(key))
        .with(ProfileField::Source, "Target")
        .with(ProfileField::ScrapedAt, ptsync_core::format_stamp(now))
}

fn terminal(kind: TerminalKind, reason: &str, snapshot: ProfileRecord) -> ScrapeError {
    ScrapeError::Terminal {
        kind,
        reason: reason.to_string(),
        snapshot: Box::new(snapshot),
    }
}

/// Extract a snapshot from a rendered profile page.
pub fn parse_profile_page(
    key: &str,
    page: &str,
    site: &SiteConfig,
    now: DateTime<FixedOffset>,
) -> Result<ProfileRecord, ScrapeError> {
    let mut data = base_snapshot(key, site, now);

    if let Some(reason) = detect_suspension(page) {
        data.set(ProfileField::Status, "Banned");
        data.set(
            ProfileField::Intro,
            truncate_chars(&format!("Account Suspended: {reason}"), INTRO_MAX_CHARS),
        );
        return Err(terminal(TerminalKind::Suspended, reason, data));
    }
    if page.to_lowercase().contains("account suspended") {
        data.set(ProfileField::Status, "Banned");
        data.set(ProfileField::Intro, "Account Suspended");
        return Err(terminal(TerminalKind::Suspended, "account suspended", data));
    }

    let document = Html::parse_document(page);
    let root = document.root_element();

    let tomato_box = selector("div[style*='tomato']")?;
    if page.contains("UNVERIFIED USER")
        || page.contains("background:tomato")
        || root.select(&tomato_box).next().is_some()
    {
        data.set(ProfileField::Status, "Unverified");
        data.set(ProfileField::Intro, "Unverified user");
        return Err(terminal(TerminalKind::Unverified, "unverified user", data));
    }

    if select_first_text(root, "h1")?.is_none() {
        return Err(ScrapeError::Blocked(format!("{key}: profile header missing")));
    }

    data.set(ProfileField::Status, "Normal");

    if let Some(id) = select_first_attr(root, "input[name='tid']", "value")? {
        data.set(ProfileField::Id, id);
    }

    let lower = page.to_lowercase();
    let friend = if page.contains("UNFOLLOW") && lower.contains("/follow/remove/") {
        "Yes"
    } else if page.contains("FOLLOW") && lower.contains("/follow/add/") {
        "No"
    } else {
        ""
    };
    data.set(ProfileField::Friend, friend);

    if let Some(name) = select_first_text(root, ".cp.ow")? {
        data.set(ProfileField::MehfilName, name);
    }
    if let Some(since) = select_first_text(root, ".cs.sp")? {
        if since.contains("owner since") {
            data.set(ProfileField::MehfilDate, relative_to_absolute(&since, now));
        }
    }

    if let Some(intro) = first_of(root, &["span.cl.sp.lsp.nos", "span.cl", ".ow span.nos"])? {
        data.set(ProfileField::Intro, truncate_chars(&intro, INTRO_MAX_CHARS));
    }

    for (label, field) in [
        ("City:", ProfileField::City),
        ("Gender:", ProfileField::Gender),
        ("Married:", ProfileField::Married),
        ("Age:", ProfileField::Age),
        ("Joined:", ProfileField::Joined),
    ] {
        let Some(value) = labelled_value(root, label)? else {
            continue;
        };
        let value = match field {
            ProfileField::Joined => relative_to_absolute(&value, now),
            ProfileField::Gender => normalize_gender(&value),
            ProfileField::Married => normalize_married(&value),
            _ => normalize_value(&value),
        };
        data.set(field, value);
    }

    if let Some(followers) = first_of(root, &["span.cl.sp.clb", ".cl.sp.clb"])?.as_deref().and_then(first_number) {
        data.set(ProfileField::Followers, followers);
    }

    if let Some(posts) = first_of(
        root,
        &[
            "a[href*='/profile/public/'] button div:first-child",
            "a[href*='/profile/public/'] button div",
        ],
    )?
    .as_deref()
    .and_then(first_number)
    {
        data.set(ProfileField::Posts, posts);
    }

    for css in [
        "img[src*='avatar-imgs']",
        "img[src*='avatar']",
        "div[style*='whitesmoke'] img[src*='cloudfront.net']",
    ] {
        if let Some(src) = select_first_attr(root, css, "src")? {
            if src.contains("avatar") || src.contains("cloudfront.net") {
                data.set(ProfileField::Image, src.replace("/thumbnail/", "/"));
                break;
            }
        }
    }

    Ok(data)
}

/// Latest post link and its absolute date from the public posts page.
pub fn parse_recent_post(
    page: &str,
    base_url: &str,
    now: DateTime<FixedOffset>,
) -> Result<(String, String), ScrapeError> {
    let document = Html::parse_document(page);
    let article_sel = selector("article.mbl")?;
    let Some(article) = document.select(&article_sel).next() else {
        return Ok((String::new(), String::new()));
    };

    let mut link = String::new();
    for css in [
        "a[href*='/content/']",
        "a[href*='/comments/text/']",
        "a[href*='/comments/image/']",
    ] {
        if let Some(href) = select_first_attr(article, css, "href")? {
            link = to_absolute_url(base_url, &href);
            break;
        }
    }

    let posted = first_of(
        article,
        &[
            "span[itemprop='datePublished']",
            "time[itemprop='datePublished']",
            "span.cxs.cgy",
            "time",
        ],
    )?
    .map(|text| relative_to_absolute(&text, now))
    .unwrap_or_default();

    Ok((link, posted))
}

/// Fetches profile pages over HTTP with an existing session cookie.
pub struct HtmlProfileScraper {
    client: reqwest::Client,
    site: SiteConfig,
}

impl HtmlProfileScraper {
    pub fn new(site: SiteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(site.timeout)
            .user_agent(site.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, site })
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ScrapeError> {
        let mut req = self.client.get(url);
        if let Some(cookie) = &self.site.session_cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        let resp = req.send().await.map_err(|err| {
            if err.is_timeout() {
                ScrapeError::Timeout(url.to_string())
            } else {
                ScrapeError::Blocked(format!("{url}: {err}"))
            }
        })?;

        let status = resp.status();
        if resp.url().path().contains("login") {
            return Err(ScrapeError::Blocked(format!("{url}: session expired (redirected to login)")));
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(ScrapeError::Timeout(url.to_string()));
        }
        if !status.is_success() {
            return Err(ScrapeError::Blocked(format!("{url}: http {status}")));
        }
        resp.text().await.map_err(|err| {
            if err.is_timeout() {
                ScrapeError::Timeout(url.to_string())
            } else {
                ScrapeError::Blocked(format!("{url}: {err}"))
            }
        })
    }
}

#[async_trait]
impl ProfileScraper for HtmlProfileScraper {
    async fn scrape(&self, key: &str) -> Result<ProfileRecord, ScrapeError> {
        let now = self.site.display_clock.now();
        debug!(key, "fetching profile page");
        let page = self.fetch_page(&self.site.profile_url(key)).await?;
        let mut data = match parse_profile_page(key, &page, &self.site, now) {
            Ok(data) => data,
            Err(err @ ScrapeError::Terminal { .. }) => {
                warn!(key, error = %err, "terminal account state");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let has_posts = !matches!(data.get(ProfileField::Posts), "" | "0");
        if self.site.fetch_recent_post && has_posts {
            match self.fetch_page(&self.site.public_posts_url(key)).await {
                Ok(posts_page) => {
                    let (link, posted) = parse_recent_post(&posts_page, &self.site.base_url, now)?;
                    data.set(ProfileField::LastPost, normalize_value(&link));
                    data.set(ProfileField::LastPostTime, posted);
                }
                Err(err) => warn!(key, error = %err, "recent post lookup failed"),
            }
        }

        info!(
            key,
            gender = data.get(ProfileField::Gender),
            city = data.get(ProfileField::City),
            posts = data.get(ProfileField::Posts),
            "profile scraped"
        );
        Ok(data)
    }
}
