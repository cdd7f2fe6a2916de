//! Google Sheets v4 REST backend.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{parse_a1_cell, qualified_range, RangeUpdate, SheetStore, StoreError};

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("parsing service account json")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub enum SheetsAuth {
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
}

#[derive(Debug, Clone)]
pub struct GoogleSheetsConfig {
    pub spreadsheet_id: String,
    pub api_base: String,
    pub timeout: Duration,
    pub auth: SheetsAuth,
}

impl GoogleSheetsConfig {
    pub fn new(spreadsheet_id: impl Into<String>, auth: SheetsAuth) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            api_base: "https://sheets.googleapis.com".to_string(),
            timeout: Duration::from_secs(30),
            auth,
        }
    }
}

/// Pull the spreadsheet id out of a `.../spreadsheets/d/<id>/edit` URL; bare ids pass through.
pub fn spreadsheet_id_from_url(url_or_id: &str) -> Option<String> {
    let trimmed = url_or_id.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.contains('/') {
        return Some(trimmed.to_string());
    }
    let mut parts = trimmed.split('/');
    parts.find(|p| *p == "d")?;
    parts
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

fn cell_to_string(cell: JsonValue) -> String {
    match cell {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct GoogleSheetsStore {
    client: reqwest::Client,
    config: GoogleSheetsConfig,
    token: Mutex<Option<CachedToken>>,
    sheet_ids: Mutex<HashMap<String, i64>>,
}

impl GoogleSheetsStore {
    pub fn new(config: GoogleSheetsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
            sheet_ids: Mutex::new(HashMap::new()),
        })
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let key = match &self.config.auth {
            SheetsAuth::AccessToken(token) => return Ok(token.clone()),
            SheetsAuth::ServiceAccount(key) => key,
        };

        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        let claims = JwtClaims {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| StoreError::Auth(format!("signing token request: {e}")))?;

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;
        info!(client_email = %key.client_email, "obtained sheets access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + token.expires_in.unwrap_or(3600),
        });
        Ok(token.access_token)
    }

    fn url(&self, tail: &[&str]) -> Result<Url, StoreError> {
        self.spreadsheet_url("", tail)
    }

    /// `{base}/v4/spreadsheets/{id}{suffix}/{tail..}`; the suffix carries `:batchUpdate` style verbs.
    fn spreadsheet_url(&self, suffix: &str, tail: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| StoreError::Parse(format!("api base {}: {e}", self.config.api_base)))?;
        let id = format!("{}{suffix}", self.config.spreadsheet_id);
        url.path_segments_mut()
            .map_err(|_| StoreError::Parse("api base cannot be a base url".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<JsonValue>,
        sheet: &str,
    ) -> Result<reqwest::Response, StoreError> {
        let token = self.access_token().await?;
        let mut req = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => StoreError::RateLimited(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Auth(message),
            StatusCode::BAD_REQUEST if message.contains("Unable to parse range") => {
                StoreError::SheetNotFound(sheet.to_string())
            }
            _ => StoreError::Remote {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn refresh_sheet_ids(&self) -> Result<(), StoreError> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let resp = self.send(Method::GET, url, None, "").await?;
        let body: JsonValue = resp.json().await?;

        let mut ids = self.sheet_ids.lock().await;
        ids.clear();
        for sheet in body["sheets"].as_array().into_iter().flatten() {
            let props = &sheet["properties"];
            if let (Some(title), Some(id)) = (props["title"].as_str(), props["sheetId"].as_i64()) {
                ids.insert(title.to_string(), id);
            }
        }
        debug!(sheets = ids.len(), "loaded sheet ids");
        Ok(())
    }

    async fn sheet_id(&self, sheet: &str) -> Result<i64, StoreError> {
        if let Some(id) = self.sheet_ids.lock().await.get(sheet).copied() {
            return Ok(id);
        }
        self.refresh_sheet_ids().await?;
        self.sheet_ids
            .lock()
            .await
            .get(sheet)
            .copied()
            .ok_or_else(|| StoreError::SheetNotFound(sheet.to_string()))
    }

    async fn spreadsheet_batch_update(&self, requests: JsonValue, sheet: &str) -> Result<JsonValue, StoreError> {
        let url = self.spreadsheet_url(":batchUpdate", &[])?;
        let resp = self
            .send(Method::POST, url, Some(json!({ "requests": requests })), sheet)
            .await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn ensure_sheet(&self, sheet: &str) -> Result<(), StoreError> {
        match self.sheet_id(sheet).await {
            Ok(_) => return Ok(()),
            Err(StoreError::SheetNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        info!(sheet, "creating missing sheet");
        let reply = self
            .spreadsheet_batch_update(
                json!([{
                    "addSheet": {
                        "properties": {
                            "title": sheet,
                            "gridProperties": { "rowCount": 1000, "columnCount": 26 }
                        }
                    }
                }]),
                sheet,
            )
            .await?;
        if let Some(id) = reply["replies"][0]["addSheet"]["properties"]["sheetId"].as_i64() {
            self.sheet_ids.lock().await.insert(sheet.to_string(), id);
        }
        Ok(())
    }

    async fn read_all(&self, sheet: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.url(&["values", &qualified_range(sheet, "A:ZZ")])?;
        let resp = self.send(Method::GET, url, None, sheet).await?;
        let range: ValueRange = resp.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn write_range(
        &self,
        sheet: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let target = qualified_range(sheet, range);
        let mut url = self.url(&["values", &target])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "range": target, "majorDimension": "ROWS", "values": values });
        self.send(Method::PUT, url, Some(body), sheet).await?;
        Ok(())
    }

    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<Option<u32>, StoreError> {
        let target = qualified_range(sheet, "A1");
        let mut url = self.url(&["values", &format!("{target}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "OVERWRITE");
        let body = json!({ "majorDimension": "ROWS", "values": [row] });
        let resp = self.send(Method::POST, url, Some(body), sheet).await?;
        let appended: AppendResponse = resp.json().await?;
        Ok(appended
            .updates
            .and_then(|u| u.updated_range)
            .and_then(|range| parse_a1_cell(&range))
            .map(|(_, row)| row))
    }

    async fn batch_write(&self, sheet: &str, updates: Vec<RangeUpdate>) -> Result<(), StoreError> {
        let url = self.url(&["values:batchUpdate"])?;
        let data: Vec<JsonValue> = updates
            .into_iter()
            .map(|u| {
                json!({
                    "range": qualified_range(sheet, &u.range),
                    "majorDimension": "ROWS",
                    "values": u.values,
                })
            })
            .collect();
        let body = json!({ "valueInputOption": "RAW", "data": data });
        self.send(Method::POST, url, Some(body), sheet).await?;
        Ok(())
    }

    async fn annotate_row(
        &self,
        sheet: &str,
        row: u32,
        width: usize,
        note: &str,
    ) -> Result<(), StoreError> {
        let sheet_id = self.sheet_id(sheet).await?;
        let cells: Vec<JsonValue> = (0..width).map(|_| json!({ "note": note })).collect();
        self.spreadsheet_batch_update(
            json!([{
                "updateCells": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": row.saturating_sub(1),
                        "endRowIndex": row,
                        "startColumnIndex": 0,
                        "endColumnIndex": width,
                    },
                    "rows": [{ "values": cells }],
                    "fields": "note",
                }
            }]),
            sheet,
        )
        .await?;
        Ok(())
    }

    async fn freeze_header_row(&self, sheet: &str) -> Result<(), StoreError> {
        let sheet_id = self.sheet_id(sheet).await?;
        self.spreadsheet_batch_update(
            json!([{
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": sheet_id,
                        "gridProperties": { "frozenRowCount": 1 }
                    },
                    "fields": "gridProperties.frozenRowCount",
                }
            }]),
            sheet,
        )
        .await?;
        Ok(())
    }
}
