use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use finbot_core::{
    config::DEFAULT_SHEETS_BASE_URL,
    errors::{Error, PersistError},
    persistence::TabularStore,
};

use crate::auth::TokenSource;

/// Columns written by `append_row`: date, kind, amount, description, category.
const APPEND_COLUMNS: &str = "A:E";
const MAX_ERROR_BODY: usize = 300;

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

/// [`TabularStore`] over the Google Sheets v4 REST API. Destinations are
/// tabs of a single spreadsheet.
pub struct SheetsStore {
    spreadsheet_id: String,
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsStore {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> finbot_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("reqwest client build: {e}")))?;
        Ok(Self {
            spreadsheet_id: spreadsheet_id.into(),
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            http,
            tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/v4/spreadsheets/{id}/{tail...}`, each tail segment percent-encoded.
    fn url(&self, tail: &[&str]) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| format!("bad base url: {e}"))?;
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| "base url cannot carry a path".to_string())?;
            segs.pop_if_empty()
                .extend(["v4", "spreadsheets"])
                .extend(tail);
        }
        Ok(url)
    }

    fn sheet_url(&self, suffix: &str) -> Result<Url, String> {
        let last = format!("{}{suffix}", self.spreadsheet_id);
        self.url(&[last.as_str()])
    }
}

/// A1 range covering the appended columns of tab `name`. The tab name is
/// always single-quoted so digits, spaces and punctuation parse as a title.
fn a1_range(name: &str) -> String {
    format!("'{}'!{APPEND_COLUMNS}", name.replace('\'', "''"))
}

async fn error_body(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!(
        "{status}: {}",
        body.chars().take(MAX_ERROR_BODY).collect::<String>()
    )
}

#[async_trait]
impl TabularStore for SheetsStore {
    async fn list_destinations(&self) -> Result<Vec<String>, PersistError> {
        let mut url = self.sheet_url("").map_err(PersistError::Lookup)?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let token = self.tokens.access_token().await?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PersistError::Lookup(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PersistError::Lookup(error_body(resp).await));
        }

        let meta: SpreadsheetMeta = resp
            .json()
            .await
            .map_err(|e| PersistError::Lookup(format!("metadata parse failed: {e}")))?;
        let titles: Vec<String> = meta
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect();
        debug!(count = titles.len(), "listed sheet tabs");
        Ok(titles)
    }

    async fn create_destination(&self, name: &str) -> Result<(), PersistError> {
        let create_err = |reason: String| PersistError::Create {
            name: name.to_string(),
            reason,
        };
        let url = self.sheet_url(":batchUpdate").map_err(create_err)?;
        let token = self.tokens.access_token().await?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": name } } }]
        });

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| create_err(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = error_body(resp).await;
        // Another writer added the tab between our lookup and this call.
        if status == StatusCode::BAD_REQUEST && detail.contains("already exists") {
            info!(destination = name, "tab created concurrently elsewhere");
            return Ok(());
        }
        Err(create_err(detail))
    }

    async fn append_row(&self, name: &str, row: &[Value]) -> Result<(), PersistError> {
        let append_err = |reason: String| PersistError::Append {
            name: name.to_string(),
            reason,
        };
        let range = format!("{}:append", a1_range(name));
        let mut url = self
            .url(&[self.spreadsheet_id.as_str(), "values", range.as_str()])
            .map_err(append_err)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let token = self.tokens.access_token().await?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| append_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(append_err(error_body(resp).await));
        }
        debug!(destination = name, "row appended");
        Ok(())
    }
}
