use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::config::ScannerConfig;
use crate::error::IoFailure;
use crate::http::ApiClient;

/// A wiki page as fetched from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub revision_id: Option<i64>,
    pub timestamp: Option<String>,
    /// Server time of the fetch, sent back on save to detect deletions since.
    pub fetched_at: Option<String>,
    pub content: String,
}

/// Read and write access to the wiki holding the pages.
pub trait DocumentStore {
    /// `None` when the page does not exist.
    fn fetch_page(&mut self, title: &str) -> Result<Option<RemotePage>>;
    /// Saves over the revision in `base`. An intervening edit fails with
    /// `IoFailure::EditConflict` instead of being overwritten.
    fn save_page(&mut self, base: &RemotePage, content: &str, summary: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

pub struct MediaWikiStore {
    api: ApiClient,
}

impl MediaWikiStore {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        let api = ApiClient::new(&config.wiki_api_url(), config.http_settings())?;
        Ok(Self::new(api))
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.api.login(username, password)
    }
}

impl DocumentStore for MediaWikiStore {
    fn fetch_page(&mut self, title: &str) -> Result<Option<RemotePage>> {
        let response = self
            .api
            .get_json(&[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp|ids".to_string()),
                ("rvslots", "main".to_string()),
                ("curtimestamp", "1".to_string()),
            ])
            .with_context(|| format!("failed to fetch {title}"))?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page content response")?;
        let fetched_at = parsed.curtimestamp;
        Ok(parsed.query.pages.into_iter().find_map(|page| {
            if page.missing.unwrap_or(false) {
                return None;
            }
            let revision = page.revisions.into_iter().next()?;
            let content = revision.slots?.main?.content;
            Some(RemotePage {
                title: page.title,
                revision_id: revision.revid,
                timestamp: revision.timestamp,
                fetched_at: fetched_at.clone(),
                content,
            })
        }))
    }

    fn save_page(&mut self, base: &RemotePage, content: &str, summary: &str) -> Result<()> {
        let title = &base.title;
        let token = self.api.csrf_token()?;
        let response = self
            .api
            .post_json(&edit_params(base, content, summary, token), true)
            .with_context(|| format!("failed to save {title}"))?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            return Err(IoFailure::Fatal(format!(
                "edit failed for {title}: {}",
                edit.result.unwrap_or_else(|| "unknown".to_string())
            ))
            .into());
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.api.request_count()
    }
}

fn edit_params(
    base: &RemotePage,
    content: &str,
    summary: &str,
    token: String,
) -> Vec<(&'static str, String)> {
    vec![
        ("action", "edit".to_string()),
        ("title", base.title.clone()),
        ("text", content.to_string()),
        ("summary", summary.to_string()),
        ("bot", "1".to_string()),
        ("nocreate", "1".to_string()),
        ("baserevid", base.revision_id.map(|id| id.to_string()).unwrap_or_default()),
        ("basetimestamp", base.timestamp.clone().unwrap_or_default()),
        ("starttimestamp", base.fetched_at.clone().unwrap_or_default()),
        ("token", token),
    ]
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    curtimestamp: Option<String>,
    query: QueryPayload,
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: Option<i64>,
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    result: Option<String>,
}
