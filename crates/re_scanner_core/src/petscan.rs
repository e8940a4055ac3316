use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{HttpSettings, ScannerConfig};
use crate::error::IoFailure;
use crate::http::{
    build_client, is_retryable_body_error, is_retryable_error, is_retryable_status,
    wait_before_retry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilters {
    pub language: String,
    pub project: String,
    pub categories: Vec<String>,
    pub negative_categories: Vec<String>,
    pub templates: Vec<String>,
    pub namespace: i32,
    pub depth: u32,
    /// Only pages edited before this timestamp (`YYYYMMDDhhmmss`).
    pub last_edit_before: Option<String>,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            language: "de".to_string(),
            project: "wikisource".to_string(),
            categories: Vec::new(),
            negative_categories: Vec::new(),
            templates: Vec::new(),
            namespace: 0,
            depth: 1,
            last_edit_before: None,
        }
    }
}

impl SearchFilters {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            categories: config.petscan.categories.clone(),
            negative_categories: config.petscan.negative_categories.clone(),
            templates: config.search_templates(),
            depth: config.petscan.depth.unwrap_or(1),
            ..Self::default()
        }
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("language".to_string(), self.language.clone()),
            ("project".to_string(), self.project.clone()),
            ("depth".to_string(), self.depth.to_string()),
            (format!("ns[{}]", self.namespace), "1".to_string()),
            ("combination".to_string(), "subset".to_string()),
            ("sortby".to_string(), "date".to_string()),
            ("sortorder".to_string(), "ascending".to_string()),
            ("format".to_string(), "json".to_string()),
            ("doit".to_string(), "1".to_string()),
        ];
        if !self.categories.is_empty() {
            pairs.push(("categories".to_string(), self.categories.join("\n")));
        }
        if !self.negative_categories.is_empty() {
            pairs.push((
                "negcats".to_string(),
                self.negative_categories.join("\n"),
            ));
        }
        if !self.templates.is_empty() {
            pairs.push(("templates_yes".to_string(), self.templates.join("\n")));
        }
        if let Some(before) = &self.last_edit_before {
            pairs.push(("before".to_string(), before.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: u64,
    pub title: String,
    pub namespace_text: String,
    pub size: u64,
    pub last_touched: String,
}

impl SearchHit {
    /// Title with namespace prefix and spaces instead of underscores.
    pub fn full_title(&self) -> String {
        let title = self.title.replace('_', " ");
        if self.namespace_text.is_empty() {
            title
        } else {
            format!("{}:{title}", self.namespace_text)
        }
    }
}

pub trait QueryService {
    fn search(&mut self, filters: &SearchFilters) -> Result<Vec<SearchHit>>;
}

pub struct PetScanClient {
    client: Client,
    url: String,
    settings: HttpSettings,
}

impl PetScanClient {
    pub fn new(url: &str, settings: HttpSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings)?,
            url: url.to_string(),
            settings,
        })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        Self::new(&config.petscan_url(), config.http_settings())
    }
}

impl QueryService for PetScanClient {
    fn search(&mut self, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        let pairs = filters.query_pairs();
        let max_retries = self.settings.max_retries;
        let mut last_error = String::new();
        for attempt in 0..=max_retries {
            let response = self
                .client
                .get(&self.url)
                .header("User-Agent", self.settings.user_agent.clone())
                .query(&pairs)
                .send();
            match response {
                Ok(response) if response.status().is_success() => match response.text() {
                    Ok(body) => return parse_response(&body),
                    Err(error) if is_retryable_body_error(&error) => {
                        last_error = format!("failed to read PetScan response: {error}");
                    }
                    Err(error) => {
                        return Err(IoFailure::Fatal(format!(
                            "failed to read PetScan response: {error}"
                        ))
                        .into());
                    }
                },
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) {
                        return Err(IoFailure::Fatal(format!(
                            "PetScan request failed with HTTP {status}"
                        ))
                        .into());
                    }
                    last_error = format!("HTTP {status}");
                }
                Err(error) => {
                    if !is_retryable_error(&error) {
                        return Err(IoFailure::Fatal(error.to_string()).into());
                    }
                    last_error = error.to_string();
                }
            }
            if attempt < max_retries {
                tracing::warn!(attempt, error = %last_error, "retrying PetScan query");
                wait_before_retry(self.settings.retry_delay_ms, attempt, false);
            }
        }
        Err(IoFailure::Transient {
            attempts: max_retries + 1,
            message: last_error,
        }
        .into())
    }
}

/// Decode the `*[0].a.*[]` page list of a PetScan JSON answer.
pub fn parse_response(body: &str) -> Result<Vec<SearchHit>> {
    let parsed: PetScanResponse =
        serde_json::from_str(body).context("failed to decode PetScan response")?;
    let Some(first) = parsed.outer.into_iter().next() else {
        return Ok(Vec::new());
    };
    Ok(first
        .a
        .pages
        .into_iter()
        .map(|page| SearchHit {
            id: page.id,
            title: page.title,
            namespace_text: page.nstext,
            size: page.len,
            last_touched: page.touched,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct PetScanResponse {
    #[serde(rename = "*", default)]
    outer: Vec<PetScanSection>,
}

#[derive(Debug, Deserialize)]
struct PetScanSection {
    a: PetScanPageList,
}

#[derive(Debug, Deserialize)]
struct PetScanPageList {
    #[serde(rename = "*", default)]
    pages: Vec<PetScanPage>,
}

#[derive(Debug, Deserialize)]
struct PetScanPage {
    id: u64,
    title: String,
    #[serde(default)]
    nstext: String,
    #[serde(default)]
    len: u64,
    #[serde(default)]
    touched: String,
}

#[cfg(test)]
mod tests {
    use super::{SearchFilters, parse_response};

    #[test]
    fn decodes_page_list() {
        let body = r#"{
            "n": "result",
            "*": [{"n": "combination", "a": {"type": "subset", "*": [
                {"id": 1, "len": 2048, "n": "page", "namespace": 0, "nstext": "",
                 "title": "RE:Aal_(Fisch)", "touched": "20240101120000"},
                {"id": 2, "len": 10, "n": "page", "namespace": 0, "nstext": "",
                 "title": "RE:Aba", "touched": "20240102120000"}
            ]}}]
        }"#;
        let hits = parse_response(body).expect("parse");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].full_title(), "RE:Aal (Fisch)");
        assert_eq!(hits[0].size, 2048);
        assert_eq!(hits[1].last_touched, "20240102120000");
    }

    #[test]
    fn empty_and_malformed_answers() {
        assert!(parse_response(r#"{"*": []}"#).expect("parse").is_empty());
        assert!(parse_response("<html>").is_err());
    }

    #[test]
    fn query_pairs_include_filters() {
        let filters = SearchFilters {
            categories: vec!["A".to_string(), "B".to_string()],
            templates: vec!["REDaten".to_string()],
            last_edit_before: Some("20240101000000".to_string()),
            ..SearchFilters::default()
        };
        let pairs = filters.query_pairs();
        let value = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        assert_eq!(value("categories").as_deref(), Some("A\nB"));
        assert_eq!(value("templates_yes").as_deref(), Some("REDaten"));
        assert_eq!(value("ns[0]").as_deref(), Some("1"));
        assert_eq!(value("before").as_deref(), Some("20240101000000"));
        assert_eq!(value("negcats"), None);
    }
}
