use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tables::TablePaths;

pub const DEFAULT_CONFIG_PATH: &str = ".re_scanner/config.toml";
pub const DEFAULT_USER_AGENT: &str = "re-scanner/0.1";
pub const DEFAULT_WIKI_API_URL: &str = "https://de.wikisource.org/w/api.php";
pub const DEFAULT_WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_PETSCAN_URL: &str = "https://petscan.wmflabs.org/";
pub const DEFAULT_SITE: &str = "dewikisource";
pub const DEFAULT_LEDGER_PATH: &str = ".re_scanner/ledger.db";
pub const DEFAULT_TABLES_DIR: &str = ".re_scanner/tables";
pub const DEFAULT_ERROR_CATEGORY: &str = "RE:Wartung:Strukturfehler";
pub const DEFAULT_SEARCH_TEMPLATE: &str = "REDaten";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScannerConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub wikidata: WikidataSection,
    #[serde(default)]
    pub petscan: PetscanSection,
    #[serde(default)]
    pub scanner: ScannerSection,
    #[serde(default)]
    pub tables: TablesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikidataSection {
    pub api_url: Option<String>,
    /// Sitelink site id of the wiki the pages live on.
    pub site: Option<String>,
    /// Property id for cross-reference statements. Unset means none are written.
    pub directs_readers_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PetscanSection {
    pub url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub negative_categories: Vec<String>,
    #[serde(default)]
    pub templates: Vec<String>,
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScannerSection {
    pub ledger_path: Option<String>,
    pub max_pages: Option<usize>,
    pub deadline_minutes: Option<u64>,
    pub error_category: Option<String>,
    /// Task codes to run; empty means all.
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TablesSection {
    pub dir: Option<String>,
    pub volumes: Option<String>,
    pub authors: Option<String>,
    pub lemma_items: Option<String>,
}

/// Transport settings shared by every HTTP collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            rate_limit_read_ms: 300,
            rate_limit_write_ms: 1_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl ScannerConfig {
    /// env RE_WIKI_API_URL > config > default.
    pub fn wiki_api_url(&self) -> String {
        env_or("RE_WIKI_API_URL", self.wiki.api_url.as_deref(), DEFAULT_WIKI_API_URL)
    }

    pub fn wikidata_api_url(&self) -> String {
        env_or(
            "RE_WIKIDATA_API_URL",
            self.wikidata.api_url.as_deref(),
            DEFAULT_WIKIDATA_API_URL,
        )
    }

    pub fn petscan_url(&self) -> String {
        env_or("RE_PETSCAN_URL", self.petscan.url.as_deref(), DEFAULT_PETSCAN_URL)
    }

    pub fn site(&self) -> &str {
        self.wikidata.site.as_deref().unwrap_or(DEFAULT_SITE)
    }

    /// env RE_DIRECTS_READERS_TO > config; no default.
    pub fn directs_readers_to(&self) -> Option<String> {
        env_nonempty("RE_DIRECTS_READERS_TO").or_else(|| {
            self.wikidata
                .directs_readers_to
                .clone()
                .filter(|value| !value.trim().is_empty())
        })
    }

    pub fn user_agent(&self) -> String {
        env_or("RE_USER_AGENT", self.wiki.user_agent.as_deref(), DEFAULT_USER_AGENT)
    }

    pub fn http_settings(&self) -> HttpSettings {
        let defaults = HttpSettings::default();
        HttpSettings {
            user_agent: self.user_agent(),
            timeout_ms: env_parsed("RE_HTTP_TIMEOUT_MS")
                .or(self.wiki.timeout_ms)
                .unwrap_or(defaults.timeout_ms),
            max_retries: env_parsed("RE_HTTP_RETRIES")
                .or(self.wiki.retries)
                .unwrap_or(defaults.max_retries),
            retry_delay_ms: env_parsed("RE_HTTP_RETRY_DELAY_MS")
                .or(self.wiki.retry_delay_ms)
                .unwrap_or(defaults.retry_delay_ms),
            ..defaults
        }
    }

    /// Bot login from RE_BOT_USER / RE_BOT_PASS; `None` unless both are set.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = env_nonempty("RE_BOT_USER")?;
        let password = env_nonempty("RE_BOT_PASS")?;
        Some(Credentials { username, password })
    }

    pub fn ledger_path(&self, root: &Path) -> PathBuf {
        root.join(
            self.scanner
                .ledger_path
                .as_deref()
                .unwrap_or(DEFAULT_LEDGER_PATH),
        )
    }

    pub fn error_category(&self) -> &str {
        self.scanner
            .error_category
            .as_deref()
            .unwrap_or(DEFAULT_ERROR_CATEGORY)
    }

    pub fn search_templates(&self) -> Vec<String> {
        if self.petscan.templates.is_empty() {
            vec![DEFAULT_SEARCH_TEMPLATE.to_string()]
        } else {
            self.petscan.templates.clone()
        }
    }

    /// Table files: explicit paths win over the files in `dir`.
    pub fn table_paths(&self, root: &Path) -> TablePaths {
        let dir = root.join(self.tables.dir.as_deref().unwrap_or(DEFAULT_TABLES_DIR));
        let defaults = TablePaths::in_dir(&dir);
        let pick = |explicit: &Option<String>, default: PathBuf| {
            explicit
                .as_deref()
                .map(|path| root.join(path))
                .unwrap_or(default)
        };
        TablePaths {
            volumes: pick(&self.tables.volumes, defaults.volumes),
            authors: pick(&self.tables.authors, defaults.authors),
            lemma_items: pick(&self.tables.lemma_items, defaults.lemma_items),
        }
    }
}

/// Load and parse the config file. Returns defaults if it doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ScannerConfig> {
    if !config_path.exists() {
        return Ok(ScannerConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ScannerConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_nonempty(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_or(key: &str, configured: Option<&str>, default: &str) -> String {
    env_nonempty(key)
        .or_else(|| configured.map(ToString::to_string))
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|value| value.parse::<T>().ok())
}
