//! Configuration loading for paperdrop.
//! Reads paperdrop.toml from the path given on the command line (or PAPERDROP_CONFIG).
//! Secrets left empty in the file are taken from NOTION_API_KEY, NOTION_DB_ID and OPENAI_API_KEY.
//! Tokens are held as `SecretString` from the moment they are parsed, so `Debug` output redacts them.

use anyhow::Context;
use chrono::NaiveTime;
use paperdrop_common::{PaperdropError, Result};
use paperdrop_ingestion::pipeline::build_query;
use paperdrop_ingestion::search::PaginationLimits;
use paperdrop_ingestion::store::notion::NotionProperties;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Raw arXiv query. When empty the query is built from `terms`.
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_terms")]
    pub terms: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: usize,
    /// "relevance" | "lastUpdatedDate" | "submittedDate"
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_terms() -> Vec<String> {
    [
        "artificial intelligence",
        "deep learning",
        "quantum mechanics",
        "generative AI",
        "generative models",
        "prompt",
        "large language models",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}
fn default_max_results()     -> usize { 10 }
fn default_max_pages()       -> usize { 10 }
fn default_max_empty_pages() -> usize { 3 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            terms: default_terms(),
            max_results: default_max_results(),
            max_pages: default_max_pages(),
            max_empty_pages: default_max_empty_pages(),
            sort_by: None,
            endpoint: None,
        }
    }
}

impl SearchConfig {
    pub fn effective_query(&self) -> String {
        if self.query.trim().is_empty() {
            build_query(&self.terms)
        } else {
            self.query.trim().to_string()
        }
    }

    pub fn limits(&self) -> PaginationLimits {
        PaginationLimits {
            max_pages: self.max_pages,
            max_empty_pages: self.max_empty_pages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Notion integration token; falls back to NOTION_API_KEY.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    /// Notion database id; falls back to NOTION_DB_ID.
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_title_property")]
    pub title_property: String,
    #[serde(default = "default_url_property")]
    pub url_property: String,
    #[serde(default = "default_date_property")]
    pub date_property: String,
}

fn default_title_property() -> String { "名前".to_string() }
fn default_url_property()   -> String { "URL".to_string() }
fn default_date_property()  -> String { "公開日".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            database_id: String::new(),
            title_property: default_title_property(),
            url_property: default_url_property(),
            date_property: default_date_property(),
        }
    }
}

impl StoreConfig {
    pub fn properties(&self) -> NotionProperties {
        NotionProperties {
            title: self.title_property.clone(),
            url: self.url_property.clone(),
            date: self.date_property.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "openai_compatible"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Required for the openai_compatible backend.
    #[serde(default)]
    pub base_url: String,
    /// Falls back to OPENAI_API_KEY.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_prompt_path")]
    pub prompt_path: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_backend()         -> String { "openai".to_string() }
fn default_model()           -> String { "gpt-4-1106-preview".to_string() }
fn default_prompt_path()     -> String { "prompt.txt".to_string() }
fn default_max_input_chars() -> usize  { 100_000 }

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_backend(),
            model: default_model(),
            base_url: String::new(),
            api_key: None,
            prompt_path: default_prompt_path(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Blank values count as unset so the environment fallback still applies.
fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(secret_from(raw))
}

fn secret_from(raw: Option<String>) -> Option<SecretString> {
    raw.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Hosts allowed in addition to arXiv, Notion and OpenAI.
    #[serde(default)]
    pub extra_allowed_hosts: Vec<String>,
}

fn default_timeout_secs() -> u64 { 60 }

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            extra_allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily run, "HH:MM".
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
}

fn default_daily_at()  -> String { "06:00".to_string() }
fn default_lock_path() -> String { "paperdrop.lock".to_string() }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            lock_path: default_lock_path(),
        }
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|e| {
            PaperdropError::Config(format!("schedule.daily_at must be HH:MM, got {:?}: {}", self.daily_at, e))
        })
    }
}


impl Config {
    /// Load configuration from `path`, then fill empty secrets from the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy paperdrop.example.toml to paperdrop.toml and edit it.",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Fill secrets left empty in the file from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.store.api_key.is_none() {
            self.store.api_key = secret_from(lookup("NOTION_API_KEY"));
        }
        if self.store.database_id.trim().is_empty() {
            if let Some(v) = lookup("NOTION_DB_ID") {
                self.store.database_id = v;
            }
        }
        if self.summarizer.api_key.is_none() {
            self.summarizer.api_key = secret_from(lookup("OPENAI_API_KEY"));
        }
    }

    /// Reject configurations that cannot run. Every failure is a `Config` error.
    pub fn validate(&self) -> Result<()> {
        if self.search.effective_query().is_empty() {
            return Err(PaperdropError::Config("search.query and search.terms are both empty".into()));
        }
        if self.search.max_results == 0 {
            return Err(PaperdropError::Config("search.max_results must be at least 1".into()));
        }
        if self.search.max_pages == 0 || self.search.max_empty_pages == 0 {
            return Err(PaperdropError::Config("search.max_pages and search.max_empty_pages must be at least 1".into()));
        }
        if self.store.api_key.is_none() {
            return Err(PaperdropError::Config("Notion token missing (set store.api_key or NOTION_API_KEY)".into()));
        }
        if self.store.database_id.trim().is_empty() {
            return Err(PaperdropError::Config("Notion database id missing (set store.database_id or NOTION_DB_ID)".into()));
        }
        if self.http.timeout_secs == 0 {
            return Err(PaperdropError::Config("http.timeout_secs must be at least 1".into()));
        }
        self.schedule.daily_time()?;

        if self.summarizer.enabled {
            match self.summarizer.backend.as_str() {
                "openai" => {
                    if self.summarizer.api_key.is_none() {
                        return Err(PaperdropError::Config(
                            "Summarization enabled but no OpenAI key (set summarizer.api_key or OPENAI_API_KEY)".into(),
                        ));
                    }
                }
                "openai_compatible" => {
                    if self.summarizer.base_url.trim().is_empty() {
                        return Err(PaperdropError::Config(
                            "summarizer.base_url is required for the openai_compatible backend".into(),
                        ));
                    }
                }
                other => {
                    return Err(PaperdropError::Config(format!("Unknown summarizer backend: {}", other)));
                }
            }
            if self.summarizer.max_input_chars == 0 {
                return Err(PaperdropError::Config("summarizer.max_input_chars must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// System prompt for the summarizer, read from `summarizer.prompt_path`.
    /// Relative paths resolve against `base_dir`. Empty when summarization is off.
    pub fn system_prompt(&self, base_dir: &Path) -> Result<String> {
        if !self.summarizer.enabled {
            return Ok(String::new());
        }
        let path = base_dir.join(&self.summarizer.prompt_path);
        let prompt = std::fs::read_to_string(&path).map_err(|e| {
            PaperdropError::Config(format!("Cannot read prompt file {}: {}", path.display(), e))
        })?;
        if prompt.trim().is_empty() {
            return Err(PaperdropError::Config(format!("Prompt file {} is empty", path.display())));
        }
        Ok(prompt)
    }

    pub fn notion_api_key(&self) -> Result<SecretString> {
        self.store
            .api_key
            .as_ref()
            .map(copy_secret)
            .ok_or_else(|| PaperdropError::Config("Notion token missing (set store.api_key or NOTION_API_KEY)".into()))
    }

    /// `None` when no key is configured (allowed for openai_compatible servers).
    pub fn llm_api_key(&self) -> Option<SecretString> {
        self.summarizer.api_key.as_ref().map(copy_secret)
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}
