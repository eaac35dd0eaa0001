use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub articles: ArticlesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer token gating the article-generation endpoint.
    /// When unset, `POST /articles/generate` is disabled.
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Assistant replies allowed per conversation before it is closed
    /// and a successor conversation is opened.
    #[serde(default = "default_response_limit")]
    pub response_limit: i64,
    /// Reply stored and returned for queries outside the supported topic.
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            response_limit: default_response_limit(),
            rejection_message: default_rejection_message(),
        }
    }
}

fn default_response_limit() -> i64 {
    10
}

fn default_rejection_message() -> String {
    "I can only help with IT support questions — hardware, software, \
     network, or security issues. Please start a new conversation with \
     an IT-related question."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Provider search depth: `basic` or `advanced`.
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "advanced".to_string()
}
fn default_cache_capacity() -> usize {
    100
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArticlesConfig {
    /// Articles produced per scheduled batch run.
    #[serde(default = "default_daily_count")]
    pub daily_count: usize,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

impl Default for ArticlesConfig {
    fn default() -> Self {
        Self {
            daily_count: default_daily_count(),
            schedule_enabled: false,
            interval_hours: default_interval_hours(),
        }
    }
}

fn default_daily_count() -> usize {
    3
}
fn default_interval_hours() -> u64 {
    24
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chat.response_limit < 1 {
        anyhow::bail!("chat.response_limit must be >= 1");
    }

    if config.search.max_results < 1 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    match config.search.search_depth.as_str() {
        "basic" | "advanced" => {}
        other => anyhow::bail!(
            "Unknown search depth: '{}'. Must be basic or advanced.",
            other
        ),
    }

    if config.search.cache_capacity < 1 {
        anyhow::bail!("search.cache_capacity must be >= 1");
    }

    if config.articles.daily_count < 1 {
        anyhow::bail!("articles.daily_count must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("deskline.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    const MINIMAL: &str = r#"
[db]
path = "/tmp/deskline.sqlite"

[server]
bind = "127.0.0.1:7410"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let (_tmp, path) = write_config(MINIMAL);
        let config = load_config(&path).unwrap();
        assert_eq!(config.chat.response_limit, 10);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.search_depth, "advanced");
        assert_eq!(config.search.cache_capacity, 100);
        assert_eq!(config.search.cache_ttl_secs, 3600);
        assert!(config.server.admin_token.is_none());
        assert!(!config.articles.schedule_enabled);
    }

    #[test]
    fn test_rejects_zero_response_limit() {
        let (_tmp, path) = write_config(&format!("{}\n[chat]\nresponse_limit = 0\n", MINIMAL));
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("response_limit"));
    }

    #[test]
    fn test_rejects_unknown_search_depth() {
        let (_tmp, path) = write_config(&format!(
            "{}\n[search]\nsearch_depth = \"exhaustive\"\n",
            MINIMAL
        ));
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("search depth"));
    }

    #[test]
    fn test_overrides_apply() {
        let (_tmp, path) = write_config(&format!(
            "{}\n[chat]\nresponse_limit = 5\n[search]\nmax_results = 8\nexclude_domains = [\"pinterest.com\"]\n",
            MINIMAL
        ));
        let config = load_config(&path).unwrap();
        assert_eq!(config.chat.response_limit, 5);
        assert_eq!(config.search.max_results, 8);
        assert_eq!(config.search.exclude_domains, vec!["pinterest.com"]);
    }
}
