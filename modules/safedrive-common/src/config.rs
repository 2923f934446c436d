use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::SafeDriveError;

/// Process configuration loaded from environment variables.
/// Secrets (database URL) stay in the environment; crawl tuning lives in [`FileConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub config_path: PathBuf,
    pub progress_file: PathBuf,
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, SafeDriveError> {
        dotenvy::dotenv().ok();

        let api_port = match env::var("API_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|_| SafeDriveError::Config(format!("API_PORT must be a number, got {port}")))?,
            Err(_) => 3000,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            config_path: env::var("SAFEDRIVE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("safedrive.toml")),
            progress_file: env::var("PROGRESS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("progress.json")),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, SafeDriveError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| SafeDriveError::Config("DATABASE_URL environment variable is required".into()))
    }

    /// Log the loaded configuration without the database credentials.
    pub fn log_redacted(&self) {
        info!(
            database = if self.database_url.is_some() { "set" } else { "unset" },
            config = %self.config_path.display(),
            progress_file = %self.progress_file.display(),
            api = %format!("{}:{}", self.api_host, self.api_port),
            "Configuration loaded"
        );
    }
}

/// TOML-backed crawl configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    /// Sources in crawl priority order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Near-duplicate detection parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub similarity_threshold: f64,
    pub window_days: i64,
    pub pool_size: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            window_days: 30,
            pool_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Consecutive empty pages after which a source is abandoned.
    pub max_empty_pages: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_empty_pages: 30,
            request_timeout_secs: 15,
            user_agent: "Mozilla/5.0 (compatible; safedrive-scout/0.1)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// RSS/Atom feed.
    Feed,
    /// HTML index page listing article links.
    Listing,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// URL template; `{page}` is replaced with the page number.
    pub url: String,
    pub max_pages: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Only keep links containing this substring (case-insensitive).
    #[serde(default)]
    pub link_filter: Option<String>,
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
}

fn default_delay_secs() -> u64 {
    2
}

fn default_min_title_len() -> usize {
    15
}

impl FileConfig {
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn validate(&self) -> Result<(), SafeDriveError> {
        let threshold = self.dedup.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SafeDriveError::Validation(format!(
                "dedup.similarity_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.dedup.window_days <= 0 || self.dedup.pool_size <= 0 {
            return Err(SafeDriveError::Validation(
                "dedup.window_days and dedup.pool_size must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(SafeDriveError::Validation("source name must not be empty".into()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(SafeDriveError::Validation(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if !source.url.starts_with("http://") && !source.url.starts_with("https://") {
                return Err(SafeDriveError::Validation(format!(
                    "source {} has a non-http url: {}",
                    source.name, source.url
                )));
            }
        }
        Ok(())
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig, SafeDriveError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SafeDriveError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&content)
        .map_err(|e| SafeDriveError::Config(format!("{}: {e}", path.display())))
}

fn parse_config(content: &str) -> Result<FileConfig, SafeDriveError> {
    let config: FileConfig = toml::from_str(content)
        .map_err(|e| SafeDriveError::Config(format!("Failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}
