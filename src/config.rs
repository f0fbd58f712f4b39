//! Configuration types.
//!
//! Rules and tuning live in a TOML file; credentials and connection
//! details come from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default location of the rules file.
pub const DEFAULT_CONFIG_PATH: &str = "./inbox-sift.toml";

/// Caller-defined classification rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    /// Allowed category labels, used verbatim as folder names.
    pub categories: Vec<String>,
    /// What makes a message worth keeping.
    pub keep: String,
    /// What makes a message a reject.
    pub reject: String,
    /// Display name of the person the mailbox belongs to.
    #[serde(default = "default_requester")]
    pub requester: String,
}

impl RuleSet {
    pub fn allows_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

fn default_requester() -> String {
    "the mailbox owner".to_string()
}

/// Scan and action behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Body characters sent to the oracle; the rest is cut off.
    pub max_body_chars: usize,
    /// Hard cap on messages examined per scan.
    pub max_items_per_scan: usize,
    /// Classification sequences in flight at once.
    pub concurrency: usize,
    /// Flag kept messages.
    pub star_kept: bool,
    /// Mark rejected messages as seen before moving them.
    pub mark_rejected_read: bool,
    /// Move rejects into a folder named after their category.
    pub sort_into_category_folders: bool,
    /// Folder for rejects when not sorting by category.
    pub rejected_folder: String,
    /// Where the scan checkpoint is persisted.
    pub checkpoint_path: PathBuf,
    /// Seconds between scans; 0 runs a single scan.
    pub poll_interval_secs: u64,
    /// Verdict cache time-to-live.
    pub cache_ttl_secs: u64,
    /// Whether unknown verdicts are cached too.
    pub cache_unknown: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_body_chars: 2000,
            max_items_per_scan: 50,
            concurrency: 5,
            star_kept: false,
            mark_rejected_read: false,
            sort_into_category_folders: false,
            rejected_folder: "Rejected".to_string(),
            checkpoint_path: PathBuf::from("./last_timestamp.txt"),
            poll_interval_secs: 0,
            cache_ttl_secs: 3600, // 1 hour
            cache_unknown: false,
        }
    }
}

impl ScanSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Supported oracle backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleBackendKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Local,
}

/// Oracle selection, sampling and retry parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackendKind,
    pub model: String,
    /// Chat-completions URL of a self-hosted endpoint.
    pub local_url: String,
    /// Sampling temperature; the local backend uses its own default when unset.
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub rate_limit_retries: u32,
    pub rate_limit_cooldown_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackendKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            local_url: "http://localhost:1234/v1/chat/completions".to_string(),
            temperature: None,
            max_tokens: None,
            attempt_timeout_ms: 27_500,
            max_attempts: 3,
            backoff_base_ms: 2_500,
            rate_limit_retries: 10,
            rate_limit_cooldown_secs: 61,
        }
    }
}

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

impl MailboxConfig {
    /// Build config from environment variables.
    ///
    /// `IMAP_USER` and `IMAP_PASSWORD` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string());

        let port = match std::env::var("IMAP_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "IMAP_PORT".into(),
                message: format!("not a port number: {raw}"),
            })?,
            Err(_) => 993,
        };

        let username = std::env::var("IMAP_USER")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_USER".into()))?;
        let password = std::env::var("IMAP_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_PASSWORD".into()))?;

        let mailbox = std::env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Ok(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            mailbox,
        })
    }
}

/// Contents of the rules file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub rules: RuleSet,
    #[serde(default)]
    pub settings: ScanSettings,
    #[serde(default)]
    pub oracle: OracleConfig,
}

impl AppConfig {
    /// Load and validate the rules file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rules.categories.is_empty() {
            return Err(invalid("rules.categories", "at least one category is required"));
        }
        if self.rules.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("rules.categories", "category names must not be blank"));
        }
        if self.settings.concurrency == 0 {
            return Err(invalid("settings.concurrency", "must be at least 1"));
        }
        if self.settings.max_items_per_scan == 0 {
            return Err(invalid("settings.max_items_per_scan", "must be at least 1"));
        }
        if !self.settings.sort_into_category_folders && self.settings.rejected_folder.trim().is_empty() {
            return Err(invalid(
                "settings.rejected_folder",
                "required unless sort_into_category_folders is set",
            ));
        }
        if self.oracle.max_attempts == 0 {
            return Err(invalid("oracle.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Read an API key from the environment.
pub fn api_key_from_env(var: &str) -> Result<SecretString, ConfigError> {
    std::env::var(var)
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [rules]
        categories = ["Finance", "Newsletter"]
        keep = "invoice or receipt"
        reject = "newsletter"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.rules.categories, vec!["Finance", "Newsletter"]);
        assert_eq!(config.settings.concurrency, 5);
        assert_eq!(config.settings.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.settings.rejected_folder, "Rejected");
        assert!(!config.settings.cache_unknown);
        assert_eq!(config.oracle.backend, OracleBackendKind::OpenAi);
        assert_eq!(config.oracle.attempt_timeout_ms, 27_500);
        assert_eq!(config.oracle.rate_limit_cooldown_secs, 61);
    }

    #[test]
    fn settings_and_oracle_override() {
        let raw = format!(
            "{MINIMAL}\n[settings]\nconcurrency = 2\nstar_kept = true\n\n[oracle]\nbackend = \"local\"\nmax_attempts = 5\n"
        );
        let config = AppConfig::from_toml(&raw).unwrap();
        assert_eq!(config.settings.concurrency, 2);
        assert!(config.settings.star_kept);
        assert_eq!(config.settings.max_items_per_scan, 50);
        assert_eq!(config.oracle.backend, OracleBackendKind::Local);
        assert_eq!(config.oracle.max_attempts, 5);
    }

    #[test]
    fn empty_categories_rejected() {
        let raw = "[rules]\ncategories = []\nkeep = \"a\"\nreject = \"b\"\n";
        assert!(matches!(
            AppConfig::from_toml(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let raw = format!("{MINIMAL}\n[settings]\nconcurrency = 0\n");
        assert!(AppConfig::from_toml(&raw).is_err());
    }

    #[test]
    fn blank_rejected_folder_requires_category_sorting() {
        let raw = format!("{MINIMAL}\n[settings]\nrejected_folder = \"\"\n");
        assert!(AppConfig::from_toml(&raw).is_err());

        let raw = format!(
            "{MINIMAL}\n[settings]\nrejected_folder = \"\"\nsort_into_category_folders = true\n"
        );
        assert!(AppConfig::from_toml(&raw).is_ok());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            AppConfig::from_toml("[rules"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn rule_set_category_lookup_is_exact() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert!(config.rules.allows_category("Finance"));
        assert!(!config.rules.allows_category("finance"));
    }

    #[test]
    fn example_rules_file_parses() {
        let config = AppConfig::from_toml(include_str!("../inbox-sift.example.toml")).unwrap();
        assert_eq!(config.rules.requester, "Dana");
        assert_eq!(config.rules.categories.len(), 3);
        assert!(config.settings.sort_into_category_folders);
        assert_eq!(config.oracle.backend, OracleBackendKind::OpenAi);
    }
}
