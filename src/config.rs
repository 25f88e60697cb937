//! Application configuration.
//!
//! Loaded from `<config_dir>/docbatch/config.toml` when present, then
//! overridden by `DOCBATCH_SERVER_URL` and `DOCBATCH_TOKEN`. Every field has
//! a default, so an absent file is not an error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::IngestError;
use crate::notify::DismissPolicy;
use crate::upload::{Backoff, RetryPolicy, UploadLimits};

pub const SERVER_URL_ENV: &str = "DOCBATCH_SERVER_URL";
pub const TOKEN_ENV: &str = "DOCBATCH_TOKEN";

const DEFAULT_SERVER_URL: &str = "http://localhost:8000/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    pub api_token: Option<String>,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub notifications: NotificationConfig,
    /// Glob patterns skipped during folder walks.
    pub exclude: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_token: None,
            limits: LimitsConfig::default(),
            retry: RetryConfig::default(),
            notifications: NotificationConfig::default(),
            exclude: vec![".DS_Store".to_string(), "*.tmp".to_string(), "~$*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub max_total_size_mb: u64,
    pub max_files: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = UploadLimits::default();
        Self {
            allowed_extensions: limits.allowed_extensions,
            max_file_size_mb: limits.max_file_size / MB,
            max_total_size_mb: limits.max_total_size / MB,
            max_files: limits.max_files,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff: BackoffKind,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff: BackoffKind::Exponential,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub auto_dismiss_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { auto_dismiss_ms: 5000 }
    }
}

const MB: u64 = 1024 * 1024;
const MAX_RETRY_ATTEMPTS: u32 = 10;

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("docbatch").join("config.toml"))
    }

    /// Default path plus process environment.
    pub fn load() -> Result<Self, IngestError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => {
                debug!("[CONFIG] no config file, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&raw)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))?;
        info!("[CONFIG] loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(SERVER_URL_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("[CONFIG] server url from {}", SERVER_URL_ENV);
            self.server_url = url;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("[CONFIG] api token from {}", TOKEN_ENV);
            self.api_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.server_url()?;
        if self.limits.allowed_extensions.is_empty() {
            return Err(IngestError::Config("allowed_extensions must not be empty".to_string()));
        }
        if self.limits.max_file_size_mb == 0 || self.limits.max_total_size_mb == 0 {
            return Err(IngestError::Config("size limits must be greater than zero".to_string()));
        }
        if self.limits.max_files == 0 {
            return Err(IngestError::Config("max_files must be greater than zero".to_string()));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(IngestError::Config(format!(
                "retry.max_attempts must be between 1 and {}",
                MAX_RETRY_ATTEMPTS
            )));
        }
        let factor = self.retry.backoff_factor;
        if self.retry.backoff == BackoffKind::Exponential && !(factor.is_finite() && factor >= 1.0) {
            return Err(IngestError::Config(
                "retry.backoff_factor must be a finite number of at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL with a trailing slash, so relative endpoint joins keep the path.
    pub fn server_url(&self) -> Result<Url, IngestError> {
        let mut raw = self.server_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| IngestError::Config(format!("Invalid server_url '{}': {}", self.server_url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(IngestError::Config(format!("Unsupported server_url scheme '{}'", other))),
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            allowed_extensions: self
                .limits
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_size: self.limits.max_file_size_mb.saturating_mul(MB),
            max_total_size: self.limits.max_total_size_mb.saturating_mul(MB),
            max_files: self.limits.max_files,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.retry.backoff {
            BackoffKind::Exponential => Backoff::Exponential {
                factor: self.retry.backoff_factor,
            },
            BackoffKind::Linear => Backoff::Linear,
        };
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn dismiss_policy(&self) -> DismissPolicy {
        DismissPolicy {
            auto_dismiss: Duration::from_millis(self.notifications.auto_dismiss_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        let limits = config.upload_limits();
        assert_eq!(limits.max_file_size, 50 * MB);
        assert_eq!(limits.max_total_size, 100 * MB);
        assert_eq!(limits.max_files, 20);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.dismiss_policy(), DismissPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            server_url = "https://ingest.example.com/base"
            exclude = ["*.bak"]

            [limits]
            allowed_extensions = [".PDF", "txt"]
            max_files = 5

            [retry]
            max_attempts = 4
            backoff = "linear"
            initial_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server_url().unwrap().as_str(), "https://ingest.example.com/base/");
        assert_eq!(config.exclude, vec!["*.bak"]);

        let limits = config.upload_limits();
        assert_eq!(limits.allowed_extensions, vec!["pdf", "txt"]);
        assert_eq!(limits.max_files, 5);
        assert_eq!(limits.max_file_size, 50 * MB);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Backoff::Linear);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = AppConfig::from_toml("api_token = \"from-file\"").unwrap();
        let env: HashMap<&str, &str> = [(SERVER_URL_ENV, "https://env.example.com"), (TOKEN_ENV, "from-env")].into();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_token.as_deref(), Some("from-env"));
        assert_eq!(config.server_url().unwrap().as_str(), "https://env.example.com/");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert!(config.api_token.is_none());
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = AppConfig::default();
        config.server_url = "ftp://files.example.com".to_string();
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));

        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));

        assert!(AppConfig::from_toml("[retry]\nbackoff = \"random\"").is_err());
    }

    #[test]
    fn runaway_retry_settings_are_rejected() {
        let nan = AppConfig::from_toml("[retry]\nbackoff_factor = nan").unwrap();
        assert!(matches!(nan.validate(), Err(IngestError::Config(_))));

        let inf = AppConfig::from_toml("[retry]\nbackoff_factor = inf").unwrap();
        assert!(matches!(inf.validate(), Err(IngestError::Config(_))));

        let many = AppConfig::from_toml("[retry]\nmax_attempts = 100").unwrap();
        assert!(matches!(many.validate(), Err(IngestError::Config(_))));

        let steep = AppConfig::from_toml("[retry]\nmax_attempts = 5\nbackoff_factor = 1e10").unwrap();
        assert!(steep.validate().is_ok());
        assert_eq!(steep.retry_policy().delay_before(5), Duration::from_secs(30));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[notifications]\nauto_dismiss_ms = 1500\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.dismiss_policy().auto_dismiss, Duration::from_millis(1500));

        let missing = AppConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, IngestError::Config(_)));
    }
}
