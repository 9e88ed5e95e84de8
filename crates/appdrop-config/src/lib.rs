//! Configuration file handling for appdrop.
//!
//! This crate provides configuration loading from `.appdrop.toml` files
//! with support for merging with CLI arguments and defaults.
//!
//! # Example
//!
//! ```
//! use appdrop_config::{Config, load_config};
//! use std::path::Path;
//!
//! // Load config from a directory (looks for .appdrop.toml)
//! let config = load_config(Path::new(".")).expect("load config");
//!
//! println!("Tag pattern: {}", config.tag_pattern());
//! if let Some(app) = config.app_name("debug") {
//!     println!("Uploading to app {app}");
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use appdrop_distribution::{APK_CONTENT_TYPE, DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECS};
use appdrop_git::DEFAULT_TAG_PATTERN;
use appdrop_retry::{PollSchedule, RetryPolicy, RetryStrategyConfig};
use appdrop_webhook::WebhookConfig;

/// Default configuration file name
pub const CONFIG_FILE: &str = ".appdrop.toml";

/// Default commit message key marking changelog lines
pub const DEFAULT_MESSAGE_KEY: &str = "CHANGELOG";

/// Default changelog output file
pub const DEFAULT_CHANGELOG_FILE: &str = "release-notes.txt";

/// Environment variable that overrides the API token file
pub const API_TOKEN_ENV: &str = "APPDROP_API_TOKEN";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete appdrop configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Distribution service settings
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// Build tag naming
    #[serde(default)]
    pub tags: TagsConfig,
    /// Changelog extraction
    #[serde(default)]
    pub changelog: ChangelogConfig,
    /// Upload status polling
    #[serde(default)]
    pub polling: PollSchedule,
    /// Chunk upload behavior
    #[serde(default)]
    pub upload: UploadConfig,
    /// Changelog announcement target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    /// Issue links in announcements
    #[serde(default)]
    pub issues: IssuesConfig,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.distribution.owner.as_deref()
    }

    /// Application name for `variant`.
    ///
    /// A configured app name wins; otherwise it is derived from the base
    /// file name as `<BaseFileName>-<variant>`.
    pub fn app_name(&self, variant: &str) -> Option<String> {
        if let Some(app) = &self.distribution.app {
            return Some(app.clone());
        }
        self.distribution
            .base_file_name
            .as_deref()
            .map(|base| format!("{}-{variant}", capitalize(base)))
    }

    pub fn api_base(&self) -> &str {
        self.distribution.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn content_type(&self) -> &str {
        self.distribution
            .content_type
            .as_deref()
            .unwrap_or(APK_CONTENT_TYPE)
    }

    pub fn tester_groups(&self) -> &[String] {
        &self.distribution.tester_groups
    }

    /// Get the HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        self.distribution
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Read the distribution API token.
    ///
    /// `APPDROP_API_TOKEN` takes precedence over the configured token file,
    /// which is resolved relative to `base_dir`.
    pub fn api_token(&self, base_dir: &Path) -> Result<String> {
        if let Ok(token) = std::env::var(API_TOKEN_ENV)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_string());
        }

        let Some(file) = &self.distribution.api_token_file else {
            bail!("no API token: set {API_TOKEN_ENV} or distribution.api_token_file");
        };
        let path = base_dir.join(file);
        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read API token file: {}", path.display()))?;
        let token = token.trim();
        if token.is_empty() {
            bail!("API token file is empty: {}", path.display());
        }
        Ok(token.to_string())
    }

    pub fn tag_pattern(&self) -> &str {
        self.tags.pattern.as_deref().unwrap_or(DEFAULT_TAG_PATTERN)
    }

    pub fn message_key(&self) -> &str {
        self.changelog
            .message_key
            .as_deref()
            .unwrap_or(DEFAULT_MESSAGE_KEY)
    }

    /// Changelog used when no commit carries the message key
    pub fn default_changelog(&self) -> Option<&str> {
        self.changelog.default_text.as_deref()
    }

    pub fn changelog_file(&self) -> PathBuf {
        self.changelog
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHANGELOG_FILE))
    }

    pub fn poll_schedule(&self) -> &PollSchedule {
        &self.polling
    }

    pub fn upload_concurrency(&self) -> usize {
        self.upload.concurrency.max(1)
    }

    /// Overall upload time budget, unbounded when unset
    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload.timeout
    }

    /// Retry behavior for a single chunk
    pub fn chunk_retry(&self) -> RetryStrategyConfig {
        match (self.upload.chunk_retry, &self.upload.chunk_retry_custom) {
            (RetryPolicy::Custom, Some(custom)) => custom.clone(),
            (policy, _) => policy.to_config(),
        }
    }

    /// Merge this config with another (other takes precedence)
    pub fn merge(&self, other: &Config) -> Config {
        let default_polling = PollSchedule::default();
        let default_upload = UploadConfig::default();

        Config {
            distribution: DistributionConfig {
                owner: pick(&other.distribution.owner, &self.distribution.owner),
                app: pick(&other.distribution.app, &self.distribution.app),
                base_file_name: pick(
                    &other.distribution.base_file_name,
                    &self.distribution.base_file_name,
                ),
                api_token_file: pick(
                    &other.distribution.api_token_file,
                    &self.distribution.api_token_file,
                ),
                api_base: pick(&other.distribution.api_base, &self.distribution.api_base),
                tester_groups: if other.distribution.tester_groups.is_empty() {
                    self.distribution.tester_groups.clone()
                } else {
                    other.distribution.tester_groups.clone()
                },
                content_type: pick(
                    &other.distribution.content_type,
                    &self.distribution.content_type,
                ),
                timeout: other.distribution.timeout.or(self.distribution.timeout),
            },
            tags: TagsConfig {
                pattern: pick(&other.tags.pattern, &self.tags.pattern),
            },
            changelog: ChangelogConfig {
                message_key: pick(&other.changelog.message_key, &self.changelog.message_key),
                default_text: pick(&other.changelog.default_text, &self.changelog.default_text),
                output: pick(&other.changelog.output, &self.changelog.output),
            },
            polling: PollSchedule {
                max_requests: if other.polling.max_requests != default_polling.max_requests {
                    other.polling.max_requests
                } else {
                    self.polling.max_requests
                },
                delay: if other.polling.delay != default_polling.delay {
                    other.polling.delay
                } else {
                    self.polling.delay
                },
                delay_coefficient: other
                    .polling
                    .delay_coefficient
                    .or(self.polling.delay_coefficient),
            },
            upload: UploadConfig {
                concurrency: if other.upload.concurrency != default_upload.concurrency {
                    other.upload.concurrency
                } else {
                    self.upload.concurrency
                },
                timeout: other.upload.timeout.or(self.upload.timeout),
                chunk_retry: if other.upload.chunk_retry != default_upload.chunk_retry {
                    other.upload.chunk_retry
                } else {
                    self.upload.chunk_retry
                },
                chunk_retry_custom: pick(
                    &other.upload.chunk_retry_custom,
                    &self.upload.chunk_retry_custom,
                ),
            },
            webhook: pick(&other.webhook, &self.webhook),
            issues: IssuesConfig {
                url_prefix: pick(&other.issues.url_prefix, &self.issues.url_prefix),
                number_pattern: pick(&other.issues.number_pattern, &self.issues.number_pattern),
            },
        }
    }
}

fn pick<T: Clone>(preferred: &Option<T>, fallback: &Option<T>) -> Option<T> {
    preferred.as_ref().or(fallback.as_ref()).cloned()
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Distribution service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Account or organization owning the app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Application name on the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Artifact base name, used to derive the app name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_file_name: Option<String>,
    /// File holding the API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_file: Option<PathBuf>,
    /// API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Tester groups a release is distributed to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tester_groups: Vec<String>,
    /// Declared artifact content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// HTTP request timeout
    #[serde(
        default,
        with = "appdrop_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

/// Build tag configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsConfig {
    /// Tag template with `{variant}` and `{build}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Changelog configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_text: Option<String>,
    /// Where the generated changelog is written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// Chunk upload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Number of chunks uploaded at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Overall time budget of one upload
    #[serde(
        default,
        with = "appdrop_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Retry policy for a single chunk
    #[serde(default)]
    pub chunk_retry: RetryPolicy,
    /// Retry settings used with the `custom` policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_retry_custom: Option<RetryStrategyConfig>,
}

fn default_concurrency() -> usize {
    1
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout: None,
            chunk_retry: RetryPolicy::default(),
            chunk_retry_custom: None,
        }
    }
}

/// Issue link configuration for announcements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesConfig {
    /// URL an issue key is appended to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    /// Regex matching an issue key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_pattern: Option<String>,
}

/// Load configuration from a directory
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Save configuration to a file
pub fn save_config(dir: &Path, config: &Config) -> Result<()> {
    let path = config_path(dir);

    let content = toml::to_string_pretty(config).context("failed to serialize config to TOML")?;

    std::fs::write(&path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Find configuration file by walking up the directory tree
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appdrop_retry::RetryStrategyType;
    use appdrop_webhook::WebhookType;
    use tempfile::tempdir;

    #[test]
    fn default_config() {
        let config = Config::new();
        assert!(config.owner().is_none());
        assert!(config.app_name("debug").is_none());
        assert_eq!(config.api_base(), DEFAULT_API_BASE);
        assert_eq!(config.tag_pattern(), "build-{variant}-{build}");
        assert_eq!(config.message_key(), "CHANGELOG");
        assert_eq!(config.changelog_file(), PathBuf::from("release-notes.txt"));
        assert_eq!(config.poll_schedule().max_requests, 20);
        assert_eq!(config.poll_schedule().delay, Duration::from_secs(1));
        assert_eq!(config.upload_concurrency(), 1);
        assert_eq!(config.chunk_retry().max_attempts, 1);
        assert!(config.upload_timeout().is_none());
    }

    #[test]
    fn load_missing_config_returns_default() {
        let td = tempdir().expect("tempdir");
        let config = load_config(td.path()).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_config_from_toml() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(CONFIG_FILE);

        let content = r#"
[distribution]
owner = "acme"
base_file_name = "sample"
api_token_file = "token.txt"
tester_groups = ["QA", "Managers"]
timeout = "45s"

[tags]
pattern = "v*.{build}-{variant}"

[changelog]
message_key = "RELEASE"
default_text = "Bug fixes"

[polling]
max_requests = 5
delay = "250ms"
delay_coefficient = 10

[upload]
concurrency = 4
timeout = "10m"
chunk_retry = "aggressive"

[webhook]
url = "https://hooks.example/abc"
webhook_type = "slack"
mentions = ["@qa"]

[issues]
url_prefix = "https://jira.example/browse/"
number_pattern = "APP-[0-9]+"
"#;
        std::fs::write(&path, content).expect("write");

        let config = load_config(td.path()).expect("load");

        assert_eq!(config.owner(), Some("acme"));
        assert_eq!(config.app_name("debug").as_deref(), Some("Sample-debug"));
        assert_eq!(config.tester_groups(), ["QA", "Managers"]);
        assert_eq!(config.request_timeout(), Duration::from_secs(45));
        assert_eq!(config.tag_pattern(), "v*.{build}-{variant}");
        assert_eq!(config.message_key(), "RELEASE");
        assert_eq!(config.default_changelog(), Some("Bug fixes"));
        assert_eq!(config.polling.max_requests, 5);
        assert_eq!(config.polling.delay, Duration::from_millis(250));
        assert_eq!(config.polling.delay_coefficient, Some(10));
        assert_eq!(config.upload_concurrency(), 4);
        assert_eq!(config.upload_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.chunk_retry().max_attempts, 6);

        let webhook = config.webhook.expect("webhook");
        assert_eq!(webhook.webhook_type, WebhookType::Slack);
        assert_eq!(webhook.mentions, vec!["@qa".to_string()]);
        assert_eq!(config.issues.number_pattern.as_deref(), Some("APP-[0-9]+"));
    }

    #[test]
    fn custom_chunk_retry() {
        let content = r#"
[upload]
chunk_retry = "custom"

[upload.chunk_retry_custom]
strategy = "constant"
max_attempts = 4
base_delay = "100ms"
"#;
        let config: Config = toml::from_str(content).expect("parse");
        let retry = config.chunk_retry();
        assert_eq!(retry.strategy, RetryStrategyType::Constant);
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn explicit_app_name_wins() {
        let mut config = Config::new();
        config.distribution.app = Some("Custom".to_string());
        config.distribution.base_file_name = Some("sample".to_string());
        assert_eq!(config.app_name("debug").as_deref(), Some("Custom"));
    }

    #[test]
    fn save_and_load_config() {
        let td = tempdir().expect("tempdir");

        let mut config = Config::new();
        config.distribution.owner = Some("acme".to_string());
        config.polling.max_requests = 7;
        config.upload.timeout = Some(Duration::from_secs(90));

        save_config(td.path(), &config).expect("save");

        let loaded = load_config(td.path()).expect("load");
        assert_eq!(loaded.owner(), Some("acme"));
        assert_eq!(loaded.polling.max_requests, 7);
        assert_eq!(loaded.upload_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn merge_configs() {
        let mut base = Config::new();
        base.distribution.owner = Some("base-owner".to_string());
        base.distribution.tester_groups = vec!["QA".to_string()];
        base.polling.max_requests = 30;
        base.upload.concurrency = 3;

        let mut override_config = Config::new();
        override_config.distribution.owner = Some("cli-owner".to_string());
        override_config.polling.delay = Duration::from_secs(3);

        let merged = base.merge(&override_config);

        assert_eq!(merged.owner(), Some("cli-owner"));
        assert_eq!(merged.tester_groups(), ["QA"]);
        assert_eq!(merged.polling.max_requests, 30);
        assert_eq!(merged.polling.delay, Duration::from_secs(3));
        assert_eq!(merged.upload_concurrency(), 3);
    }

    #[test]
    fn api_token_from_file_is_trimmed() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join("token.txt"), "  abc123\n").expect("write");

        let mut config = Config::new();
        config.distribution.api_token_file = Some(PathBuf::from("token.txt"));

        temp_env::with_var_unset(API_TOKEN_ENV, || {
            assert_eq!(config.api_token(td.path()).expect("token"), "abc123");
        });
    }

    #[test]
    fn api_token_env_takes_precedence() {
        let td = tempdir().expect("tempdir");
        let config = Config::new();

        temp_env::with_var(API_TOKEN_ENV, Some("from-env"), || {
            assert_eq!(config.api_token(td.path()).expect("token"), "from-env");
        });
    }

    #[test]
    fn missing_token_is_an_error() {
        let td = tempdir().expect("tempdir");
        let mut config = Config::new();

        temp_env::with_var_unset(API_TOKEN_ENV, || {
            let err = config.api_token(td.path()).expect_err("no token");
            assert!(err.to_string().contains(API_TOKEN_ENV));

            config.distribution.api_token_file = Some(PathBuf::from("missing.txt"));
            let err = config.api_token(td.path()).expect_err("no file");
            assert!(err.to_string().contains("failed to read API token file"));
        });
    }

    #[test]
    fn find_config_walks_up() {
        let td = tempdir().expect("tempdir");

        let nested = td.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let config_path = td.path().join(CONFIG_FILE);
        std::fs::write(&config_path, "[distribution]\nowner = 'acme'").expect("write");

        assert_eq!(find_config(&nested), Some(config_path));
    }

    #[test]
    fn find_config_returns_none_if_not_found() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");

        assert!(find_config(&nested).is_none());
    }

    #[test]
    fn config_path_helper() {
        let dir = PathBuf::from("/project");
        assert_eq!(config_path(&dir), PathBuf::from("/project/.appdrop.toml"));
    }

    #[test]
    fn invalid_duration_is_reported() {
        let td = tempdir().expect("tempdir");
        std::fs::write(
            td.path().join(CONFIG_FILE),
            "[polling]\ndelay = \"soon\"\n",
        )
        .expect("write");
        let err = load_config(td.path()).expect_err("bad duration");
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }
}
