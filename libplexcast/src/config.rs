//! Configuration management for Plexcast
//!
//! Configuration lives in a TOML file, by default
//! `~/.config/plexcast/config.toml`. Every field has a default, so an empty
//! or missing file is a valid configuration.
//!
//! ```toml
//! [database]
//! path = "~/.local/share/plexcast/plexcast.db"
//!
//! [scheduler]
//! poll_interval = "30s"
//! concurrency = 8
//! dispatch_timeout = "30s"
//! aggregate_policy = "best_effort"
//!
//! [retry]
//! base_delay = "30s"
//! max_delay = "1h"
//!
//! [approval]
//! approvers = ["carol"]
//!
//! [platforms.mastodon]
//! max_retries = 5
//! publish_command = "~/bin/post-mastodon"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::platforms::PlatformId;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::scheduler::SchedulerSettings;
use crate::types::AggregatePolicy;

pub const CONFIG_ENV: &str = "PLEXCAST_CONFIG";
pub const DB_PATH_ENV: &str = "PLEXCAST_DB_PATH";

/// Durations written the humantime way: "30s", "10m", "1h 30m"
mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub platforms: BTreeMap<PlatformId, PlatformConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/plexcast/plexcast.db".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between two ticks of the daemon
    #[serde(default = "default_poll_interval", with = "human_duration")]
    pub poll_interval: Duration,
    /// Upper bound on publisher calls in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_dispatch_timeout", with = "human_duration")]
    pub dispatch_timeout: Duration,
    /// Maximum items claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Processing items older than this are treated as interrupted
    #[serde(default = "default_stale_after", with = "human_duration")]
    pub stale_after: Duration,
    #[serde(default)]
    pub aggregate_policy: AggregatePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            concurrency: default_concurrency(),
            dispatch_timeout: default_dispatch_timeout(),
            batch_size: default_batch_size(),
            stale_after: default_stale_after(),
            aggregate_policy: AggregatePolicy::default(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrency() -> usize {
    8
}

fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> usize {
    100
}

fn default_stale_after() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay", with = "human_duration")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "human_duration")]
    pub max_delay: Duration,
    /// Applies to every platform without its own `max_retries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: None,
        }
    }
}

fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Users allowed to approve or reject drafts
    #[serde(default)]
    pub approvers: Vec<String>,
}

impl ApprovalConfig {
    pub fn is_approver(&self, user_id: &str) -> bool {
        self.approvers.iter().any(|a| a == user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Executable used by the command publisher for this platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_command: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            return Err(invalid("scheduler.concurrency", "must be at least 1"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(invalid("scheduler.batch_size", "must be at least 1"));
        }
        if self.scheduler.poll_interval.is_zero() {
            return Err(invalid("scheduler.poll_interval", "must be greater than zero"));
        }
        if self.scheduler.dispatch_timeout.is_zero() {
            return Err(invalid(
                "scheduler.dispatch_timeout",
                "must be greater than zero",
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "retry.base_delay",
                "must not be larger than retry.max_delay",
            ));
        }
        Ok(())
    }

    /// Database path with `PLEXCAST_DB_PATH` taking precedence
    pub fn database_path(&self) -> Result<PathBuf> {
        resolve_db_path(Some(&self.database.path))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new(self.retry.base_delay, self.retry.max_delay);
        policy.max_retries = self.retry.max_retries;
        for (platform, platform_config) in &self.platforms {
            if let Some(max_retries) = platform_config.max_retries {
                policy = policy.with_platform_max_retries(*platform, max_retries);
            }
        }
        policy
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            concurrency: self.scheduler.concurrency,
            dispatch_timeout: self.scheduler.dispatch_timeout,
            batch_size: self.scheduler.batch_size,
            stale_after: self.scheduler.stale_after,
            aggregate_policy: self.scheduler.aggregate_policy,
            retry: self.retry_policy(),
        }
    }

    /// Platforms with a configured publish command
    pub fn publish_commands(&self) -> impl Iterator<Item = (PlatformId, &str)> {
        self.platforms.iter().filter_map(|(platform, config)| {
            config
                .publish_command
                .as_deref()
                .map(|command| (*platform, command))
        })
    }
}

fn invalid(field: &str, message: &str) -> crate::error::PlexcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("plexcast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("plexcast"))
}

/// Resolve the database path
///
/// Precedence: `PLEXCAST_DB_PATH`, then the configured path, then the data
/// directory default.
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    match configured {
        Some(path) if !path.trim().is_empty() => {
            Ok(PathBuf::from(shellexpand::tilde(path).to_string()))
        }
        _ => Ok(resolve_data_path()?.join("plexcast.db")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlexcastError;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default_config());
        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.scheduler.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.scheduler.stale_after, Duration::from_secs(600));
        assert_eq!(config.scheduler.aggregate_policy, AggregatePolicy::BestEffort);
        assert_eq!(config.retry.base_delay, Duration::from_secs(30));
        assert_eq!(config.retry.max_delay, Duration::from_secs(3600));
    }

    #[test]
    fn test_full_config_parses() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/var/lib/plexcast/test.db"

[scheduler]
poll_interval = "5s"
concurrency = 2
dispatch_timeout = "1m"
batch_size = 10
stale_after = "15m"
aggregate_policy = "all_or_nothing"

[retry]
base_delay = "10s"
max_delay = "5m"
max_retries = 4

[approval]
approvers = ["carol", "dave"]

[platforms.mastodon]
max_retries = 6
publish_command = "/usr/local/bin/post-mastodon --quiet"

[platforms.bluesky]
publish_command = "/usr/local/bin/post-bsky"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "/var/lib/plexcast/test.db");
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(config.scheduler.dispatch_timeout, Duration::from_secs(60));
        assert_eq!(config.scheduler.aggregate_policy, AggregatePolicy::AllOrNothing);
        assert!(config.approval.is_approver("dave"));
        assert!(!config.approval.is_approver("alice"));

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries_for(PlatformId::Mastodon), 6);
        assert_eq!(policy.max_retries_for(PlatformId::Twitter), 4);
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));

        let commands: Vec<_> = config.publish_commands().collect();
        assert_eq!(
            commands,
            vec![
                (PlatformId::Mastodon, "/usr/local/bin/post-mastodon --quiet"),
                (PlatformId::Bluesky, "/usr/local/bin/post-bsky"),
            ]
        );

        let settings = config.scheduler_settings();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.batch_size, 10);
    }

    #[test]
    fn test_invalid_duration_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[scheduler]\npoll_interval = \"soon\"\n");

        match Config::load_from_path(&path) {
            Err(PlexcastError::Config(ConfigError::ParseError(_))) => {}
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_platform_key_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[platforms.myspace]\nmax_retries = 1\n");
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[scheduler]\nconcurrency = 0\n");

        match Config::load_from_path(&path) {
            Err(PlexcastError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "scheduler.concurrency");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_inverted_backoff_bounds() {
        let mut config = Config::default_config();
        config.retry.base_delay = Duration::from_secs(7200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(
            result,
            Err(PlexcastError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut config = Config::default_config();
        config.approval.approvers = vec!["carol".to_string()];
        config.retry.max_retries = Some(2);
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    #[serial]
    fn test_config_env_override() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[approval]\napprovers = [\"erin\"]\n");

        std::env::set_var(CONFIG_ENV, &path);
        let resolved = resolve_config_path().unwrap();
        let config = Config::load();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(resolved, path);
        assert!(config.unwrap().approval.is_approver("erin"));
    }

    #[test]
    #[serial]
    fn test_missing_default_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(CONFIG_ENV, dir.path().join("nope.toml"));
        let config = Config::load();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(config.unwrap(), Config::default_config());
    }

    #[test]
    #[serial]
    fn test_db_path_env_takes_precedence() {
        std::env::set_var(DB_PATH_ENV, "/tmp/override.db");
        let resolved = resolve_db_path(Some("/etc/plexcast.db"));
        std::env::remove_var(DB_PATH_ENV);
        assert_eq!(resolved.unwrap(), PathBuf::from("/tmp/override.db"));

        assert_eq!(
            resolve_db_path(Some("/etc/plexcast.db")).unwrap(),
            PathBuf::from("/etc/plexcast.db")
        );
        assert!(resolve_db_path(None)
            .unwrap()
            .ends_with("plexcast/plexcast.db"));
    }
}
