//! Configuration management for guia-sync
//!
//! This module handles loading and validating configuration from environment
//! variables (`GUIA_SYNC_*`) and TOML files. The core only consumes these
//! values; the binary owns loading them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Clearinghouse endpoints and credentials
    pub remote: RemoteConfig,

    /// Token lifecycle
    pub token: TokenConfig,

    /// Batch transmission scheduler
    pub transmission: TransmissionConfig,

    /// Field-change monitor
    pub field_monitor: FieldMonitorConfig,

    /// Pull reconciliation monitor
    pub pull_monitor: PullMonitorConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Hospital block sent with every guide
    pub hospital: HospitalConfig,

    /// Attachment files
    pub attachments: AttachmentConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Clearinghouse endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub auth_url: String,
    pub send_url: String,
    pub export_url: String,

    /// Transmission credentials
    pub username: String,
    pub password: String,
    pub api_key: String,

    /// Export credentials (separate token scope)
    pub export_username: String,
    pub export_password: String,
    /// Falls back to `api_key` when unset
    pub export_api_key: Option<String>,

    /// `origin` field of the authentication body
    pub origin: String,

    /// Outbound request timeout in seconds
    pub http_timeout_secs: u64,
}

/// Token lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Age after which a cached token is refreshed preventively
    pub refresh_interval_secs: u64,
}

/// Batch transmission scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Pause between batches within one cycle
    pub batch_pause_ms: u64,
    /// Also pick up `Error` guides whose message classifies as retryable
    pub include_retryable_errors: bool,
    /// `Processing` guides older than this are recovered on start
    pub stale_processing_secs: u64,
}

/// Field-change monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Attempt ceiling after which observation is finalized
    pub max_attempts: u32,
    /// Local changes older than this are not resent
    pub freshness_window_secs: u64,
}

/// Pull reconciliation monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullMonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Minimum spacing between two reconciliation passes
    pub min_spacing_secs: u64,
    /// Delay before retrying a skipped cycle
    pub conflict_retry_secs: u64,
    /// Trailing window of transmitted guides to reconcile
    pub window_hours: u64,
    pub max_page_size: usize,
    /// Cap on pages followed for one paged export response
    pub max_pages: u32,
    pub page_pause_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Hospital identification, always taken from configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HospitalConfig {
    pub contracted_code: String,
    pub name: String,
    pub cnes: String,
    pub size: String,
    pub complexity: String,
    pub administrative_sphere: String,
    pub address: String,
}

/// Attachment configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Base directory for relative attachment paths
    pub base_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let remote = &mut config.remote;
        if let Some(v) = env_string("GUIA_SYNC_AUTH_URL") {
            remote.auth_url = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_SEND_URL") {
            remote.send_url = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_EXPORT_URL") {
            remote.export_url = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_USERNAME") {
            remote.username = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_PASSWORD") {
            remote.password = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_API_KEY") {
            remote.api_key = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_EXPORT_USERNAME") {
            remote.export_username = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_EXPORT_PASSWORD") {
            remote.export_password = v;
        }
        remote.export_api_key = env_string("GUIA_SYNC_EXPORT_API_KEY");
        if let Some(v) = env_string("GUIA_SYNC_ORIGIN") {
            remote.origin = v;
        }
        remote.http_timeout_secs =
            env_parse("GUIA_SYNC_HTTP_TIMEOUT").unwrap_or(remote.http_timeout_secs);

        config.token.refresh_interval_secs = env_parse("GUIA_SYNC_TOKEN_REFRESH_SECS")
            .unwrap_or(config.token.refresh_interval_secs);

        let tx = &mut config.transmission;
        tx.enabled = env_parse("GUIA_SYNC_TRANSMISSION_ENABLED").unwrap_or(tx.enabled);
        tx.batch_size = env_parse("GUIA_SYNC_BATCH_SIZE").unwrap_or(tx.batch_size);
        tx.interval_secs =
            env_parse("GUIA_SYNC_TRANSMISSION_INTERVAL_SECS").unwrap_or(tx.interval_secs);
        tx.batch_pause_ms = env_parse("GUIA_SYNC_BATCH_PAUSE_MS").unwrap_or(tx.batch_pause_ms);
        tx.include_retryable_errors = env_parse("GUIA_SYNC_INCLUDE_RETRYABLE_ERRORS")
            .unwrap_or(tx.include_retryable_errors);

        let fm = &mut config.field_monitor;
        fm.enabled = env_parse("GUIA_SYNC_FIELD_MONITOR_ENABLED").unwrap_or(fm.enabled);
        fm.interval_secs =
            env_parse("GUIA_SYNC_FIELD_MONITOR_INTERVAL_SECS").unwrap_or(fm.interval_secs);
        fm.max_attempts = env_parse("GUIA_SYNC_FIELD_MAX_ATTEMPTS").unwrap_or(fm.max_attempts);
        fm.freshness_window_secs =
            env_parse("GUIA_SYNC_FRESHNESS_WINDOW_SECS").unwrap_or(fm.freshness_window_secs);

        let pm = &mut config.pull_monitor;
        pm.enabled = env_parse("GUIA_SYNC_PULL_ENABLED").unwrap_or(pm.enabled);
        pm.interval_secs = env_parse("GUIA_SYNC_PULL_INTERVAL_SECS").unwrap_or(pm.interval_secs);
        pm.min_spacing_secs =
            env_parse("GUIA_SYNC_PULL_MIN_SPACING_SECS").unwrap_or(pm.min_spacing_secs);
        pm.max_page_size = env_parse("GUIA_SYNC_PULL_MAX_PAGE_SIZE").unwrap_or(pm.max_page_size);
        pm.window_hours = env_parse("GUIA_SYNC_PULL_WINDOW_HOURS").unwrap_or(pm.window_hours);

        if let Some(v) = env_string("GUIA_SYNC_SQLITE_PATH") {
            config.database.sqlite_path = v.into();
        }

        let hospital = &mut config.hospital;
        if let Some(v) = env_string("GUIA_SYNC_HOSPITAL_CODE") {
            hospital.contracted_code = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_HOSPITAL_NAME") {
            hospital.name = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_HOSPITAL_CNES") {
            hospital.cnes = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_HOSPITAL_ADDRESS") {
            hospital.address = v;
        }

        config.attachments.base_path = env_string("GUIA_SYNC_ATTACHMENTS_PATH").map(PathBuf::from);

        if let Some(v) = env_string("GUIA_SYNC_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_string("GUIA_SYNC_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("remote.auth_url", &self.remote.auth_url),
            ("remote.send_url", &self.remote.send_url),
            ("remote.export_url", &self.remote.export_url),
        ] {
            url::Url::parse(value).with_context(|| format!("{name} is not a valid URL: {value}"))?;
        }

        if self.remote.http_timeout_secs == 0 {
            anyhow::bail!("remote.http_timeout_secs must be greater than 0");
        }

        if self.token.refresh_interval_secs == 0 {
            anyhow::bail!("token.refresh_interval_secs must be greater than 0");
        }

        if self.transmission.batch_size == 0 {
            anyhow::bail!("transmission.batch_size must be greater than 0");
        }

        if self.transmission.enabled && self.transmission.interval_secs == 0 {
            anyhow::bail!("transmission.interval_secs must be greater than 0");
        }

        if self.field_monitor.enabled && self.field_monitor.interval_secs == 0 {
            anyhow::bail!("field_monitor.interval_secs must be greater than 0");
        }

        if self.field_monitor.max_attempts == 0 {
            anyhow::bail!("field_monitor.max_attempts must be greater than 0");
        }

        if self.pull_monitor.enabled && self.pull_monitor.interval_secs == 0 {
            anyhow::bail!("pull_monitor.interval_secs must be greater than 0");
        }

        for (name, secs) in [
            ("transmission.stale_processing_secs", self.transmission.stale_processing_secs),
            ("field_monitor.freshness_window_secs", self.field_monitor.freshness_window_secs),
            ("pull_monitor.window_hours", self.pull_monitor.window_hours.saturating_mul(3600)),
        ] {
            if secs > MAX_LOOKBACK_SECS {
                anyhow::bail!("{name} must not exceed {} days", MAX_LOOKBACK_SECS / 86_400);
            }
        }

        if self.pull_monitor.max_page_size == 0 {
            anyhow::bail!("pull_monitor.max_page_size must be greater than 0");
        }

        if self.pull_monitor.max_pages == 0 {
            anyhow::bail!("pull_monitor.max_pages must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.http_timeout_secs)
    }
}

impl RemoteConfig {
    /// API key for the export scope
    pub fn effective_export_api_key(&self) -> &str {
        self.export_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.api_key)
    }
}

/// Longest look-back window accepted for timestamp arithmetic (10 years)
pub const MAX_LOOKBACK_SECS: u64 = 3650 * 86_400;

/// Look-back span clamped so `now - span` cannot overflow
fn lookback(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_LOOKBACK_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero)
}

impl TransmissionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn stale_processing(&self) -> chrono::Duration {
        lookback(self.stale_processing_secs)
    }
}

impl FieldMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        lookback(self.freshness_window_secs)
    }
}

impl PullMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs(self.min_spacing_secs)
    }

    pub fn conflict_retry(&self) -> Duration {
        Duration::from_secs(self.conflict_retry_secs)
    }

    pub fn window(&self) -> chrono::Duration {
        lookback(self.window_hours.saturating_mul(3600))
    }

    pub fn page_pause(&self) -> Duration {
        Duration::from_millis(self.page_pause_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            auth_url: String::from("https://api-autenticacao.iagsaude.com/login"),
            send_url: String::from("https://api-hospitalar.iagsaude.com/integracao/guias/save"),
            export_url: String::from(
                "https://api-exportacaoassistencial.iagsaude.com/guiainternacao/search",
            ),
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            export_username: String::new(),
            export_password: String::new(),
            export_api_key: None,
            origin: String::from("API_DRG"),
            http_timeout_secs: 60,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 12_600,
        }
    }
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 5,
            interval_secs: 300,
            batch_pause_ms: 1000,
            include_retryable_errors: false,
            stale_processing_secs: 900,
        }
    }
}

impl Default for FieldMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            max_attempts: 5,
            freshness_window_secs: 1800,
        }
    }
}

impl Default for PullMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            min_spacing_secs: 60,
            conflict_retry_secs: 10,
            window_hours: 24,
            max_page_size: 100,
            max_pages: 50,
            page_pause_ms: 1000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/guias.db"),
        }
    }
}

impl Default for HospitalConfig {
    fn default() -> Self {
        Self {
            contracted_code: String::new(),
            name: String::new(),
            cnes: String::new(),
            size: String::from("2"),
            complexity: String::from("1"),
            administrative_sphere: String::from("2"),
            address: String::from("Endereço não informado"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
