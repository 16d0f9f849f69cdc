//! # Configuration Management Module
//!
//! This module handles all configuration aspects of the meshnotes gateway, providing
//! a centralized configuration system with validation, defaults, and persistence.
//!
//! ## Configuration Structure
//!
//! The configuration is organized into logical sections:
//!
//! - [`GatewayConfig`] - Core gateway behavior (dry run, locale, duplicate window)
//! - [`MeshtasticConfig`] - Mesh frame sizing and outbound pacing
//! - [`LimitsConfig`] - Rate limiting, anti-spam, and device-uptime thresholds
//! - [`OsmConfig`] - OSM Notes API endpoint, retry ceiling, and polling cadence
//! - [`GeocodingConfig`] - Nominatim reverse-geocoding enrichment
//! - [`StorageConfig`] - Data persistence settings
//! - [`LoggingConfig`] - Logging and debugging settings
//!
//! ## Configuration File Format
//!
//! Meshnotes uses TOML for human-readable configuration:
//!
//! ```toml
//! [gateway]
//! dry_run = false
//! locale = "en"
//!
//! [osm]
//! api_url = "https://api.openstreetmap.org"
//! max_retries = 5
//! ```
//!
//! All values have working defaults; a missing section falls back wholesale.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Core gateway behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// When set, every outbound send is logged and reported as successful without
    /// touching the transport. Submission to OSM still happens.
    #[serde(default)]
    pub dry_run: bool,
    /// Locale for user-facing mesh messages (catalog key, e.g. "en", "es").
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Directory holding optional `<locale>.toml` message overlays.
    #[serde(default = "default_locale_dir")]
    pub locale_dir: String,
    /// Append the privacy reminder to every Nth accepted report per device.
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval: u64,
    /// Window for exact-text duplicate detection, in seconds.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_locale_dir() -> String {
    "locale".to_string()
}

fn default_reminder_interval() -> u64 {
    5
}

fn default_duplicate_window() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            locale: default_locale(),
            locale_dir: default_locale_dir(),
            reminder_interval: default_reminder_interval(),
            duplicate_window_secs: default_duplicate_window(),
        }
    }
}

/// Mesh frame sizing and outbound pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// Maximum payload bytes per mesh frame; longer messages are segmented.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum note text bytes accepted after the command token.
    #[serde(default = "default_max_note_bytes")]
    pub max_note_bytes: usize,
    /// Delay between parts of a segmented acknowledgment DM, in seconds.
    #[serde(default = "default_ack_part_delay")]
    pub ack_part_delay_secs: u64,
    /// Delay between parts of a segmented command response, in seconds. Responses
    /// are longer and less urgent than acks, so they get wider spacing.
    #[serde(default = "default_response_part_delay")]
    pub response_part_delay_secs: u64,
}

fn default_max_frame_bytes() -> usize {
    230
}

fn default_max_note_bytes() -> usize {
    200
}

fn default_ack_part_delay() -> u64 {
    2
}

fn default_response_part_delay() -> u64 {
    5
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            max_note_bytes: default_max_note_bytes(),
            ack_part_delay_secs: default_ack_part_delay(),
            response_part_delay_secs: default_response_part_delay(),
        }
    }
}

/// Rate limiting, anti-spam, and device-uptime thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Sliding window for inbound message rate limiting, in seconds.
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,
    /// Maximum inbound messages per device within the rate window.
    #[serde(default = "default_rate_max")]
    pub rate_max_messages: usize,
    /// Sliding window for outbound notification anti-spam, in seconds.
    #[serde(default = "default_antispam_window")]
    pub antispam_window_secs: u64,
    /// Maximum outbound notifications per device within the anti-spam window.
    #[serde(default = "default_antispam_max")]
    pub antispam_max: usize,
    /// A device with uptime below this is considered recently booted, in seconds.
    #[serde(default = "default_uptime_recent")]
    pub uptime_recent_secs: u64,
    /// Expected GPS acquisition time after boot, in seconds. A recently booted
    /// device whose cached position is older than this gets a wait suggestion.
    #[serde(default = "default_gps_wait")]
    pub gps_wait_secs: u64,
}

fn default_rate_window() -> u64 {
    600
}

fn default_rate_max() -> usize {
    5
}

fn default_antispam_window() -> u64 {
    60
}

fn default_antispam_max() -> usize {
    3
}

fn default_uptime_recent() -> u64 {
    300
}

fn default_gps_wait() -> u64 {
    120
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: default_rate_window(),
            rate_max_messages: default_rate_max(),
            antispam_window_secs: default_antispam_window(),
            antispam_max: default_antispam_max(),
            uptime_recent_secs: default_uptime_recent(),
            gps_wait_secs: default_gps_wait(),
        }
    }
}

/// OSM Notes API endpoint and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmConfig {
    /// API base, e.g. "https://api.openstreetmap.org".
    #[serde(default = "default_osm_api_url")]
    pub api_url: String,
    /// Web base for user-visible note links, e.g. "https://www.openstreetmap.org".
    #[serde(default = "default_osm_web_url")]
    pub web_url: String,
    /// Retry ceiling per queue entry before it is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between submissions within one pass once a failure occurred, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// HTTP timeout for one submission, in seconds.
    #[serde(default = "default_osm_timeout")]
    pub timeout_secs: u64,
    /// How often the retry-queue worker drains pending entries, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum queue entries submitted per worker pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_osm_api_url() -> String {
    "https://api.openstreetmap.org".to_string()
}

fn default_osm_web_url() -> String {
    "https://www.openstreetmap.org".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    30
}

fn default_osm_timeout() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_limit() -> usize {
    10
}

impl Default for OsmConfig {
    fn default() -> Self {
        Self {
            api_url: default_osm_api_url(),
            web_url: default_osm_web_url(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            timeout_secs: default_osm_timeout(),
            poll_interval_secs: default_poll_interval(),
            batch_limit: default_batch_limit(),
        }
    }
}

/// Nominatim reverse-geocoding enrichment. Disabled by default to spare the
/// public instance; when disabled, success notifications simply omit the
/// location line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_nominatim_url")]
    pub api_url: String,
    #[serde(default = "default_geocode_timeout")]
    pub timeout_secs: u64,
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

fn default_geocode_timeout() -> u64 {
    10
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_nominatim_url(),
            timeout_secs: default_geocode_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level ("error" | "warn" | "info" | "debug" | "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path; when set, log lines are appended there as well.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub osm: OsmConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let serialized = toml::to_string_pretty(&Config::default())?;
        fs::write(path, serialized).await?;
        Ok(())
    }

    /// Sanity-check values the core depends on.
    pub fn validate(&self) -> Result<()> {
        if self.meshtastic.max_frame_bytes < 32 {
            return Err(anyhow!(
                "meshtastic.max_frame_bytes too small ({}); minimum is 32",
                self.meshtastic.max_frame_bytes
            ));
        }
        if self.meshtastic.max_note_bytes == 0 {
            return Err(anyhow!("meshtastic.max_note_bytes must be > 0"));
        }
        if self.limits.rate_max_messages == 0 {
            return Err(anyhow!("limits.rate_max_messages must be > 0"));
        }
        if self.limits.antispam_max == 0 {
            return Err(anyhow!("limits.antispam_max must be > 0"));
        }
        if self.osm.max_retries == 0 {
            return Err(anyhow!("osm.max_retries must be > 0"));
        }
        if self.osm.batch_limit == 0 {
            return Err(anyhow!("osm.batch_limit must be > 0"));
        }
        if self.gateway.reminder_interval == 0 {
            return Err(anyhow!("gateway.reminder_interval must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn missing_sections_fall_back() {
        let cfg: Config = toml::from_str("[gateway]\ndry_run = true\n").unwrap();
        assert!(cfg.gateway.dry_run);
        assert_eq!(cfg.meshtastic.max_frame_bytes, 230);
        assert_eq!(cfg.osm.max_retries, 5);
    }

    #[test]
    fn rejects_tiny_frame_budget() {
        let mut cfg = Config::default();
        cfg.meshtastic.max_frame_bytes = 8;
        assert!(cfg.validate().is_err());
    }
}
