//! Configuration loading from TOML files
//!
//! Every section has serde defaults so a partial file works; a missing or
//! unparsable file falls back to the built-in defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_id")]
    pub id: String,
    #[serde(default = "default_artwork_id")]
    pub artwork_id: String,
}

fn default_camera_id() -> String {
    "pi_001".to_string()
}

fn default_artwork_id() -> String {
    "artwork_001".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { id: default_camera_id(), artwork_id: default_artwork_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    #[serde(default = "default_zone_count")]
    pub count: u8,
    /// 1-based zone that triggers automatic check-in
    #[serde(default = "default_eligible_zone")]
    pub eligible_zone: u8,
}

fn default_zone_count() -> u8 {
    3
}

fn default_eligible_zone() -> u8 {
    2
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self { count: default_zone_count(), eligible_zone: default_eligible_zone() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_auto_checkin")]
    pub auto_checkin: bool,
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_auto_checkin() -> bool {
    true
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { cooldown_ms: default_cooldown_ms(), auto_checkin: default_auto_checkin() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Discovery endpoint; when unset the configured URL is always active
    #[serde(default)]
    pub discovery_url: Option<String>,
}

fn default_collector_url() -> String {
    "http://localhost:5800".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { url: default_collector_url(), api_key: None, discovery_url: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_summary_interval_secs() -> u64 {
    30
}

fn default_discovery_interval_secs() -> u64 {
    10
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            summary_interval_secs: default_summary_interval_secs(),
            discovery_interval_secs: default_discovery_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_enabled")]
    pub enabled: bool,
    #[serde(default = "default_detection_port")]
    pub listener_port: u16,
}

fn default_detection_enabled() -> bool {
    true
}

fn default_detection_port() -> u16 {
    5801
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { enabled: default_detection_enabled(), listener_port: default_detection_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_port")]
    pub port: u16,
}

fn default_control_port() -> u16 {
    8080
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { port: default_control_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Journal file for received records (JSONL format)
    #[serde(default = "default_store_file")]
    pub file: String,
    #[serde(default = "default_store_port")]
    pub bind_port: u16,
}

fn default_store_file() -> String {
    "observations.jsonl".to_string()
}

fn default_store_port() -> u16 {
    5800
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { file: default_store_file(), bind_port: default_store_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    camera_id: String,
    artwork_id: String,
    zone_count: u8,
    eligible_zone: u8,
    cooldown_ms: u64,
    auto_checkin: bool,
    collector_url: String,
    collector_api_key: Option<String>,
    discovery_url: Option<String>,
    summary_interval_secs: u64,
    discovery_interval_secs: u64,
    request_timeout_ms: u64,
    detection_enabled: bool,
    detection_port: u16,
    control_port: u16,
    metrics_interval_secs: u64,
    store_file: String,
    store_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            camera_id: toml_config.camera.id,
            artwork_id: toml_config.camera.artwork_id,
            zone_count: toml_config.zones.count,
            eligible_zone: toml_config.zones.eligible_zone,
            cooldown_ms: toml_config.presence.cooldown_ms,
            auto_checkin: toml_config.presence.auto_checkin,
            collector_url: toml_config.collector.url,
            collector_api_key: toml_config.collector.api_key,
            discovery_url: toml_config.collector.discovery_url,
            summary_interval_secs: toml_config.reporting.summary_interval_secs,
            discovery_interval_secs: toml_config.reporting.discovery_interval_secs,
            request_timeout_ms: toml_config.reporting.request_timeout_ms,
            detection_enabled: toml_config.detection.enabled,
            detection_port: toml_config.detection.listener_port,
            control_port: toml_config.control.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            store_file: toml_config.store.file,
            store_port: toml_config.store.bind_port,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, &path.display().to_string());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.zone_count >= 1, "zones.count must be at least 1");
        anyhow::ensure!(
            (1..=self.zone_count).contains(&self.eligible_zone),
            "zones.eligible_zone {} is outside 1..={}",
            self.eligible_zone,
            self.zone_count
        );
        Ok(())
    }

    // Getters for all config fields
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn artwork_id(&self) -> &str {
        &self.artwork_id
    }

    pub fn zone_count(&self) -> u8 {
        self.zone_count
    }

    pub fn eligible_zone(&self) -> u8 {
        self.eligible_zone
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    pub fn auto_checkin(&self) -> bool {
        self.auto_checkin
    }

    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }

    pub fn collector_api_key(&self) -> Option<&str> {
        self.collector_api_key.as_deref()
    }

    pub fn discovery_url(&self) -> Option<&str> {
        self.discovery_url.as_deref()
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn detection_port(&self) -> u16 {
        self.detection_port
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn store_file(&self) -> &str {
        &self.store_file
    }

    pub fn store_port(&self) -> u16 {
        self.store_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests
    #[cfg(test)]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { config: Config::default() }
    }
}

#[cfg(test)]
pub struct ConfigBuilder {
    config: Config,
}

#[cfg(test)]
impl ConfigBuilder {
    pub fn auto_checkin(mut self, enabled: bool) -> Self {
        self.config.auto_checkin = enabled;
        self
    }

    pub fn cooldown_ms(mut self, ms: u64) -> Self {
        self.config.cooldown_ms = ms;
        self
    }

    pub fn zone_count(mut self, count: u8) -> Self {
        self.config.zone_count = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
