//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::infra::profile::DEFAULT_WEIGHT_KG;
use crate::services::calories::{CalorieModel, DEFAULT_FIXED_RATE_KCAL_PER_KM};
use crate::services::fusion::FusionPolicy;
use crate::services::location_filter::{DEFAULT_MAX_ACCURACY_M, DEFAULT_MAX_SPEED_MPS};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Identifier included in every outbound payload
    #[serde(default = "default_device_id")]
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: default_device_id() }
    }
}

fn default_device_id() -> String {
    "watch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_weight_kg")]
    pub weight_kg: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { weight_kg: default_weight_kg() }
    }
}

pub fn default_weight_kg() -> u32 {
    DEFAULT_WEIGHT_KG
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Capacity of the sensor event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// "mets" or "fixed_rate"
    #[serde(default = "default_calorie_model")]
    pub calorie_model: String,
    #[serde(default = "default_fixed_rate")]
    pub fixed_rate_kcal_per_km: f64,
    /// "platform_preferred" or "gps_only"
    #[serde(default = "default_fusion_policy")]
    pub fusion_policy: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publish_interval_secs: default_publish_interval_secs(),
            publish_timeout_ms: default_publish_timeout_ms(),
            event_buffer: default_event_buffer(),
            calorie_model: default_calorie_model(),
            fixed_rate_kcal_per_km: default_fixed_rate(),
            fusion_policy: default_fusion_policy(),
        }
    }
}

fn default_publish_interval_secs() -> u64 {
    10
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_event_buffer() -> usize {
    256
}

fn default_calorie_model() -> String {
    "mets".to_string()
}

fn default_fixed_rate() -> f64 {
    DEFAULT_FIXED_RATE_KCAL_PER_KM
}

fn default_fusion_policy() -> String {
    "platform_preferred".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_max_accuracy")]
    pub max_accuracy_m: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_mps: f64,
    #[serde(default = "default_stationary_window")]
    pub stationary_window_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: default_max_accuracy(),
            max_speed_mps: default_max_speed(),
            stationary_window_secs: default_stationary_window(),
        }
    }
}

fn default_max_accuracy() -> f64 {
    DEFAULT_MAX_ACCURACY_M
}

fn default_max_speed() -> f64 {
    DEFAULT_MAX_SPEED_MPS
}

fn default_stationary_window() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic for 10 s realtime snapshots (QoS 0)
    #[serde(default = "default_realtime_topic")]
    pub realtime_topic: String,
    /// Topic for completed session summaries (QoS 1)
    #[serde(default = "default_complete_topic")]
    pub complete_topic: String,
    /// Topic for command responses (QoS 0)
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_enabled(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            realtime_topic: default_realtime_topic(),
            complete_topic: default_complete_topic(),
            response_topic: default_response_topic(),
        }
    }
}

fn default_mqtt_enabled() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_realtime_topic() -> String {
    "run/realtime".to_string()
}

fn default_complete_topic() -> String {
    "run/complete".to_string()
}

fn default_response_topic() -> String {
    "run/response".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_commands_enabled")]
    pub enabled: bool,
    #[serde(default = "default_commands_port")]
    pub port: u16,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self { enabled: default_commands_enabled(), port: default_commands_port() }
    }
}

fn default_commands_enabled() -> bool {
    true
}

fn default_commands_port() -> u16 {
    25900
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReplayConfig {
    /// JSONL recording replayed as the sensor sources
    #[serde(default)]
    pub file: Option<String>,
    /// Playback speed multiplier (2.0 = twice real time)
    #[serde(default)]
    pub speed_factor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_id: String,
    weight_kg: u32,
    publish_interval_secs: u64,
    publish_timeout_ms: u64,
    event_buffer: usize,
    calorie_model: CalorieModel,
    fusion_policy: FusionPolicy,
    max_accuracy_m: f64,
    max_speed_mps: f64,
    stationary_window_secs: u64,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_realtime_topic: String,
    mqtt_complete_topic: String,
    mqtt_response_topic: String,
    commands_enabled: bool,
    commands_port: u16,
    replay_file: Option<String>,
    replay_speed_factor: f64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        // Defaults for every section live on the TOML structs
        let mut config = Self::assemble(
            TomlConfig::default(),
            CalorieModel::Mets,
            FusionPolicy::default(),
        );
        config.config_file = "default".to_string();
        config
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    fn from_toml(toml_config: TomlConfig) -> anyhow::Result<Self> {
        let calorie_model = match toml_config.engine.calorie_model.as_str() {
            "mets" => CalorieModel::Mets,
            "fixed_rate" => CalorieModel::FixedRate {
                kcal_per_km: toml_config.engine.fixed_rate_kcal_per_km,
            },
            other => anyhow::bail!("unknown calorie_model '{}'", other),
        };
        let fusion_policy = toml_config
            .engine
            .fusion_policy
            .parse::<FusionPolicy>()
            .map_err(anyhow::Error::msg)?;

        Ok(Self::assemble(toml_config, calorie_model, fusion_policy))
    }

    fn assemble(
        toml_config: TomlConfig,
        calorie_model: CalorieModel,
        fusion_policy: FusionPolicy,
    ) -> Self {
        Self {
            device_id: toml_config.device.id,
            weight_kg: toml_config.profile.weight_kg,
            publish_interval_secs: toml_config.engine.publish_interval_secs.max(1),
            publish_timeout_ms: toml_config.engine.publish_timeout_ms,
            event_buffer: toml_config.engine.event_buffer.max(1),
            calorie_model,
            fusion_policy,
            max_accuracy_m: toml_config.filter.max_accuracy_m,
            max_speed_mps: toml_config.filter.max_speed_mps,
            stationary_window_secs: toml_config.filter.stationary_window_secs,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_realtime_topic: toml_config.mqtt.realtime_topic,
            mqtt_complete_topic: toml_config.mqtt.complete_topic,
            mqtt_response_topic: toml_config.mqtt.response_topic,
            commands_enabled: toml_config.commands.enabled,
            commands_port: toml_config.commands.port,
            replay_file: toml_config.replay.file,
            replay_speed_factor: toml_config.replay.speed_factor.unwrap_or(1.0),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file: String::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self::from_toml(toml_config)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn weight_kg(&self) -> u32 {
        self.weight_kg
    }

    pub fn publish_interval_secs(&self) -> u64 {
        self.publish_interval_secs
    }

    pub fn publish_timeout_ms(&self) -> u64 {
        self.publish_timeout_ms
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    pub fn calorie_model(&self) -> CalorieModel {
        self.calorie_model
    }

    pub fn fusion_policy(&self) -> FusionPolicy {
        self.fusion_policy
    }

    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }

    pub fn max_speed_mps(&self) -> f64 {
        self.max_speed_mps
    }

    pub fn stationary_window_secs(&self) -> u64 {
        self.stationary_window_secs
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_realtime_topic(&self) -> &str {
        &self.mqtt_realtime_topic
    }

    pub fn mqtt_complete_topic(&self) -> &str {
        &self.mqtt_complete_topic
    }

    pub fn mqtt_response_topic(&self) -> &str {
        &self.mqtt_response_topic
    }

    pub fn commands_enabled(&self) -> bool {
        self.commands_enabled
    }

    pub fn commands_port(&self) -> u16 {
        self.commands_port
    }

    pub fn replay_file(&self) -> Option<&str> {
        self.replay_file.as_deref()
    }

    pub fn replay_speed_factor(&self) -> f64 {
        self.replay_speed_factor
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the calorie model
    pub fn with_calorie_model(mut self, model: CalorieModel) -> Self {
        self.calorie_model = model;
        self
    }

    /// Builder method for tests to set the fusion policy
    pub fn with_fusion_policy(mut self, policy: FusionPolicy) -> Self {
        self.fusion_policy = policy;
        self
    }

    /// Builder method for tests to set the publish interval
    pub fn with_publish_interval_secs(mut self, secs: u64) -> Self {
        self.publish_interval_secs = secs.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device_id(), "watch");
        assert_eq!(config.weight_kg(), 65);
        assert_eq!(config.publish_interval_secs(), 10);
        assert_eq!(config.calorie_model(), CalorieModel::Mets);
        assert_eq!(config.fusion_policy(), FusionPolicy::PlatformPreferred);
        assert_eq!(config.max_accuracy_m(), 65.0);
        assert_eq!(config.max_speed_mps(), 6.5);
        assert_eq!(config.mqtt_realtime_topic(), "run/realtime");
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["run-tracker".to_string(), "--config".to_string(), "config/field.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/field.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["run-tracker".to_string(), "--config=config/bench.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/bench.toml");
    }

    #[test]
    fn test_fixed_rate_calorie_model() {
        let mut toml_config = TomlConfig::default();
        toml_config.engine.calorie_model = "fixed_rate".to_string();
        toml_config.engine.fixed_rate_kcal_per_km = 55.0;
        let config = Config::from_toml(toml_config).unwrap();
        assert_eq!(config.calorie_model(), CalorieModel::FixedRate { kcal_per_km: 55.0 });
    }

    #[test]
    fn test_unknown_fusion_policy_rejected() {
        let mut toml_config = TomlConfig::default();
        toml_config.engine.fusion_policy = "whatever".to_string();
        assert!(Config::from_toml(toml_config).is_err());
    }
}
