//! Integration tests for configuration loading

use run_tracker::infra::Config;
use run_tracker::services::calories::CalorieModel;
use run_tracker::services::fusion::FusionPolicy;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[device]
id = "watch-test"

[profile]
weight_kg = 72

[engine]
publish_interval_secs = 5
publish_timeout_ms = 1500
calorie_model = "fixed_rate"
fixed_rate_kcal_per_km = 55.0
fusion_policy = "gps_only"

[filter]
max_accuracy_m = 40.0
stationary_window_secs = 12

[mqtt]
host = "test-host"
port = 1884
username = "watch"
password = "secret"
realtime_topic = "test/realtime"

[commands]
port = 26000

[replay]
file = "runs/park.jsonl"
speed_factor = 4.0

[metrics]
interval_secs = 15
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.device_id(), "watch-test");
    assert_eq!(config.weight_kg(), 72);
    assert_eq!(config.publish_interval_secs(), 5);
    assert_eq!(config.publish_timeout_ms(), 1500);
    assert_eq!(config.calorie_model(), CalorieModel::FixedRate { kcal_per_km: 55.0 });
    assert_eq!(config.fusion_policy(), FusionPolicy::GpsOnly);
    assert_eq!(config.max_accuracy_m(), 40.0);
    // unset keys keep their defaults
    assert_eq!(config.max_speed_mps(), 6.5);
    assert_eq!(config.stationary_window_secs(), 12);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_username(), Some("watch"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert_eq!(config.mqtt_realtime_topic(), "test/realtime");
    assert_eq!(config.mqtt_complete_topic(), "run/complete");
    assert_eq!(config.commands_port(), 26000);
    assert_eq!(config.replay_file(), Some("runs/park.jsonl"));
    assert_eq!(config.replay_speed_factor(), 4.0);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_file = write_config("");
    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.weight_kg(), 65);
    assert_eq!(config.publish_interval_secs(), 10);
    assert_eq!(config.calorie_model(), CalorieModel::Mets);
    assert_eq!(config.fusion_policy(), FusionPolicy::PlatformPreferred);
    assert_eq!(config.replay_file(), None);
}

#[test]
fn test_unknown_calorie_model_rejected() {
    let temp_file = write_config("[engine]\ncalorie_model = \"guess\"\n");
    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("guess"));
}

#[test]
fn test_unknown_fusion_policy_rejected() {
    let temp_file = write_config("[engine]\nfusion_policy = \"phone_only\"\n");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.commands_port(), 25900);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_shipped_dev_config_parses() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.device_id(), "watch-dev");
    assert_eq!(config.calorie_model(), CalorieModel::Mets);
}
