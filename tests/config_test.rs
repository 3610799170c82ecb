//! Integration tests for configuration loading

use plate_gate::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "north-yard"

[server]
bind_address = "127.0.0.1"
port = 8088
max_upload_bytes = 2048

[auth]
username = "guard"
password = "letmein"

[storage]
upload_dir = "/var/lib/plate-gate/uploads"
database = "/var/lib/plate-gate/gate.db"

[detector]
endpoint = "http://inference:8500"
model = "plates_v3"
confidence_threshold = 0.45
timeout_ms = 2500
serialize_inference = false

[recognizer]
endpoint = "http://ocr.local/parse/image"
api_key = "K123"
language = "ger"
engine = 1
timeout_ms = 4000

[pipeline]
crop_width_ratio = 0.8
min_plate_len = 4

[gate]
open_duration_ms = 15000

[metrics]
interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north-yard");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.port(), 8088);
    assert_eq!(config.max_upload_bytes(), 2048);
    assert_eq!(config.auth_username(), "guard");
    assert_eq!(config.auth_password(), "letmein");
    assert_eq!(config.upload_dir(), "/var/lib/plate-gate/uploads");
    assert_eq!(config.database(), "/var/lib/plate-gate/gate.db");
    assert_eq!(config.detector_endpoint(), "http://inference:8500");
    assert_eq!(config.detector_model(), "plates_v3");
    assert!((config.confidence_threshold() - 0.45).abs() < f32::EPSILON);
    assert_eq!(config.detector_timeout(), Duration::from_millis(2500));
    assert!(!config.serialize_inference());
    assert_eq!(config.recognizer_api_key(), "K123");
    assert_eq!(config.recognizer_language(), "ger");
    assert_eq!(config.recognizer_engine(), 1);
    assert_eq!(config.recognizer_timeout(), Duration::from_millis(4000));
    assert!((config.crop_width_ratio() - 0.8).abs() < f32::EPSILON);
    assert_eq!(config.min_plate_len(), 4);
    assert_eq!(config.gate_open_duration(), Duration::from_secs(15));
    assert_eq!(config.metrics_interval_secs(), 30);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.port(), 5000);
    assert_eq!(config.database(), "gate_system.db");
    assert_eq!(config.gate_open_duration(), Duration::from_secs(10));
}

#[test]
fn test_unparseable_file_falls_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[server\nport = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.port(), 5000);
}

#[test]
fn test_shipped_dev_config_is_valid() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.site_id(), "dev");
    assert!(config.validate().is_ok());
}
