//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! `PORT` and `OCR_API_KEY` environment variables override the file.

use crate::domain::types::MIN_PLATE_LEN;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "gate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_username")]
    pub username: String,
    #[serde(default = "default_auth_password")]
    pub password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { username: default_auth_username(), password: default_auth_password() }
    }
}

fn default_auth_username() -> String {
    "admin".to_string()
}

fn default_auth_password() -> String {
    "admin123".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { upload_dir: default_upload_dir(), database: default_database() }
    }
}

fn default_upload_dir() -> String {
    "static/uploads".to_string()
}

fn default_database() -> String {
    "gate_system.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detector_model")]
    pub model: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
    /// Serialize inference calls (backend not documented thread-safe)
    #[serde(default = "default_serialize_inference")]
    pub serialize_inference: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            model: default_detector_model(),
            confidence_threshold: default_confidence_threshold(),
            timeout_ms: default_detector_timeout_ms(),
            serialize_inference: default_serialize_inference(),
        }
    }
}

fn default_detector_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_detector_model() -> String {
    "my_model".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.60
}

fn default_detector_timeout_ms() -> u64 {
    5000
}

fn default_serialize_inference() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_ocr_engine")]
    pub engine: u8,
    #[serde(default = "default_recognizer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_recognizer_endpoint(),
            api_key: String::new(),
            language: default_language(),
            engine: default_ocr_engine(),
            timeout_ms: default_recognizer_timeout_ms(),
        }
    }
}

fn default_recognizer_endpoint() -> String {
    "https://api.ocr.space/parse/image".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_ocr_engine() -> u8 {
    2
}

fn default_recognizer_timeout_ms() -> u64 {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Fraction of the crop width kept (strips a trailing region band)
    #[serde(default = "default_crop_width_ratio")]
    pub crop_width_ratio: f32,
    #[serde(default = "default_min_plate_len")]
    pub min_plate_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { crop_width_ratio: default_crop_width_ratio(), min_plate_len: default_min_plate_len() }
    }
}

fn default_crop_width_ratio() -> f32 {
    0.85
}

fn default_min_plate_len() -> usize {
    MIN_PLATE_LEN
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { open_duration_ms: default_open_duration_ms() }
    }
}

fn default_open_duration_ms() -> u64 {
    10_000
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
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    port: u16,
    max_upload_bytes: usize,
    auth_username: String,
    auth_password: String,
    upload_dir: String,
    database: String,
    detector_endpoint: String,
    detector_model: String,
    confidence_threshold: f32,
    detector_timeout_ms: u64,
    serialize_inference: bool,
    recognizer_endpoint: String,
    recognizer_api_key: String,
    recognizer_language: String,
    recognizer_engine: u8,
    recognizer_timeout_ms: u64,
    crop_width_ratio: f32,
    min_plate_len: usize,
    gate_open_duration_ms: u64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            max_upload_bytes: toml_config.server.max_upload_bytes,
            auth_username: toml_config.auth.username,
            auth_password: toml_config.auth.password,
            upload_dir: toml_config.storage.upload_dir,
            database: toml_config.storage.database,
            detector_endpoint: toml_config.detector.endpoint,
            detector_model: toml_config.detector.model,
            confidence_threshold: toml_config.detector.confidence_threshold,
            detector_timeout_ms: toml_config.detector.timeout_ms,
            serialize_inference: toml_config.detector.serialize_inference,
            recognizer_endpoint: toml_config.recognizer.endpoint,
            recognizer_api_key: toml_config.recognizer.api_key,
            recognizer_language: toml_config.recognizer.language,
            recognizer_engine: toml_config.recognizer.engine,
            recognizer_timeout_ms: toml_config.recognizer.timeout_ms,
            crop_width_ratio: toml_config.pipeline.crop_width_ratio,
            min_plate_len: toml_config.pipeline.min_plate_len,
            gate_open_duration_ms: toml_config.gate.open_duration_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

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

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, origin: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Ok(Self::from_toml(toml_config, origin))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Apply `PORT` / `OCR_API_KEY` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Ok(key) = env::var("OCR_API_KEY") {
            if !key.is_empty() {
                self.recognizer_api_key = key;
            }
        }
        self
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.crop_width_ratio > 0.0 && self.crop_width_ratio <= 1.0) {
            bail!("pipeline.crop_width_ratio must be in (0, 1], got {}", self.crop_width_ratio);
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "detector.confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.min_plate_len < MIN_PLATE_LEN {
            bail!(
                "pipeline.min_plate_len must be at least {MIN_PLATE_LEN}, got {}",
                self.min_plate_len
            );
        }
        if self.gate_open_duration_ms == 0 {
            bail!("gate.open_duration_ms must be positive");
        }
        if self.detector_endpoint.trim().is_empty() {
            bail!("detector.endpoint is empty");
        }
        if self.recognizer_endpoint.trim().is_empty() {
            bail!("recognizer.endpoint is empty");
        }
        if self.recognizer_timeout_ms == 0 {
            bail!("recognizer.timeout_ms must be positive");
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn auth_username(&self) -> &str {
        &self.auth_username
    }

    pub fn auth_password(&self) -> &str {
        &self.auth_password
    }

    pub fn upload_dir(&self) -> &str {
        &self.upload_dir
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn detector_endpoint(&self) -> &str {
        &self.detector_endpoint
    }

    pub fn detector_model(&self) -> &str {
        &self.detector_model
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn serialize_inference(&self) -> bool {
        self.serialize_inference
    }

    pub fn recognizer_endpoint(&self) -> &str {
        &self.recognizer_endpoint
    }

    pub fn recognizer_api_key(&self) -> &str {
        &self.recognizer_api_key
    }

    pub fn recognizer_language(&self) -> &str {
        &self.recognizer_language
    }

    pub fn recognizer_engine(&self) -> u8 {
        self.recognizer_engine
    }

    pub fn recognizer_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer_timeout_ms)
    }

    pub fn crop_width_ratio(&self) -> f32 {
        self.crop_width_ratio
    }

    pub fn min_plate_len(&self) -> usize {
        self.min_plate_len
    }

    pub fn gate_open_duration(&self) -> Duration {
        Duration::from_millis(self.gate_open_duration_ms)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point storage at a temp dir
    pub fn with_storage(mut self, upload_dir: &str, database: &str) -> Self {
        self.upload_dir = upload_dir.to_string();
        self.database = database.to_string();
        self
    }

    /// Builder method for tests to shorten the gate window
    pub fn with_gate_open_duration_ms(mut self, ms: u64) -> Self {
        self.gate_open_duration_ms = ms;
        self
    }

    /// Builder method for tests to set the crop ratio
    pub fn with_crop_width_ratio(mut self, ratio: f32) -> Self {
        self.crop_width_ratio = ratio;
        self
    }
}
