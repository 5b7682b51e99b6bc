use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extractor::FaceSelection;
use crate::matcher::{MatchPolicy, DEFAULT_THRESHOLD};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEID_CONFIG_PATH").unwrap_or("/usr/local/etc/faceid/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEID_DATA_PREFIX").unwrap_or("/usr/local/var/faceid"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Euclidean distance below which a probe matches. Tied to the recognizer model.
    pub threshold: f32,
    pub face_selection: FaceSelection,
    pub store_dir: PathBuf,
    /// JSON account list consulted after a successful verification.
    pub profiles: PathBuf,
    pub detector: DetectorConfig,
    pub models: ModelConfig,
    pub credential: CredentialConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    /// Name of the environment variable holding the signing secret.
    pub secret_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            face_selection: FaceSelection::default(),
            store_dir: DATA_PREFIX.join("faces"),
            profiles: DATA_PREFIX.join("accounts.json"),
            detector: DetectorConfig::default(),
            models: ModelConfig::default(),
            credential: CredentialConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let params = faceid_vision::DetectorParams::default();
        Self {
            score_threshold: params.score_threshold,
            nms_threshold: params.nms_threshold,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: DATA_PREFIX.join("models/face_detection_yunet_2023mar.onnx"),
            recognizer: DATA_PREFIX.join("models/face_recognition_sface_2021dec.onnx"),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            issuer: "faceid".to_string(),
            audience: "faceid-clients".to_string(),
            ttl_minutes: 60,
            secret_env: "FACEID_SIGNING_SECRET".to_string(),
        }
    }
}

impl Config {
    pub fn match_policy(&self) -> Result<MatchPolicy> {
        MatchPolicy::new(self.threshold).context("invalid `threshold` in config")
    }

    pub fn detector_params(&self) -> faceid_vision::DetectorParams {
        faceid_vision::DetectorParams {
            score_threshold: self.detector.score_threshold,
            nms_threshold: self.detector.nms_threshold,
        }
    }

    pub fn model_paths(&self) -> faceid_vision::ModelPaths {
        faceid_vision::ModelPaths {
            detector: self.models.detector.clone(),
            recognizer: self.models.recognizer.clone(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
