use facegate_core::{DistanceMetric, MatcherConfig, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Resolved as defaults → optional TOML file → `FACEGATE_*` environment
/// variables → command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address for the HTTP server.
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// ArcFace recognizer file name inside `model_dir`.
    pub recognizer_model: String,
    /// Path to the SQLite gallery.
    pub db_path: PathBuf,
    /// Directory the registered photos are written to.
    pub faces_dir: PathBuf,
    pub metric: DistanceMetric,
    /// Same-identity cutoff; the metric's default when unset.
    pub threshold: Option<f32>,
    pub detector_confidence: f32,
    pub nms_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub inference_threads: usize,
    /// Request body limit; captured photos easily exceed axum's 2 MB default.
    pub max_upload_bytes: usize,
    /// Pending requests buffered for the engine thread.
    pub engine_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            model_dir: PathBuf::from("models"),
            detector_model: "det_10g.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            db_path: PathBuf::from("database.db"),
            faces_dir: PathBuf::from("registered_faces"),
            metric: DistanceMetric::Cosine,
            threshold: None,
            detector_confidence: facegate_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: facegate_core::detector::DEFAULT_NMS_THRESHOLD,
            inference_threads: 2,
            max_upload_bytes: 16 * 1024 * 1024,
            engine_queue_depth: 16,
        }
    }
}

impl Config {
    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `FACEGATE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        override_parsed(lookup, "FACEGATE_BIND", &mut self.bind)?;
        override_parsed(lookup, "FACEGATE_MODEL_DIR", &mut self.model_dir)?;
        override_parsed(lookup, "FACEGATE_DETECTOR_MODEL", &mut self.detector_model)?;
        override_parsed(lookup, "FACEGATE_RECOGNIZER_MODEL", &mut self.recognizer_model)?;
        override_parsed(lookup, "FACEGATE_DB_PATH", &mut self.db_path)?;
        override_parsed(lookup, "FACEGATE_FACES_DIR", &mut self.faces_dir)?;
        override_parsed(lookup, "FACEGATE_METRIC", &mut self.metric)?;
        if let Some(threshold) = env_parse::<f32>(lookup, "FACEGATE_THRESHOLD")? {
            self.threshold = Some(threshold);
        }
        override_parsed(lookup, "FACEGATE_DETECTOR_CONFIDENCE", &mut self.detector_confidence)?;
        override_parsed(lookup, "FACEGATE_NMS_THRESHOLD", &mut self.nms_threshold)?;
        override_parsed(lookup, "FACEGATE_INFERENCE_THREADS", &mut self.inference_threads)?;
        override_parsed(lookup, "FACEGATE_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes)?;
        override_parsed(lookup, "FACEGATE_ENGINE_QUEUE_DEPTH", &mut self.engine_queue_depth)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.effective_threshold();
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "threshold must be a positive number, got {threshold}"
            )));
        }
        for (name, value) in [
            ("detector_confidence", self.detector_confidence),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {value}")));
            }
        }
        for (name, value) in [
            ("inference_threads", self.inference_threads),
            ("max_upload_bytes", self.max_upload_bytes),
            ("engine_queue_depth", self.engine_queue_depth),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn effective_threshold(&self) -> f32 {
        self.threshold.unwrap_or_else(|| self.metric.default_threshold())
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            metric: self.metric,
            threshold: self.effective_threshold(),
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            detector_model: self.detector_model_path(),
            recognizer_model: self.recognizer_model_path(),
            confidence_threshold: self.detector_confidence,
            nms_threshold: self.nms_threshold,
            intra_threads: self.inference_threads,
        }
    }
}

fn env_parse<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        }),
    }
}

fn override_parsed<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = env_parse(lookup, key)? {
        *slot = value;
    }
    Ok(())
}
