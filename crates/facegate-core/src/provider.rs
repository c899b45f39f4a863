//! Embedding provider contract and the ONNX-backed implementation.

use crate::detector::{self, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("embedding provider failed: {0}")]
    Failed(String),
}

impl From<DetectorError> for ProviderError {
    fn from(err: DetectorError) -> Self {
        ProviderError::Failed(err.to_string())
    }
}

impl From<RecognizerError> for ProviderError {
    fn from(err: RecognizerError) -> Self {
        ProviderError::Failed(err.to_string())
    }
}

/// Turns an in-memory photo into a face embedding.
///
/// Implementations decide the model, and with it the embedding dimensionality.
pub trait EmbeddingProvider: Send {
    fn embed(&mut self, image: &RgbImage) -> Result<Embedding, ProviderError>;
}

/// Model files and detector tuning for [`OnnxProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl ProviderConfig {
    pub fn new(detector_model: impl Into<PathBuf>, recognizer_model: impl Into<PathBuf>) -> Self {
        Self {
            detector_model: detector_model.into(),
            recognizer_model: recognizer_model.into(),
            confidence_threshold: detector::DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: detector::DEFAULT_NMS_THRESHOLD,
            intra_threads: 2,
        }
    }
}

/// SCRFD detection + ArcFace recognition.
///
/// When several faces are present the most confident detection is embedded.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models, failing fast if either is missing or unloadable.
    pub fn load(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(
            &config.detector_model,
            config.confidence_threshold,
            config.nms_threshold,
            config.intra_threads,
        )?;
        let recognizer = FaceRecognizer::load(&config.recognizer_model, config.intra_threads)?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn embed(&mut self, image: &RgbImage) -> Result<Embedding, ProviderError> {
        let faces = self.detector.detect(image)?;
        let face = faces.first().ok_or(ProviderError::NoFaceDetected)?;

        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            "selected face for embedding"
        );

        Ok(self.recognizer.extract(image, face)?)
    }
}
