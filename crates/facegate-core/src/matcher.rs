//! Nearest-neighbour search over the face gallery.
//!
//! Every query scans the full gallery snapshot it is handed; there is no index.

use crate::types::{Embedding, FaceRecord, MatchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ArcFace verification thresholds per metric.
const ARCFACE_COSINE_THRESHOLD: f32 = 0.68;
const ARCFACE_EUCLIDEAN_THRESHOLD: f32 = 4.15;
const ARCFACE_EUCLIDEAN_L2_THRESHOLD: f32 = 1.13;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error(
        "embedding dimension mismatch: probe has {expected} values, gallery record {record_id} has {actual}"
    )]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        record_id: i64,
    },
}

/// Distance function between two embeddings. Lower = more similar for all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => a.cosine_distance(b),
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::EuclideanL2 => a.euclidean_l2_distance(b),
        }
    }

    /// Same-identity cutoff for ArcFace embeddings under this metric.
    pub fn default_threshold(self) -> f32 {
        match self {
            DistanceMetric::Cosine => ARCFACE_COSINE_THRESHOLD,
            DistanceMetric::Euclidean => ARCFACE_EUCLIDEAN_THRESHOLD,
            DistanceMetric::EuclideanL2 => ARCFACE_EUCLIDEAN_L2_THRESHOLD,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            other => Err(format!(
                "unknown distance metric '{other}' (expected cosine, euclidean or euclidean_l2)"
            )),
        }
    }
}

/// Metric and decision threshold, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    pub metric: DistanceMetric,
    pub threshold: f32,
}

impl MatcherConfig {
    /// Use `metric` with its default ArcFace threshold.
    pub fn for_metric(metric: DistanceMetric) -> Self {
        Self {
            metric,
            threshold: metric.default_threshold(),
        }
    }

    /// Same-identity decision: strictly below the threshold.
    /// A distance equal to the threshold, or NaN, is not accepted.
    pub fn accepts(&self, distance: f32) -> bool {
        distance < self.threshold
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self::for_metric(DistanceMetric::Cosine)
    }
}

/// Strategy for finding the nearest enrolled face to a probe embedding.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceRecord]) -> Result<MatchResult, MatchError>;
}

/// Exhaustive matcher: computes the configured distance to every gallery
/// entry and keeps the minimum. Equal distances resolve to the lowest id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMatcher {
    config: MatcherConfig,
}

impl DistanceMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn accepts(&self, distance: f32) -> bool {
        self.config.accepts(distance)
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[FaceRecord]) -> Result<MatchResult, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in gallery.iter().enumerate() {
            if record.embedding.dim() != probe.dim() {
                return Err(MatchError::DimensionMismatch {
                    expected: probe.dim(),
                    actual: record.embedding.dim(),
                    record_id: record.id,
                });
            }

            let distance = self.config.metric.distance(probe, &record.embedding);
            let is_better = match best {
                None => true,
                Some((best_idx, best_distance)) => {
                    distance < best_distance
                        || (distance == best_distance && record.id < gallery[best_idx].id)
                        // NaN never wins against a real distance
                        || (best_distance.is_nan() && !distance.is_nan())
                }
            };
            if is_better {
                best = Some((i, distance));
            }
        }

        Ok(match best {
            Some((idx, distance)) => MatchResult::found(gallery[idx].clone(), distance),
            None => MatchResult::empty(),
        })
    }
}
