use serde::{Deserialize, Serialize};

/// Face embedding vector. Dimensionality is whatever the recognizer emits
/// (512 for ArcFace w600k_r50) and is never assumed by the matching path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero-norm
    /// vector has similarity 0 with everything.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 { 0.0 } else { dot / denom }
    }

    /// `1 - cosine_similarity`, in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        // Rounding can push identical vectors a hair below zero. NaN passes through.
        let distance = 1.0 - self.similarity(other);
        if distance < 0.0 { 0.0 } else { distance }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Euclidean distance after L2-normalizing both sides.
    pub fn euclidean_l2_distance(&self, other: &Embedding) -> f32 {
        self.l2_normalized()
            .euclidean_distance(&other.l2_normalized())
    }

    /// Copy of this embedding scaled to unit length. Zero vectors are returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }
}

/// A registered face. Created once by a successful registration and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Store-assigned, unique, increasing.
    pub id: i64,
    /// Key of the retained registration photo; unique across the gallery.
    pub image_reference: String,
    pub embedding: Embedding,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Listing view of a [`FaceRecord`] without the raw vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceSummary {
    pub id: i64,
    pub image_reference: String,
    pub dim: usize,
    pub model_version: Option<String>,
    pub created_at: String,
}

impl From<&FaceRecord> for FaceSummary {
    fn from(record: &FaceRecord) -> Self {
        Self {
            id: record.id,
            image_reference: record.image_reference.clone(),
            dim: record.embedding.dim(),
            model_version: record.embedding.model_version.clone(),
            created_at: record.created_at.clone(),
        }
    }
}

/// Nearest gallery entry for a probe embedding.
///
/// `best_record` and `distance` are either both present or both absent;
/// absence means the gallery was empty.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub best_record: Option<FaceRecord>,
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self {
            best_record: None,
            distance: None,
        }
    }

    pub fn found(record: FaceRecord, distance: f32) -> Self {
        Self {
            best_record: Some(record),
            distance: Some(distance),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.best_record.is_none()
    }
}
