//! facegate-core — Face gallery matching and the registration/login workflows.
//!
//! Embeddings come from a pluggable [`EmbeddingProvider`]; the bundled
//! [`OnnxProvider`] runs SCRFD for detection and ArcFace for recognition via
//! ONNX Runtime. Matching is a full scan of precomputed gallery embeddings.

pub mod alignment;
pub mod detector;
pub mod gate;
pub mod matcher;
pub mod payload;
pub mod provider;
pub mod recognizer;
pub mod store;
pub mod types;

pub use gate::{FaceGate, FaceGateError, LoginOutcome};
pub use matcher::{DistanceMatcher, DistanceMetric, MatchError, Matcher, MatcherConfig};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderConfig, ProviderError};
pub use store::{GalleryError, GalleryStore, ImageStore, ImageStoreError};
pub use types::{Embedding, FaceRecord, FaceSummary, MatchResult};
