//! Registration and login workflows.
//!
//! Registration holds one lock across duplicate check → image save → gallery
//! append, so two concurrent registrations of the same face cannot both pass
//! the duplicate check. Near-duplicate embeddings can't be caught by a store
//! uniqueness constraint; the store only enforces unique image references.

use crate::matcher::{DistanceMatcher, MatchError, Matcher, MatcherConfig};
use crate::payload::{self, PayloadError};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::store::{GalleryError, GalleryStore, ImageStore, ImageStoreError};
use crate::types::{Embedding, FaceRecord, FaceSummary, MatchResult};
use image::RgbImage;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceGateError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("embedding provider error: {0}")]
    ProviderError(String),
    #[error(transparent)]
    DimensionMismatch(#[from] MatchError),
    #[error("face already registered as {reference} (distance {distance:.4})")]
    AlreadyRegistered { reference: String, distance: f32 },
    #[error("image reference already registered: {0}")]
    DuplicateReference(String),
    #[error("store error: {0}")]
    StoreError(String),
    #[error("no faces registered")]
    NoRegisteredFaces,
}

impl FaceGateError {
    /// Human-readable message for the person in front of the camera.
    pub fn user_message(&self) -> &'static str {
        match self {
            FaceGateError::InvalidImage(_) => "Error decoding the image.",
            FaceGateError::NoFaceDetected => {
                "No face found in the image or error creating embedding. Please ensure your face is clearly visible."
            }
            FaceGateError::ProviderError(_) => {
                "Face recognition is unavailable right now. Please try again later."
            }
            FaceGateError::DimensionMismatch(_) => {
                "Face comparison failed because the registered faces use a different model."
            }
            FaceGateError::AlreadyRegistered { .. } => "This face is already registered.",
            FaceGateError::DuplicateReference(_) => {
                "Could not store the face because its image name is already taken. Please retry."
            }
            FaceGateError::StoreError(_) => "Error saving face to the database.",
            FaceGateError::NoRegisteredFaces => "No faces registered yet. Please register first.",
        }
    }
}

impl From<PayloadError> for FaceGateError {
    fn from(err: PayloadError) -> Self {
        FaceGateError::InvalidImage(err.to_string())
    }
}

impl From<ProviderError> for FaceGateError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoFaceDetected => FaceGateError::NoFaceDetected,
            ProviderError::Failed(msg) => FaceGateError::ProviderError(msg),
        }
    }
}

impl From<GalleryError> for FaceGateError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::DuplicateReference(reference) => FaceGateError::DuplicateReference(reference),
            GalleryError::Backend(msg) => FaceGateError::StoreError(msg),
        }
    }
}

impl From<ImageStoreError> for FaceGateError {
    fn from(err: ImageStoreError) -> Self {
        FaceGateError::StoreError(err.to_string())
    }
}

/// Result of a login attempt against a non-empty gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Matched { identity: String, distance: f32 },
    NotMatched { distance: f32 },
}

/// Face registration/login service.
pub struct FaceGate {
    provider: Mutex<Box<dyn EmbeddingProvider>>,
    gallery: Box<dyn GalleryStore>,
    images: Box<dyn ImageStore>,
    matcher: DistanceMatcher,
    enrollment: Mutex<()>,
}

impl FaceGate {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        gallery: Box<dyn GalleryStore>,
        images: Box<dyn ImageStore>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            provider: Mutex::new(provider),
            gallery,
            images,
            matcher: DistanceMatcher::new(config),
            enrollment: Mutex::new(()),
        }
    }

    pub fn matcher_config(&self) -> &MatcherConfig {
        self.matcher.config()
    }

    /// Register the face in an encoded photo.
    pub fn register(&self, raw_image: &[u8]) -> Result<FaceRecord, FaceGateError> {
        let image = payload::decode_image(raw_image)?;
        let embedding = self.embed(&image)?;

        let _guard = self.enrollment.lock();

        let nearest = self.nearest(&embedding)?;
        if let (Some(existing), Some(distance)) = (&nearest.best_record, nearest.distance) {
            if self.matcher.accepts(distance) {
                tracing::info!(
                    existing = %existing.image_reference,
                    distance,
                    "registration rejected: face already registered"
                );
                return Err(FaceGateError::AlreadyRegistered {
                    reference: existing.image_reference.clone(),
                    distance,
                });
            }
            tracing::debug!(distance, "nearest registered face is a different identity");
        }

        let reference = self.images.save(&image)?;

        match self.gallery.append(&reference, &embedding) {
            Ok(record) => {
                tracing::info!(
                    id = record.id,
                    reference = %record.image_reference,
                    dim = record.embedding.dim(),
                    "face registered"
                );
                Ok(record)
            }
            Err(err) => {
                tracing::error!(reference = %reference, error = %err, "gallery append failed; removing saved image");
                if let Err(cleanup) = self.images.delete(&reference) {
                    tracing::warn!(reference = %reference, error = %cleanup, "failed to remove orphaned image");
                }
                Err(err.into())
            }
        }
    }

    /// Identify the face in an encoded photo against the gallery.
    pub fn login(&self, raw_image: &[u8]) -> Result<LoginOutcome, FaceGateError> {
        let image = payload::decode_image(raw_image)?;

        if self.gallery.count()? == 0 {
            tracing::info!("login rejected: gallery is empty");
            return Err(FaceGateError::NoRegisteredFaces);
        }

        let embedding = self.embed(&image)?;
        let nearest = self.nearest(&embedding)?;

        let (Some(best), Some(distance)) = (nearest.best_record, nearest.distance) else {
            return Err(FaceGateError::NoRegisteredFaces);
        };

        if self.matcher.accepts(distance) {
            tracing::info!(identity = %best.image_reference, distance, "login matched");
            Ok(LoginOutcome::Matched {
                identity: best.image_reference,
                distance,
            })
        } else {
            tracing::info!(distance, "login not matched");
            Ok(LoginOutcome::NotMatched { distance })
        }
    }

    /// Registered faces, oldest first.
    pub fn faces(&self) -> Result<Vec<FaceSummary>, FaceGateError> {
        Ok(self.gallery.all()?.iter().map(FaceSummary::from).collect())
    }

    pub fn gallery_size(&self) -> Result<usize, FaceGateError> {
        Ok(self.gallery.count()?)
    }

    fn embed(&self, image: &RgbImage) -> Result<Embedding, FaceGateError> {
        let result = self.provider.lock().embed(image);
        result.map_err(|err| {
            match &err {
                ProviderError::NoFaceDetected => tracing::info!("no face detected in submitted image"),
                ProviderError::Failed(msg) => tracing::error!(error = %msg, "embedding provider failed"),
            }
            FaceGateError::from(err)
        })
    }

    /// Fresh full-gallery scan for the probe.
    fn nearest(&self, embedding: &Embedding) -> Result<MatchResult, FaceGateError> {
        let gallery = self.gallery.all()?;
        self.matcher.compare(embedding, &gallery).map_err(|err| {
            tracing::error!(
                error = %err,
                "embedding dimension mismatch: gallery contains embeddings from a different model"
            );
            FaceGateError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    /// Embeds the top-left pixel's colour, or reports no face for pure black.
    struct ColourProvider {
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for ColourProvider {
        fn embed(&mut self, image: &RgbImage) -> Result<Embedding, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Rgb(c) = *image.get_pixel(0, 0);
            if c == [0, 0, 0] {
                return Err(ProviderError::NoFaceDetected);
            }
            Ok(Embedding::new(c.iter().map(|&v| v as f32).collect()))
        }
    }

    /// Returns queued embeddings verbatim, ignoring the image.
    struct ScriptedProvider {
        embeddings: Vec<Embedding>,
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn embed(&mut self, _image: &RgbImage) -> Result<Embedding, ProviderError> {
            if self.embeddings.is_empty() {
                return Err(ProviderError::Failed("script exhausted".into()));
            }
            Ok(self.embeddings.remove(0))
        }
    }

    #[derive(Default)]
    struct MemoryGallery {
        records: Mutex<Vec<FaceRecord>>,
        fail_append: bool,
    }

    impl GalleryStore for Arc<MemoryGallery> {
        fn append(&self, image_reference: &str, embedding: &Embedding) -> Result<FaceRecord, GalleryError> {
            if self.fail_append {
                return Err(GalleryError::Backend("disk full".into()));
            }
            let mut records = self.records.lock();
            if records.iter().any(|r| r.image_reference == image_reference) {
                return Err(GalleryError::DuplicateReference(image_reference.to_string()));
            }
            let record = FaceRecord {
                id: records.len() as i64 + 1,
                image_reference: image_reference.to_string(),
                embedding: embedding.clone(),
                created_at: "2024-01-01T00:00:00Z".into(),
            };
            records.push(record.clone());
            Ok(record)
        }

        fn all(&self) -> Result<Vec<FaceRecord>, GalleryError> {
            Ok(self.records.lock().clone())
        }

        fn count(&self) -> Result<usize, GalleryError> {
            Ok(self.records.lock().len())
        }
    }

    #[derive(Default)]
    struct MemoryImages {
        saved: Mutex<Vec<String>>,
        next: AtomicUsize,
    }

    impl ImageStore for Arc<MemoryImages> {
        fn save(&self, _image: &RgbImage) -> Result<String, ImageStoreError> {
            let reference = format!("face-{}.jpg", self.next.fetch_add(1, Ordering::SeqCst));
            self.saved.lock().push(reference.clone());
            Ok(reference)
        }

        fn delete(&self, reference: &str) -> Result<(), ImageStoreError> {
            self.saved.lock().retain(|r| r != reference);
            Ok(())
        }
    }

    struct Harness {
        gate: FaceGate,
        gallery: Arc<MemoryGallery>,
        images: Arc<MemoryImages>,
        calls: Arc<AtomicUsize>,
    }

    fn harness_with(gallery: MemoryGallery) -> Harness {
        let gallery = Arc::new(gallery);
        let images = Arc::new(MemoryImages::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = FaceGate::new(
            Box::new(ColourProvider { calls: calls.clone() }),
            Box::new(gallery.clone()),
            Box::new(images.clone()),
            MatcherConfig::default(),
        );
        Harness {
            gate,
            gallery,
            images,
            calls,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryGallery::default())
    }

    fn photo(colour: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb(colour));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn unit_at_cosine(cos_theta: f32) -> Embedding {
        Embedding::new(vec![cos_theta, (1.0 - cos_theta * cos_theta).sqrt()])
    }

    fn scripted_gate(embeddings: Vec<Embedding>, threshold: f32) -> (FaceGate, Arc<MemoryGallery>) {
        let gallery = Arc::new(MemoryGallery::default());
        let gate = FaceGate::new(
            Box::new(ScriptedProvider { embeddings }),
            Box::new(gallery.clone()),
            Box::new(Arc::new(MemoryImages::default())),
            MatcherConfig {
                threshold,
                ..MatcherConfig::default()
            },
        );
        (gate, gallery)
    }

    #[test]
    fn test_register_into_empty_gallery() {
        let h = harness();
        let record = h.gate.register(&photo([200, 10, 10])).unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.embedding.values, vec![200.0, 10.0, 10.0]);
        assert_eq!(h.images.saved.lock().as_slice(), &[record.image_reference.clone()]);
        assert_eq!(h.gate.gallery_size().unwrap(), 1);
    }

    #[test]
    fn test_register_same_face_twice_is_rejected() {
        let h = harness();
        let first = h.gate.register(&photo([200, 10, 10])).unwrap();
        let err = h.gate.register(&photo([200, 10, 10])).unwrap_err();
        match err {
            FaceGateError::AlreadyRegistered { reference, distance } => {
                assert_eq!(reference, first.image_reference);
                assert!(distance < 1e-6);
            }
            other => panic!("expected AlreadyRegistered, got {other:?}"),
        }
        assert_eq!(h.gallery.records.lock().len(), 1);
        assert_eq!(h.images.saved.lock().len(), 1);
    }

    #[test]
    fn test_register_distinct_faces() {
        let h = harness();
        h.gate.register(&photo([200, 0, 0])).unwrap();
        h.gate.register(&photo([0, 200, 0])).unwrap();
        assert_eq!(h.gate.gallery_size().unwrap(), 2);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_not_duplicate() {
        let e1 = Embedding::new(vec![1.0, 0.0]);
        let e2 = unit_at_cosine(0.4);
        let threshold = e1.cosine_distance(&e2);

        let (gate, gallery) = scripted_gate(vec![e1, e2], threshold);
        gate.register(&photo([1, 1, 1])).unwrap();
        gate.register(&photo([1, 1, 1])).unwrap();
        assert_eq!(gallery.records.lock().len(), 2);
    }

    #[test]
    fn test_register_invalid_image() {
        let h = harness();
        let err = h.gate.register(b"not an image").unwrap_err();
        assert!(matches!(err, FaceGateError::InvalidImage(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_no_face() {
        let h = harness();
        let err = h.gate.register(&photo([0, 0, 0])).unwrap_err();
        assert!(matches!(err, FaceGateError::NoFaceDetected));
        assert!(h.images.saved.lock().is_empty());
    }

    #[test]
    fn test_failed_append_removes_saved_image() {
        let h = harness_with(MemoryGallery {
            fail_append: true,
            ..MemoryGallery::default()
        });
        let err = h.gate.register(&photo([200, 10, 10])).unwrap_err();
        assert!(matches!(err, FaceGateError::StoreError(_)));
        assert!(h.images.saved.lock().is_empty());
        assert_eq!(h.images.next.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_dimension_mismatch() {
        let h = harness();
        h.gallery
            .append("legacy.jpg", &Embedding::new(vec![0.1; 128]))
            .unwrap();
        let err = h.gate.register(&photo([200, 10, 10])).unwrap_err();
        assert!(matches!(
            err,
            FaceGateError::DimensionMismatch(MatchError::DimensionMismatch {
                expected: 3,
                actual: 128,
                ..
            })
        ));
    }

    #[test]
    fn test_login_empty_gallery_skips_provider() {
        let h = harness();
        let err = h.gate.login(&photo([200, 10, 10])).unwrap_err();
        assert!(matches!(err, FaceGateError::NoRegisteredFaces));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_login_invalid_image_before_gallery_check() {
        let h = harness();
        let err = h.gate.login(b"garbage").unwrap_err();
        assert!(matches!(err, FaceGateError::InvalidImage(_)));
    }

    #[test]
    fn test_login_matches_registered_face() {
        let h = harness();
        let record = h.gate.register(&photo([200, 10, 10])).unwrap();
        let outcome = h.gate.login(&photo([190, 12, 9])).unwrap();
        match outcome {
            LoginOutcome::Matched { identity, distance } => {
                assert_eq!(identity, record.image_reference);
                assert!(distance < 0.01);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_login_no_face() {
        let h = harness();
        h.gate.register(&photo([200, 10, 10])).unwrap();
        let err = h.gate.login(&photo([0, 0, 0])).unwrap_err();
        assert!(matches!(err, FaceGateError::NoFaceDetected));
    }

    #[test]
    fn test_login_scenario_not_matched_at_070() {
        let (gate, _) = scripted_gate(
            vec![Embedding::new(vec![1.0, 0.0]), unit_at_cosine(0.30)],
            0.68,
        );
        gate.register(&photo([1, 1, 1])).unwrap();
        match gate.login(&photo([1, 1, 1])).unwrap() {
            LoginOutcome::NotMatched { distance } => assert!((distance - 0.70).abs() < 1e-5),
            other => panic!("expected NotMatched, got {other:?}"),
        }
    }

    #[test]
    fn test_login_scenario_matched_at_050() {
        let (gate, _) = scripted_gate(
            vec![Embedding::new(vec![1.0, 0.0]), unit_at_cosine(0.50)],
            0.68,
        );
        let record = gate.register(&photo([1, 1, 1])).unwrap();
        match gate.login(&photo([1, 1, 1])).unwrap() {
            LoginOutcome::Matched { identity, distance } => {
                assert_eq!(identity, record.image_reference);
                assert!((distance - 0.50).abs() < 1e-5);
            }
            other => panic!("expected Matched, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_registration_of_same_face() {
        let h = harness();
        let gate = &h.gate;
        let barrier = &Barrier::new(2);
        let image = photo([10, 200, 30]);
        let image = image.as_slice();

        let results: Vec<Result<FaceRecord, FaceGateError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        gate.register(image)
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(FaceGateError::AlreadyRegistered { .. })))
            .count();
        assert_eq!((successes, duplicates), (1, 1));
        assert_eq!(h.gallery.records.lock().len(), 1);
    }

    #[test]
    fn test_faces_listing() {
        let h = harness();
        h.gate.register(&photo([200, 0, 0])).unwrap();
        h.gate.register(&photo([0, 0, 200])).unwrap();
        let faces = h.gate.faces().unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].dim, 3);
        assert_eq!(faces[1].id, 2);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            FaceGateError::InvalidImage("x".into()),
            FaceGateError::NoFaceDetected,
            FaceGateError::ProviderError("x".into()),
            FaceGateError::DimensionMismatch(MatchError::DimensionMismatch {
                expected: 1,
                actual: 2,
                record_id: 3,
            }),
            FaceGateError::AlreadyRegistered {
                reference: "a".into(),
                distance: 0.1,
            },
            FaceGateError::DuplicateReference("a".into()),
            FaceGateError::StoreError("x".into()),
            FaceGateError::NoRegisteredFaces,
        ];
        let mut messages: Vec<&str> = errors.iter().map(|e| e.user_message()).collect();
        messages.sort_unstable();
        messages.dedup();
        assert_eq!(messages.len(), errors.len());
    }
}
