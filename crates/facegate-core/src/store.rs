//! Persistence contracts used by the workflows.
//!
//! Implementations live in `facegate-store`; the workflows only see these traits.

use crate::types::{Embedding, FaceRecord};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("image reference already registered: {0}")]
    DuplicateReference(String),
    #[error("gallery storage error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("image storage error: {0}")]
    Backend(String),
}

/// Append-only gallery of registered faces.
pub trait GalleryStore: Send + Sync {
    /// Persist a new record. Either the record is durably visible to
    /// subsequent reads or an error is returned; nothing partial is kept.
    fn append(&self, image_reference: &str, embedding: &Embedding) -> Result<FaceRecord, GalleryError>;

    /// Every currently persisted record.
    fn all(&self) -> Result<Vec<FaceRecord>, GalleryError>;

    fn count(&self) -> Result<usize, GalleryError>;
}

/// Durable retention of the submitted photos.
pub trait ImageStore: Send + Sync {
    /// Store the image under a freshly generated unique reference.
    fn save(&self, image: &RgbImage) -> Result<String, ImageStoreError>;

    /// Remove a stored image. Removing an unknown reference is not an error.
    fn delete(&self, reference: &str) -> Result<(), ImageStoreError>;
}
