//! facegate-store — durable backends for the face gallery and photo archive.
//!
//! [`SqliteGallery`] keeps one row per registered face with the embedding
//! stored as a JSON array; [`FsImageStore`] keeps the submitted photos as JPEG
//! files named by random UUID.

pub mod gallery;
pub mod images;

pub use gallery::SqliteGallery;
pub use images::FsImageStore;

use facegate_core::{GalleryError, ImageStoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid image reference: {0}")]
    InvalidReference(String),
}

impl From<StoreError> for GalleryError {
    fn from(err: StoreError) -> Self {
        GalleryError::Backend(err.to_string())
    }
}

impl From<StoreError> for ImageStoreError {
    fn from(err: StoreError) -> Self {
        ImageStoreError::Backend(err.to_string())
    }
}
