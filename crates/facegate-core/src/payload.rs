//! Transport payload decoding: data URL → bytes → RGB pixel buffer.

use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a browser capture (`data:image/jpeg;base64,...`) or bare base64 string.
///
/// Everything up to and including the first comma is treated as the data URL
/// header. Embedded whitespace and line breaks are ignored.
pub fn decode_data_url(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let body = match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(PayloadError::Empty);
    }

    Ok(general_purpose::STANDARD.decode(compact)?)
}

/// Decode an encoded still image (JPEG, PNG, ...) into an 8-bit RGB buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PayloadError> {
    if bytes.is_empty() {
        return Err(PayloadError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}
