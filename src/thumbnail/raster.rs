//! Frame to compressed data-URI.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use super::surface::{Frame, SurfaceError};

/// Encode an RGBA frame as a `data:image/jpeg;base64,...` URI.
///
/// JPEG carries no alpha, so the frame is flattened to RGB first.
pub fn to_jpeg_data_uri(frame: &Frame, quality: u8) -> Result<String, SurfaceError> {
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.pixels.clone()).ok_or_else(|| {
        SurfaceError::Capture(format!(
            "{} bytes do not fill a {}x{} RGBA frame",
            frame.pixels.len(),
            frame.width,
            frame.height
        ))
    })?;
    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| SurfaceError::Capture(e.to_string()))?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}
