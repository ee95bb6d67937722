//! JPEG re-encoding for image uploads.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;

use crate::error::ApiError;

/// Compression quality used when the caller does not pick one.
pub const DEFAULT_IMAGE_QUALITY: f32 = 0.8;

/// Decode `bytes` (any supported format) and re-encode as JPEG.
///
/// `quality` is in `0.0..=1.0` and is clamped. Alpha is dropped. Any decode or
/// encode failure is an `Encoding` error.
pub fn compress_jpeg(bytes: &[u8], quality: f32) -> Result<Vec<u8>, ApiError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| ApiError::Encoding(e.to_string()))?;
    let rgb = decoded.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality));
    rgb.write_with_encoder(encoder)
        .map_err(|e| ApiError::Encoding(e.to_string()))?;
    Ok(out.into_inner())
}

fn jpeg_quality(quality: f32) -> u8 {
    if quality.is_nan() {
        return jpeg_quality(DEFAULT_IMAGE_QUALITY);
    }
    (quality.clamp(0.01, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    pub(crate) fn png_fixture() -> Vec<u8> {
        let img = RgbaImage::from_fn(16, 16, |x, y| Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn png_becomes_jpeg() {
        let jpeg = compress_jpeg(&png_fixture(), DEFAULT_IMAGE_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 16);
    }

    #[test]
    fn garbage_is_encoding_error() {
        let err = compress_jpeg(b"definitely not an image", 0.8).unwrap_err();
        assert!(matches!(err, ApiError::Encoding(_)));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(jpeg_quality(0.8), 80);
        assert_eq!(jpeg_quality(3.0), 100);
        assert_eq!(jpeg_quality(-1.0), 1);
        assert_eq!(jpeg_quality(f32::NAN), 80);
    }
}
