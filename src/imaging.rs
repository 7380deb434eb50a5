use std::io::Cursor;

use base64::Engine;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageFormat, ImageReader};
use tracing::{debug, info};

use crate::{error::AnalyzeError, models::NormalizedImage};

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Longest allowed edge in pixels.
    pub target_dimension: u32,
    pub quality: u8,
    pub max_bytes: usize,
}

/// Brings an upload down to a small JPEG and wraps it as a data URL.
///
/// A JPEG that already fits within `target_dimension` and `max_bytes` is
/// returned byte for byte. Anything else is decoded, shrunk so its long edge
/// equals the target (never enlarged), and re-encoded at `quality`.
pub fn normalize(bytes: &[u8], opts: &NormalizeOptions) -> Result<NormalizedImage, AnalyzeError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AnalyzeError::ImageProcessing(format!("read header: {e}")))?;
    let format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| AnalyzeError::ImageProcessing(format!("read dimensions: {e}")))?;

    debug!(?format, width, height, bytes = bytes.len(), "image metadata");

    let already_compliant = format == Some(ImageFormat::Jpeg)
        && width <= opts.target_dimension
        && height <= opts.target_dimension
        && bytes.len() <= opts.max_bytes;

    if already_compliant {
        info!("🖼️ Image already {}x{} JPEG, passing through", width, height);
        return Ok(wrap(bytes.to_vec(), true));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalyzeError::ImageProcessing(format!("decode: {e}")))?;

    let resized = if width.max(height) > opts.target_dimension {
        decoded.resize(opts.target_dimension, opts.target_dimension, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = resized.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, opts.quality)
        .encode_image(&rgb)
        .map_err(|e| AnalyzeError::ImageProcessing(format!("encode jpeg: {e}")))?;

    info!(
        "🖼️ Recompressed {}x{} -> {}x{} ({} KB -> {} KB)",
        width,
        height,
        rgb.width(),
        rgb.height(),
        bytes.len() / 1024,
        out.len() / 1024
    );
    Ok(wrap(out, false))
}

fn wrap(bytes: Vec<u8>, passthrough: bool) -> NormalizedImage {
    let base64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let data_url = format!("data:image/jpeg;base64,{base64}");
    let size_kb = bytes.len() as f64 / 1024.0;
    NormalizedImage { bytes, base64, data_url, size_kb, passthrough }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage, Rgb};

    const OPTS: NormalizeOptions = NormalizeOptions { target_dimension: 384, quality: 50, max_bytes: 10 * 1024 * 1024 };

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128])))
    }

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn dimensions(bytes: &[u8]) -> (u32, u32) {
        let decoded = image::load_from_memory(bytes).unwrap();
        (decoded.width(), decoded.height())
    }

    #[test]
    fn compliant_jpeg_passes_through_unchanged() {
        let original = encode(&gradient(300, 200), ImageFormat::Jpeg);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert!(normalized.passthrough);
        assert_eq!(normalized.bytes, original);
    }

    #[test]
    fn jpeg_at_exact_target_passes_through() {
        let original = encode(&gradient(384, 384), ImageFormat::Jpeg);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert_eq!(normalized.bytes, original);
    }

    #[test]
    fn large_image_is_shrunk_to_long_edge() {
        let original = encode(&gradient(1000, 500), ImageFormat::Png);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert!(!normalized.passthrough);
        assert_eq!(dimensions(&normalized.bytes), (384, 192));
    }

    #[test]
    fn portrait_image_uses_height_as_long_edge() {
        let original = encode(&gradient(400, 800), ImageFormat::Jpeg);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert_eq!(dimensions(&normalized.bytes), (192, 384));
    }

    #[test]
    fn small_png_is_reencoded_without_upscaling() {
        let original = encode(&gradient(120, 60), ImageFormat::Png);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert!(!normalized.passthrough);
        assert_eq!(image::guess_format(&normalized.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dimensions(&normalized.bytes), (120, 60));
    }

    #[test]
    fn jpeg_over_byte_cap_is_recompressed() {
        let original = encode(&gradient(200, 200), ImageFormat::Jpeg);
        let opts = NormalizeOptions { max_bytes: original.len() - 1, ..OPTS };
        let normalized = normalize(&original, &opts).unwrap();
        assert!(!normalized.passthrough);
    }

    #[test]
    fn data_url_wraps_base64() {
        let original = encode(&gradient(10, 10), ImageFormat::Jpeg);
        let normalized = normalize(&original, &OPTS).unwrap();
        assert_eq!(normalized.data_url, format!("data:image/jpeg;base64,{}", normalized.base64));
        let decoded = base64::engine::general_purpose::STANDARD.decode(&normalized.base64).unwrap();
        assert_eq!(decoded, normalized.bytes);
        assert!((normalized.size_kb - original.len() as f64 / 1024.0).abs() < f64::EPSILON);
    }

    #[test]
    fn garbage_is_an_image_processing_error() {
        let err = normalize(b"definitely not an image", &OPTS).unwrap_err();
        assert!(matches!(err, AnalyzeError::ImageProcessing(_)));
    }

    #[test]
    fn truncated_jpeg_is_an_image_processing_error() {
        let original = encode(&gradient(600, 600), ImageFormat::Jpeg);
        let err = normalize(&original[..64], &OPTS).unwrap_err();
        assert!(matches!(err, AnalyzeError::ImageProcessing(_)));
    }
}
