//! Still frame encoding for the analysis payload.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

/// Prefix of the `image_base64` payload.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Encode `frame` as JPEG at `quality` (1..=100).
///
/// # Errors
/// Returns an error if the encoder rejects the frame.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    frame.write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

/// Encode `frame` as a `data:image/jpeg;base64,...` URL.
///
/// # Errors
/// Returns an error if the encoder rejects the frame.
pub fn encode_jpeg_data_url(frame: &RgbImage, quality: u8) -> Result<String, image::ImageError> {
    let jpeg = encode_jpeg(frame, quality)?;
    Ok(format!("{JPEG_DATA_URL_PREFIX}{}", STANDARD.encode(jpeg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::Rgb;

    #[test]
    fn test_data_url_decodes_to_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([10, 20, 30]));
        let url = encode_jpeg_data_url(&frame, 85).unwrap_or_default();
        assert!(url.starts_with(JPEG_DATA_URL_PREFIX));

        let payload = &url[JPEG_DATA_URL_PREFIX.len()..];
        let bytes = STANDARD.decode(payload).unwrap_or_default();
        // JPEG SOI marker.
        assert_eq!(bytes.get(..2), Some([0xFF, 0xD8].as_slice()));

        let decoded = image::load_from_memory(&bytes).map(|img| (img.width(), img.height()));
        assert_eq!(decoded.ok(), Some((16, 8)));
    }

    #[test]
    fn test_quality_affects_size() {
        let frame = RgbImage::from_fn(64, 64, |x, y| {
            let ramp = |v: u32| u8::try_from(v * 4).unwrap_or(u8::MAX);
            Rgb([ramp(x), ramp(y), 128])
        });
        let low = encode_jpeg(&frame, 10).map(|b| b.len()).unwrap_or_default();
        let high = encode_jpeg(&frame, 95).map(|b| b.len()).unwrap_or_default();
        assert!(low > 0);
        assert!(low < high);
    }
}
