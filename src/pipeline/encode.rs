//! Downscale, recompress and encode frames for transport.

use std::io::Cursor;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageResult;

/// A recompressed JPEG and its final dimensions.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes`, shrink to `target_width` (aspect preserved, never upscaled)
/// and re-encode as JPEG at `quality` (1-100).
pub fn downscale_jpeg(bytes: &[u8], target_width: u32, quality: u8) -> ImageResult<ProcessedImage> {
    let decoded = image::load_from_memory(bytes)?;

    let resized = if target_width > 0 && decoded.width() > target_width {
        let height = (u64::from(decoded.height()) * u64::from(target_width)
            / u64::from(decoded.width()))
        .max(1) as u32;
        decoded.resize_exact(target_width, height, FilterType::Triangle)
    } else {
        decoded
    };

    // JPEG carries no alpha channel
    let rgb = resized.to_rgb8();
    let mut jpeg = Cursor::new(Vec::new());
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        encoder.encode_image(&rgb)?;
    }

    Ok(ProcessedImage {
        jpeg: jpeg.into_inner(),
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// `data:<mime>;base64,<payload>`
pub fn to_data_uri(bytes: &[u8], mime: &str) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{payload}")
}
