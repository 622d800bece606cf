//! Image encoding: raw image bytes → base64 [`ExtractedImage`] with a format tag.
//!
//! Every backend receives images as base64 strings, either bare (Ollama),
//! as data URIs (OpenAI) or as typed source blocks (Anthropic). The format
//! tag drives the MIME type, so it is sniffed from the bytes rather than
//! trusted from a file name inside a container.

use crate::output::ExtractedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Formats every backend accepts.
const TRANSPORTABLE: &[&str] = &["png", "jpeg", "jpg", "gif", "webp"];

/// Sniff the format tag of `bytes`, if the magic number is recognised.
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        _ => None,
    }
}

/// Base64-wrap `bytes` with an explicit format tag.
pub fn encode_bytes(bytes: &[u8], format: &str) -> ExtractedImage {
    let data = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", format, data.len());
    ExtractedImage {
        data,
        format: format.to_ascii_lowercase(),
    }
}

/// Encode an image blob pulled out of a container document.
///
/// Returns `None` for payloads no backend can display (EMF/WMF vector
/// drawings, TIFF, unknown bytes).
pub fn encode_embedded(bytes: &[u8]) -> Option<ExtractedImage> {
    let format = sniff_format(bytes)?;
    if !TRANSPORTABLE.contains(&format) {
        debug!("Skipping embedded {} image ({} bytes)", format, bytes.len());
        return None;
    }
    Some(encode_bytes(bytes, format))
}

/// Encode a decoded image as a base64 PNG.
///
/// PNG is lossless, so figure text and annotations stay crisp.
pub fn encode_png(img: &DynamicImage) -> Result<ExtractedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(encode_bytes(&buf, "png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn tiny_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn encode_png_roundtrips_through_base64() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(data.format, "png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(sniff_format(&decoded), Some("png"));
    }

    #[test]
    fn sniffs_png_and_jpeg() {
        assert_eq!(sniff_format(&tiny_png()), Some("png"));
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some("jpeg"));
        assert_eq!(sniff_format(b"GIF89a......"), Some("gif"));
        assert_eq!(sniff_format(b"not an image"), None);
    }

    #[test]
    fn embedded_vector_drawings_are_skipped() {
        // EMF header record type 1
        let emf = [1u8, 0, 0, 0, 0x6C, 0, 0, 0, 0, 0, 0, 0];
        assert!(encode_embedded(&emf).is_none());
        assert!(encode_embedded(&tiny_png()).is_some());
    }

    #[test]
    fn explicit_format_is_lowercased() {
        let img = encode_bytes(b"abc", "JPG");
        assert_eq!(img.format, "jpg");
        assert_eq!(img.data, "YWJj");
    }
}
