//! Page-image encoding for vision requests.
//!
//! Page images reach the pipeline in two shapes: data URLs produced by the
//! browser (`data:image/png;base64,...`) and image files on disk handed to
//! the CLI. Both are normalised here into bare base64 plus a MIME type.

use crate::error::AiContractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A page image ready to attach to a vision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub mime_type: &'static str,
    pub base64: String,
}

/// Strip an optional data-URL prefix, validate the payload and sniff its type.
pub fn normalize_page_image(raw: &str) -> Result<PageImage, AiContractError> {
    let payload = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    }
    .trim();

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| AiContractError::InvalidImage(e.to_string()))?;
    if bytes.is_empty() {
        return Err(AiContractError::InvalidImage("image is empty".into()));
    }

    Ok(PageImage {
        mime_type: sniff_mime(&bytes),
        base64: payload.to_string(),
    })
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

/// Encode a decoded image as base64 PNG.
///
/// PNG is lossless; JPEG artefacts on rendered text hurt transcription.
pub fn encode_png(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

/// Load a page image file (PNG or JPEG) and return it as base64 PNG.
pub fn encode_image_file(path: &Path) -> Result<String, image::ImageError> {
    let img = image::open(path)?;
    encode_png(&img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let b64 = encode_png(&red_square()).expect("encode should succeed");
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        assert!(decoded.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let b64 = encode_png(&red_square()).unwrap();
        let img = normalize_page_image(&format!("data:image/png;base64,{b64}")).unwrap();
        assert_eq!(img.base64, b64);
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn jpeg_is_detected() {
        let jpeg = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0, 0, 0]);
        assert_eq!(normalize_page_image(&jpeg).unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn invalid_base64_is_a_contract_error() {
        assert!(matches!(
            normalize_page_image("not base64!!"),
            Err(AiContractError::InvalidImage(_))
        ));
    }

    #[test]
    fn image_file_round_trips_to_png() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.png");
        red_square().save(&path).unwrap();
        let b64 = encode_image_file(&path).unwrap();
        assert!(!b64.is_empty());
    }
}
