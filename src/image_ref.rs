//! Self-contained image references: `(MIME type, bytes)` ↔ data URL.
//!
//! Multimodal chat APIs accept and return images as base64 data URLs
//! embedded in the JSON body. [`ImageRef`] keeps the decoded bytes and the
//! declared MIME type; [`ImageRef::to_data_url`] and
//! [`ImageRef::from_data_url`] convert to and from the embeddable form and
//! round-trip byte-for-byte.
//!
//! Base64 payloads are checked against a strict character-set pattern after
//! whitespace removal before decoding, so a truncated or mangled payload is
//! rejected here instead of failing later inside an image decoder.

use crate::error::StorybookError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// MIME type assumed when a payload arrives without one.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

static RE_DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^data:([A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+)((?:;[^;,]*)*);base64,(.*)$").unwrap()
});

static RE_BASE64: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());

/// An image held in memory with its MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRef {
    mime_type: String,
    data: Vec<u8>,
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl ImageRef {
    /// Wrap raw bytes with an explicit MIME type. No validation is done.
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Wrap raw bytes, sniffing the MIME type from the magic bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, StorybookError> {
        let mime = sniff_mime(&data).ok_or_else(|| StorybookError::InvalidImage {
            detail: "unrecognised image format".into(),
        })?;
        Ok(Self::new(mime, data))
    }

    /// Decode a base64 payload declared as `mime_type`.
    pub fn from_base64(mime_type: &str, payload: &str) -> Result<Self, StorybookError> {
        let data =
            decode_base64(payload).map_err(|detail| StorybookError::InvalidImage { detail })?;
        Ok(Self::new(mime_type, data))
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self, StorybookError> {
        let (mime, payload) =
            split_data_url(url.trim()).ok_or_else(|| StorybookError::InvalidDataUrl {
                detail: "expected data:<mime>;base64,<payload>".into(),
            })?;
        let data =
            decode_base64(payload).map_err(|detail| StorybookError::InvalidDataUrl { detail })?;
        Ok(Self::new(mime, data))
    }

    /// Encode a decoded image as PNG.
    pub fn from_image(img: &DynamicImage) -> Result<Self, image::ImageError> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        debug!("Encoded image → {} bytes PNG", buf.len());
        Ok(Self::new(DEFAULT_IMAGE_MIME, buf))
    }

    /// Read an image file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StorybookError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorybookError::InvalidImage {
                detail: format!("{}: {}", path.display(), e),
            })?;
        if data.is_empty() {
            return Err(StorybookError::InvalidImage {
                detail: format!("{} is empty", path.display()),
            });
        }
        Self::from_bytes(data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Standard base64 of the bytes, no line breaks.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// The embeddable `data:` URL form.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Decode the bytes into pixels.
    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory(&self.data)
    }
}

/// Split a data URL into `(mime, payload)` without decoding.
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let caps = RE_DATA_URL.captures(url)?;
    let mime = caps.get(1)?.as_str();
    let payload = caps.get(3)?.as_str();
    Some((mime, payload))
}

/// True if `s` looks like an embeddable image data URL.
pub fn is_image_data_url(s: &str) -> bool {
    split_data_url(s.trim()).is_some_and(|(mime, _)| mime.starts_with("image/"))
}

/// True if `s` is an http(s) URL.
pub fn is_remote_url(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("http://") || s.starts_with("https://")
}

/// Strip whitespace, check the strict base64 alphabet, then decode.
///
/// Returns a human-readable reason on failure.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err("base64 payload is empty".into());
    }
    if !RE_BASE64.is_match(&cleaned) {
        return Err("payload contains characters outside the base64 alphabet".into());
    }
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| format!("base64 decode failed: {e}"))
}

/// MIME type from magic bytes, if the format is one we recognise.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    image::guess_format(data).ok().map(|f| f.to_mime_type())
}

/// MIME type of `data`, which must be a recognised image format.
///
/// The sniffed type is returned even when `declared` disagrees with it.
pub fn image_mime(data: &[u8], declared: Option<&str>) -> Result<&'static str, String> {
    let sniffed = sniff_mime(data).ok_or_else(|| {
        format!("{} decoded bytes are not a recognised image format", data.len())
    })?;
    if let Some(declared) = declared.filter(|d| !d.eq_ignore_ascii_case(sniffed)) {
        debug!("Declared MIME '{}' overridden by content ({})", declared, sniffed);
    }
    Ok(sniffed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_png() -> ImageRef {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        ImageRef::from_image(&img).expect("encode should succeed")
    }

    #[test]
    fn data_url_round_trip_is_byte_identical() {
        let original = red_png();
        let url = original.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        let parsed = ImageRef::from_data_url(&url).expect("valid data URL");
        assert_eq!(parsed, original);
    }

    #[test]
    fn round_trip_arbitrary_bytes_and_mime() {
        let original = ImageRef::new("image/webp", vec![0, 1, 2, 250, 251, 252, 253, 254, 255]);
        let parsed = ImageRef::from_data_url(&original.to_data_url()).unwrap();
        assert_eq!(parsed.mime_type(), "image/webp");
        assert_eq!(parsed.data(), original.data());
    }

    #[test]
    fn data_url_with_parameters() {
        let url = "data:image/jpeg;name=me.jpg;base64,AAEC";
        let parsed = ImageRef::from_data_url(url).unwrap();
        assert_eq!(parsed.mime_type(), "image/jpeg");
        assert_eq!(parsed.data(), &[0, 1, 2]);
    }

    #[test]
    fn rejects_non_base64_data_url() {
        assert!(matches!(
            ImageRef::from_data_url("data:image/png,rawbytes"),
            Err(StorybookError::InvalidDataUrl { .. })
        ));
        assert!(matches!(
            ImageRef::from_data_url("data:image/png;base64,@@@"),
            Err(StorybookError::InvalidDataUrl { .. })
        ));
        assert!(ImageRef::from_data_url("https://example.com/a.png").is_err());
    }

    #[test]
    fn base64_whitespace_is_ignored() {
        assert_eq!(decode_base64("AA\nEC \r\n").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn base64_rejects_bad_alphabet_and_empty() {
        assert!(decode_base64("").is_err());
        assert!(decode_base64("   ").is_err());
        assert!(decode_base64("abc-_def").is_err());
        assert!(decode_base64("A===").is_err());
    }

    #[test]
    fn sniff_png_bytes() {
        let png = red_png();
        assert_eq!(sniff_mime(png.data()), Some("image/png"));
        let sniffed = ImageRef::from_bytes(png.data().to_vec()).unwrap();
        assert_eq!(sniffed.mime_type(), "image/png");
        assert!(ImageRef::from_bytes(b"not an image".to_vec()).is_err());
    }

    #[test]
    fn image_mime_prefers_content_over_declared() {
        let png = red_png();
        assert_eq!(image_mime(png.data(), Some("image/webp")), Ok("image/png"));
        assert_eq!(image_mime(png.data(), None), Ok("image/png"));
        assert!(image_mime(&[0, 1, 2, 3, 4, 5], Some("image/png")).is_err());
    }

    #[test]
    fn decode_gives_pixels() {
        let img = red_png().decode().expect("decodes");
        assert_eq!((img.width(), img.height()), (10, 10));
    }

    #[test]
    fn url_predicates() {
        assert!(is_remote_url("https://cdn.example/x.png"));
        assert!(!is_remote_url("data:image/png;base64,AA=="));
        assert!(is_image_data_url("data:image/png;base64,AAEC"));
        assert!(!is_image_data_url("data:text/plain;base64,AAEC"));
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, red_png().data()).unwrap();
        let img = tokio_test::block_on(ImageRef::from_path(&path)).unwrap();
        assert_eq!(img.mime_type(), "image/png");

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(tokio_test::block_on(ImageRef::from_path(&empty)).is_err());
    }
}
