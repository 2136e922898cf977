//! Response normalisation: pull an image or text out of a provider reply.
//!
//! Multimodal chat APIs have not converged on one response shape. Depending
//! on vendor and mode, a generated image may arrive as
//!
//! - an entry in a dedicated `message.images` list (OpenRouter),
//! - a typed part in `message.content` / `content.parts` (OpenAI-style
//!   `image_url`, `image_base64`, Gemini `inlineData`),
//! - a text part whose value *is* a data URL or raw base64,
//! - or somewhere undocumented.
//!
//! [`extract_image`] tries the known [`ResponseShape`]s in a fixed priority
//! order and validates whatever it finds before accepting it. A remote URL is
//! returned as [`ImageSource::Remote`] for the caller to fetch; everything
//! else is decoded into an [`ImageRef`] here.

use crate::error::StorybookError;
use crate::image_ref::{
    decode_base64, image_mime, is_image_data_url, is_remote_url, sniff_mime, split_data_url,
    ImageRef,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Field names that carry a base64 payload.
const BASE64_FIELDS: [&str; 5] = ["b64_json", "image_base64", "base64", "data", "bytes"];
/// Field names that carry a MIME type.
const MIME_FIELDS: [&str; 4] = ["mime_type", "mimeType", "media_type", "content_type"];
/// Gemini-style inline blobs.
const INLINE_FIELDS: [&str; 2] = ["inline_data", "inlineData"];
/// Part `type` values that denote an image.
const IMAGE_PART_TYPES: [&str; 5] = ["image", "image_base64", "output_image", "input_image", "image_url"];

/// Shortest text part we will consider as raw base64 image data.
const MIN_RAW_BASE64_LEN: usize = 64;

static RE_EMBEDDED_DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:(image/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/]+={0,2})").unwrap()
});

static RE_CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^```(?:[A-Za-z0-9_+-]*[ \t]*\n|json\b)?\s*(.*?)\s*```$").unwrap()
});

/// The known places an image can hide, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `message.images[]`.
    ImageList,
    /// `message.content[]` / `content.parts[]`, text parts last.
    ContentParts,
    /// Regex scan of the serialised payload.
    RawScan,
}

impl ResponseShape {
    pub const PRIORITY: [ResponseShape; 3] = [
        ResponseShape::ImageList,
        ResponseShape::ContentParts,
        ResponseShape::RawScan,
    ];

    fn find<'a>(self, choice: &'a Value, scratch: &'a mut String) -> Option<Candidate<'a>> {
        match self {
            ResponseShape::ImageList => find_in_image_list(choice),
            ResponseShape::ContentParts => find_in_content_parts(choice),
            ResponseShape::RawScan => {
                *scratch = serde_json::to_string(choice).ok()?;
                find_in_raw_text(scratch)
            }
        }
    }
}

/// Where the extracted image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Decoded, ready to use.
    Inline(ImageRef),
    /// Only a URL was returned; it must be fetched.
    Remote(String),
}

/// An unvalidated hit.
#[derive(Debug)]
enum Candidate<'a> {
    DataUrl(&'a str),
    Base64 {
        mime: Option<&'a str>,
        payload: &'a str,
    },
    Remote(&'a str),
}

/// Select the first choice (`choices[0]`) or candidate (`candidates[0]`).
///
/// A value that already looks like a choice (has `message` or `content`) is
/// returned unchanged.
pub fn first_choice(response: &Value) -> Result<&Value, StorybookError> {
    for key in ["choices", "candidates"] {
        if let Some(list) = response.get(key).and_then(Value::as_array) {
            return list.first().ok_or(StorybookError::NoChoices);
        }
    }
    if response.get("message").is_some() || response.get("content").is_some() {
        return Ok(response);
    }
    Err(StorybookError::NoChoices)
}

/// Extract one image from a choice, trying each [`ResponseShape`] in order.
///
/// The first shape that yields a candidate decides the outcome: a candidate
/// that fails validation is an error, not a reason to keep looking.
pub fn extract_image(choice: &Value) -> Result<(ImageSource, ResponseShape), StorybookError> {
    let mut scratch = String::new();
    for shape in ResponseShape::PRIORITY {
        if let Some(candidate) = shape.find(choice, &mut scratch) {
            debug!("Image found via {:?}", shape);
            return accept(candidate).map(|source| (source, shape));
        }
    }
    Err(StorybookError::NoImageInResponse {
        context: "no image list, image part, or embedded data URL".into(),
    })
}

/// Extract the reply text from a choice, with any Markdown fence removed.
pub fn extract_text(choice: &Value) -> Result<String, StorybookError> {
    let raw = find_text(choice).ok_or(StorybookError::NoTextInResponse)?;
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err(StorybookError::NoTextInResponse);
    }
    Ok(text)
}

/// Remove one wrapping triple-backtick fence (with optional language tag).
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_CODE_FENCE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// A bounded rendering of a payload for logs.
pub fn preview(value: &Value) -> String {
    const MAX: usize = 2000;
    let s = value.to_string();
    if s.len() <= MAX {
        return s;
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes total)", &s[..end], s.len())
}

// ── Shape 1: dedicated image list ────────────────────────────────────────

fn find_in_image_list(choice: &Value) -> Option<Candidate<'_>> {
    let images = message(choice)
        .and_then(|m| m.get("images"))
        .or_else(|| choice.get("images"))
        .and_then(Value::as_array)?;

    images.iter().find_map(|entry| {
        if let Some(s) = entry.as_str() {
            return classify_str(s, None);
        }
        url_field(entry)
            .and_then(|url| classify_str(url, mime_of(entry)))
            .or_else(|| base64_field(entry))
            .or_else(|| inline_blob(entry))
    })
}

// ── Shape 2: content parts ───────────────────────────────────────────────

fn find_in_content_parts(choice: &Value) -> Option<Candidate<'_>> {
    let msg = message(choice)?;
    let content = msg.get("content").or_else(|| msg.get("parts"))?;

    if let Some(text) = content.as_str() {
        return classify_text(text);
    }
    let parts = content.as_array()?;

    parts
        .iter()
        .find_map(structured_image_part)
        .or_else(|| parts.iter().find_map(|p| part_text(p).and_then(classify_text)))
}

fn structured_image_part(part: &Value) -> Option<Candidate<'_>> {
    let is_image_type = part
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| IMAGE_PART_TYPES.contains(&t));

    if is_image_type {
        if let Some(c) = base64_field(part) {
            return Some(c);
        }
        if let Some(url) = url_field(part).or_else(|| part.get("image").and_then(Value::as_str)) {
            return classify_str(url, mime_of(part));
        }
    }
    if let Some(url) = image_url_field(part) {
        return classify_str(url, mime_of(part));
    }
    inline_blob(part)
}

/// A text part whose value is itself image data.
fn classify_text(text: &str) -> Option<Candidate<'_>> {
    let t = text.trim();
    if is_image_data_url(t) {
        return Some(Candidate::DataUrl(t));
    }
    if looks_like_raw_image_base64(t) {
        return Some(Candidate::Base64 {
            mime: None,
            payload: t,
        });
    }
    None
}

fn looks_like_raw_image_base64(t: &str) -> bool {
    if t.len() < MIN_RAW_BASE64_LEN {
        return false;
    }
    decode_base64(t)
        .ok()
        .is_some_and(|bytes| sniff_mime(&bytes).is_some())
}

// ── Shape 3: raw scan ────────────────────────────────────────────────────

fn find_in_raw_text(text: &str) -> Option<Candidate<'_>> {
    RE_EMBEDDED_DATA_URL
        .find(text)
        .map(|m| Candidate::DataUrl(m.as_str()))
}

// ── Validation ───────────────────────────────────────────────────────────

fn accept(candidate: Candidate<'_>) -> Result<ImageSource, StorybookError> {
    let (declared, payload) = match candidate {
        Candidate::Remote(url) => return Ok(ImageSource::Remote(url.trim().to_string())),
        Candidate::DataUrl(url) => {
            let (mime, payload) =
                split_data_url(url.trim()).ok_or_else(|| StorybookError::MalformedImageData {
                    detail: "not a base64 data URL".into(),
                })?;
            if !mime.starts_with("image/") {
                return Err(StorybookError::MalformedImageData {
                    detail: format!("data URL declares non-image type '{mime}'"),
                });
            }
            (Some(mime), payload)
        }
        Candidate::Base64 { mime, payload } => (mime, payload),
    };

    let malformed = |detail| StorybookError::MalformedImageData { detail };
    let data = decode_base64(payload).map_err(malformed)?;
    let mime = image_mime(&data, declared).map_err(malformed)?;
    Ok(ImageSource::Inline(ImageRef::new(mime, data)))
}

// ── Field helpers ────────────────────────────────────────────────────────

/// The message object of a chat choice, or the `content` object of a Gemini
/// candidate.
fn message(choice: &Value) -> Option<&Value> {
    choice
        .get("message")
        .or_else(|| choice.get("delta"))
        .or_else(|| choice.get("content").filter(|c| c.is_object()))
        .or_else(|| choice.get("content").map(|_| choice))
}

/// Data URL, remote URL, or (rarely) raw base64 stuffed into a URL field.
fn classify_str<'a>(s: &'a str, mime: Option<&'a str>) -> Option<Candidate<'a>> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else if t.starts_with("data:") {
        Some(Candidate::DataUrl(t))
    } else if is_remote_url(t) {
        Some(Candidate::Remote(t))
    } else {
        Some(Candidate::Base64 { mime, payload: t })
    }
}

/// `image_url` as a string or as `{ "url": … }`.
fn image_url_field(v: &Value) -> Option<&str> {
    let field = v.get("image_url")?;
    field
        .as_str()
        .or_else(|| field.get("url").and_then(Value::as_str))
}

fn url_field(v: &Value) -> Option<&str> {
    image_url_field(v).or_else(|| v.get("url").and_then(Value::as_str))
}

fn mime_of(v: &Value) -> Option<&str> {
    MIME_FIELDS
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .filter(|m| !m.is_empty())
}

fn base64_field(v: &Value) -> Option<Candidate<'_>> {
    BASE64_FIELDS.iter().find_map(|k| {
        let payload = v.get(*k).and_then(Value::as_str)?;
        if payload.trim().is_empty() {
            return None;
        }
        if payload.trim_start().starts_with("data:") {
            return Some(Candidate::DataUrl(payload));
        }
        Some(Candidate::Base64 {
            mime: mime_of(v),
            payload,
        })
    })
}

fn inline_blob(v: &Value) -> Option<Candidate<'_>> {
    INLINE_FIELDS
        .iter()
        .find_map(|k| v.get(*k))
        .and_then(base64_field)
}

fn part_text(part: &Value) -> Option<&str> {
    part.as_str().or_else(|| part.get("text").and_then(Value::as_str))
}

fn find_text(choice: &Value) -> Option<&str> {
    let msg = message(choice)?;
    let content = msg.get("content").or_else(|| msg.get("parts"))?;

    if let Some(text) = content.as_str() {
        return Some(text).filter(|t| !t.trim().is_empty());
    }
    content.as_array()?.iter().find_map(|part| {
        let typed_text = match part.get("type").and_then(Value::as_str) {
            Some("text") | Some("output_text") | None => part_text(part),
            Some(_) => None,
        };
        typed_text.filter(|t| !t.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    fn png(color: [u8; 4]) -> ImageRef {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba(color)));
        ImageRef::from_image(&img).unwrap()
    }

    fn inline(source: ImageSource) -> ImageRef {
        match source {
            ImageSource::Inline(img) => img,
            ImageSource::Remote(url) => panic!("expected inline, got remote {url}"),
        }
    }

    #[test]
    fn image_list_data_url() {
        let img = png([255, 0, 0, 255]);
        let choice = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "images": [{ "type": "image_url", "image_url": { "url": img.to_data_url() } }]
            }
        });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ImageList);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn image_list_base64_field_sniffs_mime() {
        let img = png([4, 5, 6, 255]);
        let choice = json!({ "message": { "images": [{ "b64_json": img.to_base64() }] } });
        let (source, _) = extract_image(&choice).unwrap();
        assert_eq!(inline(source), img);
    }

    #[test]
    fn content_wins_over_conflicting_declared_mime() {
        let img = png([4, 5, 6, 255]);
        let choice = json!({ "message": { "images": [
            { "image_base64": img.to_base64(), "mime_type": "image/webp" }
        ]}});
        let (source, _) = extract_image(&choice).unwrap();
        assert_eq!(inline(source).mime_type(), "image/png");
    }

    #[test]
    fn valid_base64_that_is_not_an_image_is_rejected() {
        for choice in [
            json!({ "message": { "images": [{ "b64_json": "AAECAwQF" }] } }),
            json!({ "message": { "images": ["data:image/png;base64,AAECAwQF"] } }),
            json!({ "message": { "content": [
                { "type": "image_base64", "image_base64": "AAECAwQF", "mime_type": "image/jpeg" }
            ]}}),
        ] {
            assert!(
                matches!(extract_image(&choice), Err(StorybookError::MalformedImageData { .. })),
                "accepted non-image bytes from {choice}"
            );
        }
    }

    #[test]
    fn image_list_wins_over_content_parts() {
        let list_img = png([0, 255, 0, 255]);
        let part_img = png([0, 0, 255, 255]);
        let choice = json!({
            "message": {
                "images": [{ "image_url": { "url": list_img.to_data_url() } }],
                "content": [{ "type": "image_url", "image_url": { "url": part_img.to_data_url() } }]
            }
        });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ImageList);
        assert_eq!(inline(source), list_img);
    }

    #[test]
    fn content_part_image_base64() {
        let img = png([30, 30, 200, 255]);
        let choice = json!({
            "message": { "content": [
                { "type": "text", "text": "here you go" },
                { "type": "image_base64", "image_base64": img.to_base64(), "mime_type": "image/png" }
            ]}
        });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ContentParts);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn content_part_generic_image_url() {
        let img = png([9, 9, 9, 255]);
        let choice = json!({ "message": { "content": [{ "image_url": img.to_data_url() }] } });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ContentParts);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn gemini_inline_data_part() {
        let img = png([1, 2, 3, 255]);
        let candidate = json!({
            "content": { "role": "model", "parts": [
                { "text": "Sure!" },
                { "inlineData": { "mimeType": "image/png", "data": img.to_base64() } }
            ]}
        });
        let (source, shape) = extract_image(&candidate).unwrap();
        assert_eq!(shape, ResponseShape::ContentParts);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn structured_part_beats_earlier_text_part() {
        let text_img = png([10, 10, 10, 255]);
        let part_img = png([20, 20, 20, 255]);
        let choice = json!({ "message": { "content": [
            { "type": "text", "text": text_img.to_data_url() },
            { "type": "image_url", "image_url": { "url": part_img.to_data_url() } }
        ]}});
        let (source, _) = extract_image(&choice).unwrap();
        assert_eq!(inline(source), part_img);
    }

    #[test]
    fn text_part_holding_data_url() {
        let img = png([50, 60, 70, 255]);
        let choice = json!({ "message": { "content": [{ "type": "text", "text": format!("  {}\n", img.to_data_url()) }] } });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ContentParts);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn text_part_holding_raw_base64_sniffs_mime() {
        let img = png([50, 60, 70, 255]);
        let choice = json!({ "message": { "content": [{ "type": "text", "text": img.to_base64() }] } });
        let (source, _) = extract_image(&choice).unwrap();
        let got = inline(source);
        assert_eq!(got.mime_type(), "image/png");
        assert_eq!(got.data(), img.data());
    }

    #[test]
    fn string_content_data_url() {
        let img = png([5, 5, 5, 255]);
        let choice = json!({ "message": { "content": img.to_data_url() } });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::ContentParts);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn ordinary_text_is_not_an_image() {
        let choice = json!({ "message": { "content": "Here is your dragon. I hope you like it!" } });
        assert!(matches!(
            extract_image(&choice),
            Err(StorybookError::NoImageInResponse { .. })
        ));
    }

    #[test]
    fn raw_scan_finds_undocumented_nesting() {
        let img = png([7, 7, 7, 255]);
        let choice = json!({
            "message": { "content": "" },
            "extra": { "vendor": { "output": [{ "blob": img.to_data_url() }] } }
        });
        let (source, shape) = extract_image(&choice).unwrap();
        assert_eq!(shape, ResponseShape::RawScan);
        assert_eq!(inline(source), img);
    }

    #[test]
    fn remote_url_is_returned_for_fetching() {
        let choice = json!({ "message": { "images": [{ "image_url": { "url": "https://cdn.example/img.png" } }] } });
        let (source, _) = extract_image(&choice).unwrap();
        assert_eq!(source, ImageSource::Remote("https://cdn.example/img.png".into()));
    }

    #[test]
    fn malformed_base64_is_rejected_not_skipped() {
        let img = png([1, 1, 1, 255]);
        let choice = json!({
            "message": {
                "images": [{ "b64_json": "not*valid*base64" }],
                "content": [{ "type": "image_url", "image_url": { "url": img.to_data_url() } }]
            }
        });
        assert!(matches!(
            extract_image(&choice),
            Err(StorybookError::MalformedImageData { .. })
        ));
    }

    #[test]
    fn non_image_data_url_is_rejected() {
        let choice = json!({ "message": { "images": ["data:text/plain;base64,AAEC"] } });
        assert!(matches!(
            extract_image(&choice),
            Err(StorybookError::MalformedImageData { .. })
        ));
    }

    #[test]
    fn first_choice_variants() {
        let chat = json!({ "choices": [{ "message": { "content": "a" } }, { "message": { "content": "b" } }] });
        assert_eq!(first_choice(&chat).unwrap()["message"]["content"], "a");

        let gemini = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert!(first_choice(&gemini).is_ok());

        assert!(matches!(first_choice(&json!({ "choices": [] })), Err(StorybookError::NoChoices)));
        assert!(matches!(first_choice(&json!({ "id": "x" })), Err(StorybookError::NoChoices)));
    }

    #[test]
    fn text_from_string_and_parts() {
        let s = json!({ "message": { "content": "hello" } });
        assert_eq!(extract_text(&s).unwrap(), "hello");

        let parts = json!({ "message": { "content": [
            { "type": "image_url", "image_url": { "url": "https://x/y.png" } },
            { "type": "output_text", "text": "world" }
        ]}});
        assert_eq!(extract_text(&parts).unwrap(), "world");

        let gemini = json!({ "content": { "parts": [{ "text": "from gemini" }] } });
        assert_eq!(extract_text(&gemini).unwrap(), "from gemini");

        let empty = json!({ "message": { "content": "   " } });
        assert!(matches!(extract_text(&empty), Err(StorybookError::NoTextInResponse)));
    }

    #[test]
    fn text_is_fence_stripped() {
        let choice = json!({ "message": { "content": "```json\n[{\"a\":1}]\n```" } });
        assert_eq!(extract_text(&choice).unwrap(), "[{\"a\":1}]");
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```JSON\n{\"x\": 1}\n```"), "{\"x\": 1}");
        assert_eq!(strip_code_fences("```json{\"x\": 1}```"), "{\"x\": 1}");
        assert_eq!(strip_code_fences("  plain text  "), "plain text");
        assert_eq!(strip_code_fences("```javascript\nlet a;\n```"), "let a;");
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let big = json!({ "data": "x".repeat(5000) });
        let p = preview(&big);
        assert!(p.len() < 2100);
        assert!(p.contains("bytes total"));
    }
}
