//! Canvas compositing: stack page images and wrapped captions into one picture.
//!
//! ## Two passes
//!
//! The canvas must be allocated at its final size before anything is drawn,
//! and that size depends on every page's scaled image height and wrapped line
//! count. [`measure_layout`] therefore computes a [`StorybookLayout`] first;
//! [`render_storybook`] then draws from that same layout, so the draw pass can
//! never disagree with the measurement pass about where a line breaks.
//!
//! ## Geometry
//!
//! ```text
//! height = padding
//!        + Σ (image_h + spacing + lines × line_height + 2 × spacing)
//!        − spacing
//!        + padding
//! ```
//!
//! where `image_h = content_width × natural_h / natural_w`.

use crate::config::ComposeConfig;
use crate::error::StorybookError;
use crate::pipeline::wrap::{wrap_caption, TextMeasure};
use crate::story::StoryPage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use std::path::Path;
use tracing::debug;

/// Measures and draws caption text.
pub trait CaptionFont: TextMeasure + Send + Sync {
    /// Draw one line with its top edge at `y`.
    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, color: Rgba<u8>);
}

/// Layout of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// Image height after scaling to the content width.
    pub image_height: f64,
    /// Wrapped caption lines (at least one).
    pub lines: Vec<String>,
}

/// Layout of the whole picture.
#[derive(Debug, Clone, PartialEq)]
pub struct StorybookLayout {
    pub canvas_width: u32,
    /// Exact (unrounded) height from the sizing formula.
    pub total_height: f64,
    /// `total_height` rounded to whole pixels.
    pub canvas_height: u32,
    pub pages: Vec<PageLayout>,
}

/// Height of an image scaled to `content_width`, preserving aspect ratio.
pub fn rendered_height(content_width: u32, natural_width: u32, natural_height: u32) -> f64 {
    content_width as f64 * (natural_height as f64 / natural_width.max(1) as f64)
}

/// First pass: size every page and the canvas.
///
/// `dimensions[i]` is the natural `(width, height)` of page `i`'s image and
/// `captions[i]` its caption.
pub fn measure_layout(
    dimensions: &[(u32, u32)],
    captions: &[&str],
    config: &ComposeConfig,
    measure: &dyn TextMeasure,
) -> StorybookLayout {
    let spacing = config.spacing as f64;
    let line_height = config.line_height as f64;
    let max_width = config.content_width as f32;

    let mut total = config.padding as f64;
    let mut pages = Vec::with_capacity(dimensions.len());

    for (&(w, h), caption) in dimensions.iter().zip(captions) {
        let image_height = rendered_height(config.content_width, w, h);
        let lines = wrap_caption(caption, max_width, measure);

        total += image_height + spacing;
        total += lines.len() as f64 * line_height;
        total += spacing * 2.0;

        pages.push(PageLayout { image_height, lines });
    }
    total -= spacing;
    total += config.padding as f64;

    StorybookLayout {
        canvas_width: config.canvas_width(),
        total_height: total,
        canvas_height: total.round().max(1.0) as u32,
        pages,
    }
}

/// Decode every page image. All must succeed before layout can begin.
pub fn decode_pages(pages: &[StoryPage]) -> Result<Vec<DynamicImage>, StorybookError> {
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            page.image.decode().map_err(|e| StorybookError::ImageDecode {
                page: i + 1,
                detail: e.to_string(),
            })
        })
        .collect()
}

/// Second pass: paint the background, images, and captions.
pub fn render_storybook(
    pages: &[StoryPage],
    config: &ComposeConfig,
    font: &dyn CaptionFont,
) -> Result<(RgbaImage, StorybookLayout), StorybookError> {
    if pages.is_empty() {
        return Err(StorybookError::EmptyStorybook);
    }

    let images = decode_pages(pages)?;
    let dimensions: Vec<(u32, u32)> = images.iter().map(|img| img.dimensions()).collect();
    let captions: Vec<&str> = pages.iter().map(|p| p.story.as_str()).collect();
    let layout = measure_layout(&dimensions, &captions, config, font);

    debug!(
        "Compositing {} pages onto {}x{} canvas",
        pages.len(),
        layout.canvas_width,
        layout.canvas_height
    );

    let mut canvas = RgbaImage::from_pixel(layout.canvas_width, layout.canvas_height, config.background);
    let x = config.padding as i32;
    let spacing = config.spacing as f64;
    let line_height = config.line_height as f64;
    let mut y = config.padding as f64;

    for (img, page) in images.iter().zip(&layout.pages) {
        let target_h = page.image_height.round().max(1.0) as u32;
        let scaled = imageops::resize(&img.to_rgba8(), config.content_width, target_h, FilterType::Triangle);
        imageops::overlay(&mut canvas, &scaled, x as i64, y.round() as i64);
        y += page.image_height + spacing;

        for line in &page.lines {
            font.draw(&mut canvas, line, x, y.round() as i32, config.text_color);
            y += line_height;
        }
        y += spacing * 2.0;
    }

    Ok((canvas, layout))
}

/// Flatten onto RGB and encode as JPEG.
pub fn encode_jpeg(canvas: RgbaImage, quality: u8) -> Result<Vec<u8>, StorybookError> {
    let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| StorybookError::ImageEncode(e.to_string()))?;
    debug!("Encoded storybook → {} bytes JPEG (q={})", buf.len(), quality);
    Ok(buf)
}

// ── TrueType captions ────────────────────────────────────────────────────

/// Caption font backed by a TrueType/OpenType file, rasterised with `rusttype`.
pub struct RustTypeFont {
    font: Font<'static>,
    px: f32,
}

impl RustTypeFont {
    pub fn from_bytes(bytes: Vec<u8>, px: f32) -> Result<Self, StorybookError> {
        let font = Font::try_from_vec(bytes).ok_or_else(|| StorybookError::FontLoad {
            path: "<memory>".into(),
            detail: "not a TrueType/OpenType font".into(),
        })?;
        Ok(Self { font, px })
    }

    pub fn from_path(path: impl AsRef<Path>, px: f32) -> Result<Self, StorybookError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| StorybookError::FontLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_bytes(bytes, px).map_err(|e| match e {
            StorybookError::FontLoad { detail, .. } => StorybookError::FontLoad {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }
}

impl TextMeasure for RustTypeFont {
    /// Sum of advance widths plus kerning, like a canvas `measureText`.
    fn measure(&self, text: &str) -> f32 {
        let scale = Scale::uniform(self.px);
        let mut width = 0.0;
        let mut prev = None;
        for ch in text.chars() {
            let glyph = self.font.glyph(ch).scaled(scale);
            if let Some(p) = prev {
                width += self.font.pair_kerning(scale, p, glyph.id());
            }
            width += glyph.h_metrics().advance_width;
            prev = Some(glyph.id());
        }
        width
    }
}

impl CaptionFont for RustTypeFont {
    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, color: Rgba<u8>) {
        let scale = Scale::uniform(self.px);
        let v_metrics = self.font.v_metrics(scale);
        let baseline = point(x as f32, y as f32 + v_metrics.ascent);

        for glyph in self.font.layout(text, scale, baseline) {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = gx as i32 + bb.min.x;
                let py = gy as i32 + bb.min.y;
                if px < 0 || py < 0 || px as u32 >= canvas.width() || py as u32 >= canvas.height() {
                    return;
                }
                blend(canvas.get_pixel_mut(px as u32, py as u32), color, coverage);
            });
        }
    }
}

/// Source-over blend of `color` at `coverage` onto an opaque pixel.
fn blend(dst: &mut Rgba<u8>, color: Rgba<u8>, coverage: f32) {
    let a = coverage.clamp(0.0, 1.0) * (color.0[3] as f32 / 255.0);
    if a <= 0.0 {
        return;
    }
    let inv = 1.0 - a;
    for c in 0..3 {
        dst.0[c] = (color.0[c] as f32 * a + dst.0[c] as f32 * inv).round() as u8;
    }
    dst.0[3] = 255;
}
