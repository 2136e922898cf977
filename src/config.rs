//! Configuration types for storybook generation and export.
//!
//! [`GeneratorConfig`] holds everything the Generation Client needs: endpoint,
//! credentials, models, timeouts. It is built once at start-up and handed to
//! [`crate::generate::StoryGenerator::new`]; nothing in the library reads the
//! process environment after that point.
//!
//! [`ComposeConfig`] holds the layout constants of the exported picture.

use crate::error::StorybookError;
use crate::progress::ProgressCallback;
use image::Rgba;
use std::fmt;
use std::time::Duration;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Model used for avatar stylisation and page illustrations.
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image-preview";
/// Model used when the story script is authored by the LLM.
pub const DEFAULT_TEXT_MODEL: &str = "google/gemini-2.5-flash";
/// File name offered for the exported storybook.
pub const DEFAULT_FILE_NAME: &str = "我的专属绘本.jpg";

/// Where the per-page captions and prompts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptSource {
    /// The fixed four-page script in [`crate::prompts::builtin_script`].
    #[default]
    Builtin,
    /// Ask the text model to write a four-page script for the avatar.
    Authored,
}

/// Configuration for the Generation Client.
///
/// Built via [`GeneratorConfig::builder()`]; `build()` fails without an API key.
///
/// # Example
/// ```rust
/// use storybook_forge::GeneratorConfig;
///
/// let config = GeneratorConfig::builder()
///     .api_key("sk-or-test")
///     .app_title("Storybook")
///     .api_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.api_timeout_secs, 120);
/// ```
#[derive(Clone)]
pub struct GeneratorConfig {
    /// Base URL of the chat-completions API (without `/chat/completions`).
    pub base_url: String,

    /// Bearer token.
    pub api_key: String,

    /// Optional `HTTP-Referer` attribution header.
    pub referer: Option<String>,

    /// Optional `X-Title` attribution header.
    pub app_title: Option<String>,

    /// Model for image output (avatar and pages).
    pub image_model: String,

    /// Model for text output (authored scripts).
    pub text_model: String,

    /// Per-generation-call timeout in seconds. Default: 300.
    ///
    /// Image generation routinely takes 30–90 s; five minutes leaves room for
    /// a slow queue without hanging forever.
    pub api_timeout_secs: u64,

    /// Timeout for fetching a remote image referenced by a response. Default: 300.
    pub download_timeout_secs: u64,

    /// Script source for the storybook phase.
    pub script: ScriptSource,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("referer", &self.referer)
            .field("app_title", &self.app_title)
            .field("image_model", &self.image_model)
            .field("text_model", &self.text_model)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("script", &self.script)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GenerationProgressCallback>"),
            )
            .finish()
    }
}

impl GeneratorConfig {
    /// Create a new builder with every default filled in except the API key.
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            referer: None,
            app_title: None,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            api_timeout_secs: 300,
            download_timeout_secs: 300,
            script: ScriptSource::default(),
            progress_callback: None,
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Builder for [`GeneratorConfig`].
pub struct GeneratorConfigBuilder {
    base_url: String,
    api_key: Option<String>,
    referer: Option<String>,
    app_title: Option<String>,
    image_model: String,
    text_model: String,
    api_timeout_secs: u64,
    download_timeout_secs: u64,
    script: ScriptSource,
    progress_callback: Option<ProgressCallback>,
}

impl GeneratorConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Empty strings are treated as "not set".
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = non_empty(referer.into());
        self
    }

    /// Empty strings are treated as "not set".
    pub fn app_title(mut self, title: impl Into<String>) -> Self {
        self.app_title = non_empty(title.into());
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    pub fn script(mut self, script: ScriptSource) -> Self {
        self.script = script;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GeneratorConfig, StorybookError> {
        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(StorybookError::MissingApiKey)?;

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(StorybookError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                self.base_url
            )));
        }
        if self.image_model.trim().is_empty() || self.text_model.trim().is_empty() {
            return Err(StorybookError::InvalidConfig("model id must not be empty".into()));
        }
        if self.api_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(StorybookError::InvalidConfig("timeouts must be ≥ 1 second".into()));
        }

        Ok(GeneratorConfig {
            base_url: self.base_url,
            api_key,
            referer: self.referer,
            app_title: self.app_title,
            image_model: self.image_model,
            text_model: self.text_model,
            api_timeout_secs: self.api_timeout_secs,
            download_timeout_secs: self.download_timeout_secs,
            script: self.script,
            progress_callback: self.progress_callback,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

// ── Compositing ──────────────────────────────────────────────────────────

/// Layout and encoding parameters for the exported storybook picture.
///
/// Canvas width is `content_width + 2 * padding`; the height is computed from
/// the pages (see [`crate::pipeline::compose::measure_layout`]).
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// Width every page image is scaled to, in pixels. Default: 1024.
    pub content_width: u32,
    /// Margin around the content on all four sides. Default: 50.
    pub padding: u32,
    /// Gap between an image and its caption, and between pages. Default: 40.
    pub spacing: u32,
    /// Caption font size in pixels. Default: 32.
    pub font_size: f32,
    /// Caption line advance in pixels. Default: 48.
    pub line_height: u32,
    /// Canvas fill. Default: white.
    pub background: Rgba<u8>,
    /// Caption colour. Default: #333333.
    pub text_color: Rgba<u8>,
    /// JPEG quality, 1–100. Default: 90.
    pub jpeg_quality: u8,
    /// Suggested file name for the download.
    pub file_name: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            content_width: 1024,
            padding: 50,
            spacing: 40,
            font_size: 32.0,
            line_height: 48,
            background: Rgba([0xFF, 0xFF, 0xFF, 0xFF]),
            text_color: Rgba([0x33, 0x33, 0x33, 0xFF]),
            jpeg_quality: 90,
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl ComposeConfig {
    pub fn builder() -> ComposeConfigBuilder {
        ComposeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Total canvas width including padding.
    pub fn canvas_width(&self) -> u32 {
        self.content_width + self.padding * 2
    }
}

/// Builder for [`ComposeConfig`].
#[derive(Debug)]
pub struct ComposeConfigBuilder {
    config: ComposeConfig,
}

impl ComposeConfigBuilder {
    pub fn content_width(mut self, px: u32) -> Self {
        self.config.content_width = px;
        self
    }

    pub fn padding(mut self, px: u32) -> Self {
        self.config.padding = px;
        self
    }

    pub fn spacing(mut self, px: u32) -> Self {
        self.config.spacing = px;
        self
    }

    pub fn font_size(mut self, px: f32) -> Self {
        self.config.font_size = px;
        self
    }

    pub fn line_height(mut self, px: u32) -> Self {
        self.config.line_height = px;
        self
    }

    pub fn background(mut self, c: Rgba<u8>) -> Self {
        self.config.background = c;
        self
    }

    pub fn text_color(mut self, c: Rgba<u8>) -> Self {
        self.config.text_color = c;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.config.file_name = name.into();
        self
    }

    pub fn build(self) -> Result<ComposeConfig, StorybookError> {
        let c = &self.config;
        if c.content_width == 0 {
            return Err(StorybookError::InvalidConfig("content width must be ≥ 1".into()));
        }
        if c.line_height == 0 {
            return Err(StorybookError::InvalidConfig("line height must be ≥ 1".into()));
        }
        if !(c.font_size > 0.0) {
            return Err(StorybookError::InvalidConfig(format!(
                "font size must be positive, got {}",
                c.font_size
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_configuration_error() {
        let err = GeneratorConfig::builder().build().unwrap_err();
        assert!(matches!(err, StorybookError::MissingApiKey));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        let blank = GeneratorConfig::builder().api_key("   ").build();
        assert!(matches!(blank, Err(StorybookError::MissingApiKey)));
    }

    #[test]
    fn defaults() {
        let c = GeneratorConfig::builder().api_key("k").build().unwrap();
        assert_eq!(c.completions_url(), "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(c.api_timeout(), Duration::from_secs(300));
        assert_eq!(c.download_timeout(), Duration::from_secs(300));
        assert_eq!(c.script, ScriptSource::Builtin);
        assert!(c.referer.is_none());
    }

    #[test]
    fn empty_attribution_headers_are_dropped() {
        let c = GeneratorConfig::builder()
            .api_key("k")
            .referer("")
            .app_title("My Book")
            .build()
            .unwrap();
        assert!(c.referer.is_none());
        assert_eq!(c.app_title.as_deref(), Some("My Book"));
    }

    #[test]
    fn debug_redacts_key() {
        let c = GeneratorConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
    }

    #[test]
    fn rejects_bad_base_url_and_zero_timeout() {
        assert!(GeneratorConfig::builder()
            .api_key("k")
            .base_url("ftp://x")
            .build()
            .is_err());
        assert!(GeneratorConfig::builder()
            .api_key("k")
            .api_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn completions_url_trims_slash() {
        let c = GeneratorConfig::builder()
            .api_key("k")
            .base_url("http://localhost:8080/v1/")
            .build()
            .unwrap();
        assert_eq!(c.completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn compose_defaults_and_clamp() {
        let c = ComposeConfig::default();
        assert_eq!(c.canvas_width(), 1124);
        let q = ComposeConfig::builder().jpeg_quality(0).build().unwrap();
        assert_eq!(q.jpeg_quality, 1);
        assert!(ComposeConfig::builder().line_height(0).build().is_err());
    }
}
