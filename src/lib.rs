//! # storybook-forge
//!
//! Turn one photo into a four-page illustrated storybook using a multimodal
//! chat-completions API (OpenRouter by default).
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Avatar    stylise the photo into a cartoon character (one request)
//!  ├─ 2. Script    built-in four-page script, or one authored by a text model
//!  ├─ 3. Pages     one image request per page, all in flight at once
//!  ├─ 4. Compose   stack images and wrapped captions on one canvas
//!  └─ 5. Export    JPEG, written atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storybook_forge::{
//!     composite_and_download, ComposeConfig, GeneratorConfig, ImageRef, RustTypeFont,
//!     StoryGenerator,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GeneratorConfig::builder()
//!         .api_key(std::env::var("OPENROUTER_API_KEY")?)
//!         .build()?;
//!     let generator = StoryGenerator::from_config(config)?;
//!     let cancel = CancellationToken::new();
//!
//!     let photo = ImageRef::from_path("me.jpg").await?;
//!     let avatar = generator.generate_cartoon_avatar(&photo, &cancel).await?;
//!     let pages = generator.generate_storybook(&avatar, &cancel).await?;
//!
//!     let compose = ComposeConfig::default();
//!     let font = Arc::new(RustTypeFont::from_path("NotoSansSC-Regular.ttf", compose.font_size)?);
//!     let path = composite_and_download(&pages, font, &compose, ".").await?;
//!     eprintln!("saved {}", path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storybook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! storybook-forge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod generate;
pub mod image_ref;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod story;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ComposeConfig, ComposeConfigBuilder, GeneratorConfig, GeneratorConfigBuilder, ScriptSource};
pub use error::{ErrorKind, StorybookError};
pub use export::{composite_and_download, composite_to_jpeg, ExportedStorybook};
pub use generate::StoryGenerator;
pub use image_ref::ImageRef;
pub use pipeline::compose::{CaptionFont, RustTypeFont, StorybookLayout};
pub use pipeline::transport::{ChatProvider, ChatRequest, ContentPart, OpenRouterProvider};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Screen, StorySession};
pub use story::{PagePlan, PageSource, StoryPage};
