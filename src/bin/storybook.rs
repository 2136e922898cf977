//! CLI binary for storybook-forge.
//!
//! A thin shim over the library crate: maps CLI flags to `GeneratorConfig`
//! and `ComposeConfig`, runs both generation phases and saves the JPEG.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use storybook_forge::{
    composite_and_download, ComposeConfig, GenerationProgressCallback, GeneratorConfig, ImageRef,
    PageSource, ProgressCallback, RustTypeFont, ScriptSource, StoryGenerator,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner during the avatar phase, then a page bar. Pages may finish in any
/// order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading photo…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_avatar_start(&self) {
        self.bar.set_prefix("Avatar");
        self.bar.set_message("Drawing your little dragon…");
    }

    fn on_avatar_complete(&self) {
        self.bar.println(format!("  {} Avatar ready", green("✓")));
    }

    fn on_storybook_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Illustrating");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Illustrating {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {}/{}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {}/{}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_storybook_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} pages illustrated", green("✔"), bold(&total_pages.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Built-in "Dragon Legion" story
  storybook --photo me.jpg --font NotoSansSC-Regular.ttf

  # Let the text model write the story, save into out/
  storybook --photo me.jpg --font NotoSansSC-Regular.ttf --authored-script -o out/

  # Use a pre-made picture for page 3 (no request is sent for it)
  storybook --photo me.jpg --font font.ttf --static-page 3=factory.png

  # Keep the avatar and print a JSON summary
  storybook --photo me.jpg --font font.ttf --save-avatar avatar.png --json

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY       API key (required)
  OPENROUTER_HTTP_REFERER  Optional HTTP-Referer attribution header
  OPENROUTER_APP_TITLE     Optional X-Title attribution header
  OPENROUTER_SITE_URL      Fallback for OPENROUTER_HTTP_REFERER
  OPENROUTER_SITE_NAME     Fallback for OPENROUTER_APP_TITLE
  STORYBOOK_FONT           Caption font (TTF/OTF with CJK coverage)
  STORYBOOK_IMAGE_MODEL    Image model ID
  STORYBOOK_TEXT_MODEL     Text model ID for --authored-script
  STORYBOOK_API_TIMEOUT    Per-request timeout in seconds
"#;

/// Turn one photo into an illustrated four-page storybook.
#[derive(Parser, Debug)]
#[command(
    name = "storybook",
    version,
    about = "Turn one photo into an illustrated storybook using multimodal LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Photo to turn into the story's hero (PNG, JPEG…).
    #[arg(long)]
    photo: PathBuf,

    /// TrueType/OpenType font used for captions.
    #[arg(long, env = "STORYBOOK_FONT")]
    font: PathBuf,

    /// Output file, or a directory to save the default file name into.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// API key for the chat-completions endpoint.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "STORYBOOK_BASE_URL", default_value = storybook_forge::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// HTTP-Referer attribution header.
    #[arg(long, env = "OPENROUTER_HTTP_REFERER")]
    referer: Option<String>,

    /// X-Title attribution header.
    #[arg(long, env = "OPENROUTER_APP_TITLE")]
    app_title: Option<String>,

    /// Model used for the avatar and page illustrations.
    #[arg(long, env = "STORYBOOK_IMAGE_MODEL", default_value = storybook_forge::config::DEFAULT_IMAGE_MODEL)]
    image_model: String,

    /// Model used to author the story with --authored-script.
    #[arg(long, env = "STORYBOOK_TEXT_MODEL", default_value = storybook_forge::config::DEFAULT_TEXT_MODEL)]
    text_model: String,

    /// Ask the text model to write the story instead of the built-in one.
    #[arg(long)]
    authored_script: bool,

    /// Use a local picture for page N: `N=PATH` (1-based, repeatable).
    #[arg(long = "static-page", value_name = "N=PATH")]
    static_pages: Vec<String>,

    /// Also save the generated avatar to this path.
    #[arg(long)]
    save_avatar: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "STORYBOOK_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Timeout for downloading images returned by URL, in seconds.
    #[arg(long, default_value_t = 300)]
    download_timeout: u64,

    /// JPEG quality (1–100).
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Print a JSON summary to stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Serialize)]
struct Summary {
    output: PathBuf,
    avatar: Option<PathBuf>,
    pages: Vec<PageSummary>,
    duration_ms: u64,
}

#[derive(Serialize)]
struct PageSummary {
    page: usize,
    story: String,
    mime_type: String,
    bytes: usize,
    lines: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let start = Instant::now();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback))?;
    let compose = ComposeConfig::builder()
        .jpeg_quality(cli.quality)
        .build()
        .context("Invalid compose configuration")?;

    let font = RustTypeFont::from_path(&cli.font, compose.font_size).context("Failed to load caption font")?;
    let photo = ImageRef::from_path(&cli.photo)
        .await
        .with_context(|| format!("Failed to read photo {:?}", cli.photo))?;
    let static_pages = load_static_pages(&cli.static_pages).await?;

    let generator = StoryGenerator::from_config(config).context("Failed to create API client")?;

    // Ctrl-C cancels every in-flight request.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Generate ─────────────────────────────────────────────────────────
    let result = async {
        let avatar = generator
            .generate_cartoon_avatar(&photo, &cancel)
            .await
            .context("Avatar generation failed")?;

        if let Some(ref path) = cli.save_avatar {
            tokio::fs::write(path, avatar.data())
                .await
                .with_context(|| format!("Failed to save avatar to {:?}", path))?;
        }

        let mut plans = generator
            .plan_storybook(&avatar, &cancel)
            .await
            .context("Story planning failed")?;
        let count = plans.len();
        for (page, image) in static_pages {
            let plan = plans
                .get_mut(page - 1)
                .with_context(|| format!("--static-page {page}: the story has only {count} pages"))?;
            plan.source = PageSource::Static(image);
        }

        let pages = generator
            .generate_pages(&avatar, plans, &cancel)
            .await
            .context("Storybook generation failed")?;
        Ok::<_, anyhow::Error>(pages)
    }
    .await;

    if let Some(ref cb) = progress {
        cb.finish();
    }
    let pages = result?;

    // ── Export ───────────────────────────────────────────────────────────
    let font = Arc::new(font);
    let path = composite_and_download(&pages, font.clone(), &compose, &cli.output)
        .await
        .context("Export failed")?;

    if cli.json {
        let summary = Summary {
            output: path.clone(),
            avatar: cli.save_avatar.clone(),
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, p)| PageSummary {
                    page: i + 1,
                    story: p.story.clone(),
                    mime_type: p.image.mime_type().to_string(),
                    bytes: p.image.data().len(),
                    lines: storybook_forge::pipeline::wrap::wrap_caption(
                        &p.story,
                        compose.content_width as f32,
                        font.as_ref(),
                    )
                    .len(),
                })
                .collect(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        println!("{}", serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?);
    } else if !cli.quiet {
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            green("✔"),
            pages.len(),
            start.elapsed().as_millis(),
            bold(&path.display().to_string())
        );
    }

    Ok(())
}

/// Map CLI args to `GeneratorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<GeneratorConfig> {
    let Some(ref api_key) = cli.api_key else {
        bail!("{}", storybook_forge::StorybookError::MissingApiKey);
    };

    let mut builder = GeneratorConfig::builder()
        .api_key(api_key.as_str())
        .base_url(cli.base_url.as_str())
        .image_model(cli.image_model.as_str())
        .text_model(cli.text_model.as_str())
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .script(if cli.authored_script {
            ScriptSource::Authored
        } else {
            ScriptSource::Builtin
        });
    let (referer, app_title) = attribution(cli, |key| std::env::var(key).ok());
    if let Some(r) = referer {
        builder = builder.referer(r);
    }
    if let Some(t) = app_title {
        builder = builder.app_title(t);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Attribution headers from the flags, falling back to the
/// `OPENROUTER_SITE_URL` / `OPENROUTER_SITE_NAME` variables.
fn attribution(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> (Option<String>, Option<String>) {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    (
        non_empty(cli.referer.clone()).or_else(|| non_empty(lookup("OPENROUTER_SITE_URL"))),
        non_empty(cli.app_title.clone()).or_else(|| non_empty(lookup("OPENROUTER_SITE_NAME"))),
    )
}

/// Parse and load every `--static-page N=PATH`.
async fn load_static_pages(specs: &[String]) -> Result<Vec<(usize, ImageRef)>> {
    let mut pages = Vec::with_capacity(specs.len());
    for spec in specs {
        let (page, path) = parse_static_page(spec)?;
        let image = ImageRef::from_path(&path)
            .await
            .with_context(|| format!("Failed to read static page image {:?}", path))?;
        pages.push((page, image));
    }
    Ok(pages)
}

fn parse_static_page(spec: &str) -> Result<(usize, PathBuf)> {
    let Some((page, path)) = spec.split_once('=') else {
        bail!("Invalid --static-page '{spec}': expected N=PATH");
    };
    let page: usize = page
        .trim()
        .parse()
        .with_context(|| format!("Invalid page number in --static-page '{spec}'"))?;
    if page < 1 {
        bail!("Pages are 1-indexed, minimum is 1 (got {page})");
    }
    if path.trim().is_empty() {
        bail!("Invalid --static-page '{spec}': empty path");
    }
    Ok((page, PathBuf::from(path.trim())))
}
