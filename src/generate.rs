//! The Generation Client: avatar phase and storybook phase.
//!
//! ## Phases
//!
//! ```text
//! photo ──▶ avatar ──▶ plan (built-in or authored) ──▶ pages (fan-out/join)
//! ```
//!
//! The avatar phase is one image request. Its failure ends the flow.
//!
//! The storybook phase issues every page request at once and waits for all of
//! them. Output order follows the plan, never arrival order. One failed page
//! fails the storybook; the remaining in-flight requests are cancelled and no
//! partial list is returned.
//!
//! Every outbound call is bounded by the configured timeout and raced against
//! the caller's [`CancellationToken`].

use crate::config::{GeneratorConfig, ScriptSource};
use crate::error::StorybookError;
use crate::image_ref::ImageRef;
use crate::pipeline::normalize::{extract_image, extract_text, first_choice, preview, ImageSource};
use crate::pipeline::script::parse_authored_script;
use crate::pipeline::transport::{ChatProvider, ChatRequest, ContentPart, OpenRouterProvider};
use crate::prompts::{builtin_script, AVATAR_PROMPT, STORY_AUTHOR_PROMPT};
use crate::story::{PagePlan, PageSource, StoryPage};
use futures::future::join_all;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives both generation phases against one [`ChatProvider`].
pub struct StoryGenerator {
    config: GeneratorConfig,
    provider: Arc<dyn ChatProvider>,
}

impl StoryGenerator {
    /// Use an already-built provider (tests, custom gateways).
    pub fn new(config: GeneratorConfig, provider: Arc<dyn ChatProvider>) -> Self {
        Self { config, provider }
    }

    /// Build an [`OpenRouterProvider`] from the configuration.
    pub fn from_config(config: GeneratorConfig) -> Result<Self, StorybookError> {
        let provider = OpenRouterProvider::new(&config)?;
        Ok(Self::new(config, Arc::new(provider)))
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Stylise `photo` into the cartoon avatar used by every page.
    ///
    /// The request content is `[photo, instruction]`, in that order.
    pub async fn generate_cartoon_avatar(
        &self,
        photo: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, StorybookError> {
        validate_photo(photo)?;

        info!("Generating avatar from {} byte {}", photo.data().len(), photo.mime_type());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_avatar_start();
        }

        let start = Instant::now();
        let parts = vec![ContentPart::image(photo), ContentPart::text(AVATAR_PROMPT)];
        let avatar = self.request_image(parts, "avatar", cancel).await?;

        info!(
            "Avatar ready: {} bytes {} in {}ms",
            avatar.data().len(),
            avatar.mime_type(),
            start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_avatar_complete();
        }
        Ok(avatar)
    }

    /// Decide the pages: the built-in script, or one authored by the text model.
    pub async fn plan_storybook(
        &self,
        avatar: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<PagePlan>, StorybookError> {
        match self.config.script {
            ScriptSource::Builtin => Ok(builtin_script()),
            ScriptSource::Authored => {
                info!("Asking {} to author the story", self.config.text_model);
                let request = ChatRequest::user(
                    self.config.text_model.clone(),
                    vec![ContentPart::image(avatar), ContentPart::text(STORY_AUTHOR_PROMPT)],
                );
                let response = self.complete(&request, cancel).await?;
                let text = first_choice(&response)
                    .and_then(extract_text)
                    .map_err(|e| log_shape_error("story script", e, &response))?;
                let plans = parse_authored_script(&text).map_err(|e| {
                    error!("story script: {}; text was: {}", e, text);
                    e
                })?;
                debug!("Authored script has {} pages", plans.len());
                Ok(plans)
            }
        }
    }

    /// Plan the storybook, then generate every page.
    pub async fn generate_storybook(
        &self,
        avatar: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoryPage>, StorybookError> {
        let plans = self.plan_storybook(avatar, cancel).await?;
        self.generate_pages(avatar, plans, cancel).await
    }

    /// Generate the given pages concurrently and zip them with their captions.
    ///
    /// Static pages are used as-is without a network call.
    pub async fn generate_pages(
        &self,
        avatar: &ImageRef,
        plans: Vec<PagePlan>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoryPage>, StorybookError> {
        let total = plans.len();
        if total == 0 {
            return Err(StorybookError::EmptyStorybook);
        }

        let network_pages = plans.iter().filter(|p| p.needs_generation()).count();
        info!("Generating storybook: {} pages ({} need the model)", total, network_pages);
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_storybook_start(total);
        }

        // Siblings of a failed page are cancelled through this child token;
        // cancelling it never touches the caller's token.
        let batch = cancel.child_token();
        let start = Instant::now();

        let requests = plans.iter().enumerate().map(|(idx, plan)| {
            let batch = &batch;
            async move {
                let page_num = idx + 1;
                if let Some(cb) = cb {
                    cb.on_page_start(page_num, total);
                }
                let result = match &plan.source {
                    PageSource::Static(image) => {
                        debug!("Page {}/{} is static", page_num, total);
                        Ok(image.clone())
                    }
                    PageSource::Generate { prompt, include_avatar } => {
                        let mut parts = Vec::with_capacity(2);
                        if *include_avatar {
                            parts.push(ContentPart::image(avatar));
                        }
                        parts.push(ContentPart::text(prompt.as_str()));
                        self.request_image(parts, &format!("page {page_num}"), batch).await
                    }
                };

                match &result {
                    Ok(_) => {
                        if let Some(cb) = cb {
                            cb.on_page_complete(page_num, total);
                        }
                    }
                    Err(StorybookError::Cancelled) => {
                        debug!("Page {}/{} cancelled", page_num, total);
                    }
                    Err(e) => {
                        warn!("Page {}/{} failed: {}", page_num, total, e);
                        batch.cancel();
                        if let Some(cb) = cb {
                            cb.on_page_error(page_num, total, &e.to_string());
                        }
                    }
                }
                result
            }
        });
        let results = join_all(requests).await;

        let mut pages = Vec::with_capacity(total);
        let mut failure = None;
        for (idx, (plan, result)) in plans.into_iter().zip(results).enumerate() {
            match result {
                Ok(image) => pages.push(StoryPage::new(image, plan.story)),
                Err(StorybookError::Cancelled) => {}
                Err(e) => {
                    if failure.is_none() {
                        failure = Some((idx + 1, e));
                    }
                }
            }
        }

        if let Some((page, source)) = failure {
            return Err(StorybookError::PageFailed {
                page,
                total,
                source: Box::new(source),
            });
        }
        if pages.len() != total {
            return Err(StorybookError::Cancelled);
        }

        info!("Storybook ready: {} pages in {}ms", total, start.elapsed().as_millis());
        if let Some(cb) = cb {
            cb.on_storybook_complete(total);
        }
        Ok(pages)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// One bounded chat-completion call.
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, StorybookError> {
        let secs = self.config.api_timeout_secs;
        run_bounded(
            cancel,
            self.config.api_timeout(),
            || StorybookError::ApiTimeout { secs },
            self.provider.complete(request),
        )
        .await
    }

    /// Ask the image model for one picture and normalise the reply.
    async fn request_image(
        &self,
        parts: Vec<ContentPart>,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, StorybookError> {
        let request = ChatRequest::user(self.config.image_model.clone(), parts).with_image_output();
        debug!("{}: sending {} parts ({} images)", label, request.parts().len(), request.image_count());

        let response = self.complete(&request, cancel).await?;
        let (source, shape) = first_choice(&response)
            .and_then(extract_image)
            .map_err(|e| log_shape_error(label, e, &response))?;
        debug!("{}: image found via {:?}", label, shape);

        match source {
            ImageSource::Inline(image) => Ok(image),
            ImageSource::Remote(url) => {
                let secs = self.config.download_timeout_secs;
                let timeout_url = url.clone();
                run_bounded(
                    cancel,
                    self.config.download_timeout(),
                    move || StorybookError::DownloadTimeout {
                        url: timeout_url,
                        secs,
                    },
                    self.provider.fetch_image(&url),
                )
                .await
            }
        }
    }
}

/// Race `fut` against `limit` and `cancel`.
///
/// Cancellation wins over a result that becomes ready at the same instant.
pub async fn run_bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    on_timeout: impl FnOnce() -> StorybookError,
    fut: F,
) -> Result<T, StorybookError>
where
    F: Future<Output = Result<T, StorybookError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorybookError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        },
    }
}

fn validate_photo(photo: &ImageRef) -> Result<(), StorybookError> {
    if photo.data().is_empty() {
        return Err(StorybookError::MissingPhoto);
    }
    if !photo.mime_type().starts_with("image/") {
        return Err(StorybookError::InvalidImage {
            detail: format!("expected an image, got '{}'", photo.mime_type()),
        });
    }
    Ok(())
}

fn log_shape_error(label: &str, e: StorybookError, response: &Value) -> StorybookError {
    error!("{}: {}; raw response: {}", label, e, preview(response));
    e
}
