//! Headless flow controller.
//!
//! [`StorySession`] owns the state a front-end renders: which screen is
//! showing, the uploaded photo, the finished pages, and a user-facing error
//! message. It applies one recovery policy to every failure: log the detail,
//! show a generic message, discard partial results and go back to the upload
//! screen. Nothing is retried automatically.
//!
//! [`StorySession::generate`] borrows the session for the whole run, so a run
//! is stopped from another task through [`StorySession::cancel_handle`],
//! taken before the run starts. A cancelled run leaves the session ready for
//! the next attempt with a fresh token.

use crate::error::{ErrorKind, StorybookError};
use crate::generate::StoryGenerator;
use crate::image_ref::ImageRef;
use crate::story::StoryPage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Number of onboarding steps shown before the upload screen.
pub const ONBOARDING_STEPS: usize = 2;

/// Shown when generation is requested without a photo.
pub const UPLOAD_FIRST_MESSAGE: &str = "请先上传一张图片。";

/// Shown for every generation failure.
pub const GENERATION_FAILED_MESSAGE: &str = "抱歉，生成故事时出错了。请重试。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Intro carousel; `step` is 0-based.
    Onboarding { step: usize },
    Upload,
    Generating,
    Result,
}

pub struct StorySession {
    generator: Arc<StoryGenerator>,
    screen: Screen,
    photo: Option<ImageRef>,
    avatar: Option<ImageRef>,
    pages: Vec<StoryPage>,
    error: Option<String>,
    last_error_kind: Option<ErrorKind>,
    cancel: CancellationToken,
}

impl StorySession {
    pub fn new(generator: Arc<StoryGenerator>) -> Self {
        Self {
            generator,
            screen: Screen::Onboarding { step: 0 },
            photo: None,
            avatar: None,
            pages: Vec::new(),
            error: None,
            last_error_kind: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn photo(&self) -> Option<&ImageRef> {
        self.photo.as_ref()
    }

    /// Avatar from the last successful run.
    pub fn avatar(&self) -> Option<&ImageRef> {
        self.avatar.as_ref()
    }

    pub fn pages(&self) -> &[StoryPage] {
        &self.pages
    }

    /// User-facing error message, if the last action failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Classification of the last failure, for callers that want to vary
    /// their messaging.
    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error_kind
    }

    /// A handle that cancels the next (or current) run from another task.
    ///
    /// Each handle covers one run: once a run has observed the cancellation,
    /// the session switches to a new token and old handles stop applying.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Advance the onboarding carousel; the last step leads to upload.
    pub fn next_onboarding(&mut self) {
        if let Screen::Onboarding { step } = self.screen {
            self.screen = if step + 1 < ONBOARDING_STEPS {
                Screen::Onboarding { step: step + 1 }
            } else {
                Screen::Upload
            };
        }
    }

    pub fn skip_onboarding(&mut self) {
        if matches!(self.screen, Screen::Onboarding { .. }) {
            self.screen = Screen::Upload;
        }
    }

    /// Store (or replace) the photo to stylise.
    pub fn upload_photo(&mut self, photo: ImageRef) {
        self.photo = Some(photo);
    }

    /// Run both phases for the uploaded photo.
    ///
    /// On success the session moves to [`Screen::Result`]. On any failure it
    /// returns to [`Screen::Upload`] with [`GENERATION_FAILED_MESSAGE`] and no
    /// pages; the original error is returned for logging.
    pub async fn generate(&mut self) -> Result<&[StoryPage], StorybookError> {
        let Some(photo) = self.photo.clone() else {
            self.error = Some(UPLOAD_FIRST_MESSAGE.to_string());
            self.last_error_kind = Some(ErrorKind::InputValidation);
            return Err(StorybookError::MissingPhoto);
        };

        self.screen = Screen::Generating;
        self.error = None;
        self.last_error_kind = None;
        self.pages.clear();

        let cancel = self.cancel.clone();
        let outcome = async {
            let avatar = self.generator.generate_cartoon_avatar(&photo, &cancel).await?;
            let pages = self.generator.generate_storybook(&avatar, &cancel).await?;
            Ok::<_, StorybookError>((avatar, pages))
        }
        .await;

        if cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        match outcome {
            Ok((avatar, pages)) => {
                info!("Session: storybook ready with {} pages", pages.len());
                self.avatar = Some(avatar);
                self.pages = pages;
                self.screen = Screen::Result;
                Ok(&self.pages)
            }
            Err(e) => {
                error!("Session: generation failed ({:?}): {}", e.kind(), e);
                self.avatar = None;
                self.error = Some(GENERATION_FAILED_MESSAGE.to_string());
                self.last_error_kind = Some(e.kind());
                self.screen = Screen::Upload;
                Err(e)
            }
        }
    }

    /// Return to the first onboarding step with every slot cleared.
    ///
    /// Handles from [`cancel_handle`](Self::cancel_handle) are cancelled, so a
    /// run started elsewhere with one of them stops.
    pub fn restart(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.photo = None;
        self.avatar = None;
        self.pages.clear();
        self.error = None;
        self.last_error_kind = None;
        self.screen = Screen::Onboarding { step: 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::pipeline::transport::{ChatProvider, ChatRequest};
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn png(color: [u8; 4]) -> ImageRef {
        ImageRef::from_image(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba(color)))).unwrap()
    }

    /// Answers every request with the same image, or fails every request.
    struct FixedProvider {
        fail: AtomicBool,
    }

    #[async_trait]
    impl ChatProvider for FixedProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<Value, StorybookError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorybookError::ApiError {
                    status: 500,
                    message: "upstream exploded".into(),
                });
            }
            Ok(json!({
                "choices": [{ "message": { "images": [
                    { "image_url": { "url": png([0, 200, 0, 255]).to_data_url() } }
                ]}}]
            }))
        }

        async fn fetch_image(&self, url: &str) -> Result<ImageRef, StorybookError> {
            Err(StorybookError::DownloadFailed {
                url: url.into(),
                reason: "unused".into(),
            })
        }
    }

    fn session(fail: bool) -> StorySession {
        let config = GeneratorConfig::builder().api_key("k").build().unwrap();
        let provider = Arc::new(FixedProvider {
            fail: AtomicBool::new(fail),
        });
        StorySession::new(Arc::new(StoryGenerator::new(config, provider)))
    }

    #[test]
    fn onboarding_walks_two_steps_then_upload() {
        let mut s = session(false);
        assert_eq!(s.screen(), Screen::Onboarding { step: 0 });
        s.next_onboarding();
        assert_eq!(s.screen(), Screen::Onboarding { step: 1 });
        s.next_onboarding();
        assert_eq!(s.screen(), Screen::Upload);
        s.next_onboarding();
        assert_eq!(s.screen(), Screen::Upload);
    }

    #[test]
    fn skip_goes_straight_to_upload() {
        let mut s = session(false);
        s.skip_onboarding();
        assert_eq!(s.screen(), Screen::Upload);
    }

    #[tokio::test]
    async fn generate_without_photo_asks_for_upload() {
        let mut s = session(false);
        s.skip_onboarding();
        let err = s.generate().await.unwrap_err();
        assert!(matches!(err, StorybookError::MissingPhoto));
        assert_eq!(s.error(), Some(UPLOAD_FIRST_MESSAGE));
        assert_eq!(s.screen(), Screen::Upload);
    }

    #[tokio::test]
    async fn success_reaches_result() {
        let mut s = session(false);
        s.skip_onboarding();
        s.upload_photo(png([255, 0, 0, 255]));
        let pages = s.generate().await.unwrap();
        assert_eq!(pages.len(), 4);
        assert_eq!(s.screen(), Screen::Result);
        assert!(s.error().is_none());
        assert!(s.avatar().is_some());
    }

    #[tokio::test]
    async fn failure_returns_to_upload_with_generic_message() {
        let mut s = session(true);
        s.skip_onboarding();
        s.upload_photo(png([255, 0, 0, 255]));
        let err = s.generate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(s.screen(), Screen::Upload);
        assert_eq!(s.error(), Some(GENERATION_FAILED_MESSAGE));
        assert_eq!(s.last_error_kind(), Some(ErrorKind::Transport));
        assert!(s.pages().is_empty());
        // The photo is kept so the user can simply retry.
        assert!(s.photo().is_some());
    }

    #[tokio::test]
    async fn restart_cancels_and_clears() {
        let mut s = session(false);
        s.skip_onboarding();
        s.upload_photo(png([255, 0, 0, 255]));
        s.generate().await.unwrap();

        let old = s.cancel_handle();
        s.restart();
        assert!(old.is_cancelled());
        assert!(!s.cancel_handle().is_cancelled());
        assert_eq!(s.screen(), Screen::Onboarding { step: 0 });
        assert!(s.photo().is_none());
        assert!(s.pages().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancelled() {
        let mut s = session(false);
        s.upload_photo(png([255, 0, 0, 255]));
        s.cancel_handle().cancel();
        let err = s.generate().await.unwrap_err();
        assert!(matches!(err, StorybookError::Cancelled));
        assert_eq!(s.last_error_kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn retry_after_cancel_succeeds() {
        let mut s = session(false);
        s.skip_onboarding();
        s.upload_photo(png([255, 0, 0, 255]));
        let stale = s.cancel_handle();
        stale.cancel();

        assert!(matches!(s.generate().await, Err(StorybookError::Cancelled)));
        assert_eq!(s.screen(), Screen::Upload);
        assert_eq!(s.error(), Some(GENERATION_FAILED_MESSAGE));
        assert!(!s.cancel_handle().is_cancelled());

        let pages = s.generate().await.unwrap();
        assert_eq!(pages.len(), 4);
        assert_eq!(s.screen(), Screen::Result);
        assert!(s.error().is_none());
    }
}
