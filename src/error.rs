//! Error types for the storybook-forge library.
//!
//! Every failure is a variant of [`StorybookError`]. The variants are grouped
//! into a small set of [`ErrorKind`]s so a caller (a UI, the CLI, a session
//! controller) can pick its messaging without matching on every variant:
//!
//! * **InputValidation**: bad or missing image data before any network call.
//! * **Configuration**: missing API credential or an invalid config value.
//! * **Transport**: non-2xx status or a connection failure.
//! * **Timeout**: a bounded call ran past its deadline.
//! * **ResponseShape**: the call succeeded but the payload held no usable
//!   image or text.
//! * **PartialGeneration**: one storybook page failed, so the whole storybook
//!   failed with it.
//!
//! Raw provider payloads are logged with `tracing`, never embedded in the
//! messages below, so every `Display` string is safe to show to an end user.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the storybook-forge library.
#[derive(Debug, Error)]
pub enum StorybookError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The string is not a `data:<mime>;base64,<payload>` URL.
    #[error("Invalid data URL: {detail}")]
    InvalidDataUrl { detail: String },

    /// Bytes were supplied but they are not a decodable image.
    #[error("Invalid image data: {detail}")]
    InvalidImage { detail: String },

    /// Generation was requested before a photo was provided.
    #[error("No photo was provided. Upload a photo first.")]
    MissingPhoto,

    /// Compositing was requested for zero pages.
    #[error("The storybook has no pages to export")]
    EmptyStorybook,

    // ── Config errors ─────────────────────────────────────────────────────
    /// No API key configured for the generation endpoint.
    #[error("Missing API key for the generation endpoint.\nSet OPENROUTER_API_KEY or pass --api-key.")]
    MissingApiKey,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Transport errors ──────────────────────────────────────────────────
    /// The provider answered with a non-2xx status (or an error body).
    #[error("Generation API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, connection reset…).
    #[error("Generation request failed: {reason}")]
    RequestFailed { reason: String },

    /// A remote image referenced by the response could not be fetched.
    #[error("Failed to download image '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Timeouts ──────────────────────────────────────────────────────────
    /// A generation call exceeded its deadline.
    #[error("Generation request timed out after {secs}s")]
    ApiTimeout { secs: u64 },

    /// A remote image download exceeded its deadline.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Response shape errors ─────────────────────────────────────────────
    /// A 2xx response whose body is not JSON.
    #[error("The generation API returned an unreadable body: {detail}")]
    InvalidResponseBody { detail: String },

    /// The response carried neither `choices` nor `candidates`.
    #[error("The generation API returned no choices")]
    NoChoices,

    /// No known response shape held an image.
    #[error("No image found in the generation response ({context})")]
    NoImageInResponse { context: String },

    /// No known response shape held text.
    #[error("No text found in the generation response")]
    NoTextInResponse,

    /// An image field was present but its payload was not valid base64.
    #[error("Malformed image data in response: {detail}")]
    MalformedImageData { detail: String },

    /// The authored story script could not be parsed.
    #[error("Could not parse the story script: {detail}")]
    InvalidScript { detail: String },

    // ── Storybook assembly ────────────────────────────────────────────────
    /// One page of the storybook failed; the storybook is discarded.
    #[error("Could not generate page {page} of {total}: {source}")]
    PageFailed {
        page: usize,
        total: usize,
        #[source]
        source: Box<StorybookError>,
    },

    /// In-flight work was cancelled (restart, shutdown).
    #[error("Generation was cancelled")]
    Cancelled,

    // ── Export errors ─────────────────────────────────────────────────────
    /// A page image could not be decoded for compositing.
    #[error("Could not decode image for page {page}: {detail}")]
    ImageDecode { page: usize, detail: String },

    /// The composited canvas could not be encoded.
    #[error("Could not encode the storybook image: {0}")]
    ImageEncode(String),

    /// The caption font could not be loaded.
    #[error("Could not load font '{path}': {detail}")]
    FontLoad { path: PathBuf, detail: String },

    /// Could not create or write the exported file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`StorybookError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputValidation,
    Configuration,
    Transport,
    Timeout,
    ResponseShape,
    PartialGeneration,
    Cancelled,
    Export,
    Internal,
}

impl StorybookError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use StorybookError::*;
        match self {
            InvalidDataUrl { .. } | InvalidImage { .. } | MissingPhoto | EmptyStorybook => {
                ErrorKind::InputValidation
            }
            MissingApiKey | InvalidConfig(_) => ErrorKind::Configuration,
            ApiError { .. } | RequestFailed { .. } | DownloadFailed { .. } => ErrorKind::Transport,
            ApiTimeout { .. } | DownloadTimeout { .. } => ErrorKind::Timeout,
            InvalidResponseBody { .. }
            | NoChoices
            | NoImageInResponse { .. }
            | NoTextInResponse
            | MalformedImageData { .. }
            | InvalidScript { .. } => ErrorKind::ResponseShape,
            PageFailed { .. } => ErrorKind::PartialGeneration,
            Cancelled => ErrorKind::Cancelled,
            ImageDecode { .. } | ImageEncode(_) | FontLoad { .. } | OutputWriteFailed { .. } => {
                ErrorKind::Export
            }
            Internal(_) => ErrorKind::Internal,
        }
    }

    /// True if this error, or the page failure it wraps, is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            StorybookError::PageFailed { source, .. } => source.is_timeout(),
            other => other.kind() == ErrorKind::Timeout,
        }
    }

    /// True when re-submitting the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorybookError::ApiError { status, .. } => *status == 429 || *status >= 500,
            StorybookError::PageFailed { source, .. } => source.is_retryable(),
            other => matches!(
                other.kind(),
                ErrorKind::Timeout | ErrorKind::Transport | ErrorKind::ResponseShape
            ),
        }
    }
}
