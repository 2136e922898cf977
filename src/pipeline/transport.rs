//! Chat-completions transport: request types and the HTTP provider.
//!
//! [`ChatProvider`] is the seam between the Generation Client and the network.
//! [`OpenRouterProvider`] speaks the OpenAI-compatible `/chat/completions`
//! protocol over `reqwest`; tests substitute an in-process implementation.
//!
//! Providers return the raw JSON body. Interpreting it is the job of
//! [`crate::pipeline::normalize`], because its shape is not stable across
//! vendors or response modes.

use crate::config::GeneratorConfig;
use crate::error::StorybookError;
use crate::image_ref::{image_mime, ImageRef};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// One unit of a multimodal message.
///
/// Order matters: vendors are sensitive to whether the image precedes the
/// instruction text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrlPart {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Attach an image inline as a data URL.
    pub fn image(image: &ImageRef) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrlPart {
                url: image.to_data_url(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// Body of a `/chat/completions` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
}

impl ChatRequest {
    /// A single user turn made of `parts`.
    pub fn user(model: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: parts,
            }],
            modalities: None,
        }
    }

    /// Ask for image output alongside text.
    pub fn with_image_output(mut self) -> Self {
        self.modalities = Some(vec!["image".to_string(), "text".to_string()]);
        self
    }

    /// Content parts of the (single) user message.
    pub fn parts(&self) -> &[ContentPart] {
        self.messages
            .first()
            .map(|m| m.content.as_slice())
            .unwrap_or(&[])
    }

    /// Number of image attachments in the request.
    pub fn image_count(&self) -> usize {
        self.parts()
            .iter()
            .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
            .count()
    }
}

/// Something that can answer chat-completion requests and fetch images.
///
/// Implementations should map their own timeouts to
/// [`StorybookError::ApiTimeout`] / [`StorybookError::DownloadTimeout`]; the
/// Generation Client additionally enforces its configured deadlines around
/// every call.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send one request and return the raw JSON body of a successful reply.
    async fn complete(&self, request: &ChatRequest) -> Result<Value, StorybookError>;

    /// Download an image referenced by URL.
    async fn fetch_image(&self, url: &str) -> Result<ImageRef, StorybookError>;
}

/// `reqwest`-backed provider for OpenRouter or any OpenAI-compatible endpoint.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    completions_url: String,
    api_key: String,
    api_timeout: Duration,
    download_timeout: Duration,
}

impl OpenRouterProvider {
    /// Build the HTTP client from the configuration.
    ///
    /// Attribution headers are attached to every request when configured.
    pub fn new(config: &GeneratorConfig) -> Result<Self, StorybookError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref referer) = config.referer {
            headers.insert("HTTP-Referer", header_value("referer", referer)?);
        }
        if let Some(ref title) = config.app_title {
            headers.insert("X-Title", header_value("app title", title)?);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.api_timeout())
            .build()
            .map_err(|e| StorybookError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            completions_url: config.completions_url(),
            api_key: config.api_key.clone(),
            api_timeout: config.api_timeout(),
            download_timeout: config.download_timeout(),
        })
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, StorybookError> {
    HeaderValue::from_str(value).map_err(|_| {
        StorybookError::InvalidConfig(format!("{name} contains characters not allowed in a header"))
    })
}

#[async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Value, StorybookError> {
        debug!(
            "POST {} model={} images={}",
            self.completions_url,
            request.model,
            request.image_count()
        );

        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.api_timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_request_error(e, self.api_timeout))?;

        interpret_body(status.as_u16(), &body)
    }

    async fn fetch_image(&self, url: &str) -> Result<ImageRef, StorybookError> {
        info!("Downloading generated image from: {}", url);
        let secs = self.download_timeout.as_secs();

        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StorybookError::DownloadTimeout {
                        url: url.to_string(),
                        secs,
                    }
                } else {
                    StorybookError::DownloadFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(StorybookError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .filter(|v| v.starts_with("image/"));

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                StorybookError::DownloadTimeout {
                    url: url.to_string(),
                    secs,
                }
            } else {
                StorybookError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if bytes.is_empty() {
            return Err(StorybookError::DownloadFailed {
                url: url.to_string(),
                reason: "empty body".into(),
            });
        }

        let mime = image_mime(&bytes, declared.as_deref()).map_err(|reason| StorybookError::DownloadFailed {
            url: url.to_string(),
            reason,
        })?;
        debug!("Downloaded {} bytes ({})", bytes.len(), mime);
        Ok(ImageRef::new(mime, bytes.to_vec()))
    }
}

fn map_request_error(e: reqwest::Error, timeout: Duration) -> StorybookError {
    if e.is_timeout() {
        StorybookError::ApiTimeout {
            secs: timeout.as_secs(),
        }
    } else {
        StorybookError::RequestFailed {
            reason: e.to_string(),
        }
    }
}

/// Turn a status + body into the JSON value or a transport error.
///
/// Non-2xx replies surface `error.message` when the body carries one. Some
/// gateways answer 200 with only an `error` object; that is an error too.
pub fn interpret_body(status: u16, body: &str) -> Result<Value, StorybookError> {
    let parsed: Result<Value, _> = serde_json::from_str(body);
    let success = (200..300).contains(&status);

    match parsed {
        Ok(value) => {
            let error_message = value
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(str::to_string);
            let has_payload = value.get("choices").is_some() || value.get("candidates").is_some();

            if !success {
                return Err(StorybookError::ApiError {
                    status,
                    message: error_message.unwrap_or_else(|| format!("request failed with HTTP {status}")),
                });
            }
            if let (Some(message), false) = (error_message, has_payload) {
                return Err(StorybookError::ApiError { status, message });
            }
            Ok(value)
        }
        Err(e) if success => Err(StorybookError::InvalidResponseBody {
            detail: e.to_string(),
        }),
        Err(_) => Err(StorybookError::ApiError {
            status,
            message: format!("request failed with HTTP {status}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialises_parts_in_order() {
        let img = ImageRef::new("image/png", vec![1, 2, 3]);
        let req = ChatRequest::user("m", vec![ContentPart::image(&img), ContentPart::text("go")])
            .with_image_output();
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "model": "m",
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": "data:image/png;base64,AQID" } },
                        { "type": "text", "text": "go" }
                    ]
                }],
                "modalities": ["image", "text"]
            })
        );
        assert_eq!(req.image_count(), 1);
    }

    #[test]
    fn modalities_omitted_for_text_requests() {
        let req = ChatRequest::user("m", vec![ContentPart::text("hi")]);
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("modalities").is_none());
    }

    #[test]
    fn non_success_uses_error_message() {
        let err = interpret_body(401, r#"{"error":{"message":"No auth credentials found","code":401}}"#)
            .unwrap_err();
        match err {
            StorybookError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "No auth credentials found");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_success_without_json_body() {
        let err = interpret_body(502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, StorybookError::ApiError { status: 502, .. }));
    }

    #[test]
    fn success_with_only_error_object_is_error() {
        let err = interpret_body(200, r#"{"error":{"message":"model overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn success_with_unreadable_body() {
        let err = interpret_body(200, "not json").unwrap_err();
        assert!(matches!(err, StorybookError::InvalidResponseBody { .. }));
    }

    #[test]
    fn success_passes_value_through() {
        let v = interpret_body(200, r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(v["choices"][0]["message"]["content"], "hi");
    }

    #[test]
    fn provider_rejects_bad_header_value() {
        let config = GeneratorConfig::builder()
            .api_key("k")
            .app_title("bad\nvalue")
            .build()
            .unwrap();
        assert!(matches!(
            OpenRouterProvider::new(&config),
            Err(StorybookError::InvalidConfig(_))
        ));
    }
}
