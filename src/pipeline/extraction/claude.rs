use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::types::{ImageMediaType, VisionClient};
use super::ExtractionError;
use crate::config::OcrSettings;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Vision-capable Claude models known to handle lab-report extraction.
pub const SUPPORTED_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-sonnet-latest",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

/// Model used when the configured identifier is missing or unsupported.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Map a configured model identifier onto a supported one.
///
/// Unknown or missing identifiers are replaced by `DEFAULT_MODEL`; this
/// never fails.
pub fn resolve_model(requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) if SUPPORTED_MODELS.contains(&model) => model.to_string(),
        Some(model) => {
            tracing::warn!(
                requested = %model,
                fallback = DEFAULT_MODEL,
                "Unsupported vision model configured, using default"
            );
            DEFAULT_MODEL.to_string()
        }
        None => DEFAULT_MODEL.to_string(),
    }
}

/// Blocking client for the Anthropic Messages API.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl AnthropicClient {
    /// Build a client from process settings, correcting the model if needed.
    ///
    /// Must not be called from inside an async task: the blocking reqwest
    /// client owns its own runtime.
    pub fn new(settings: &OcrSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.extraction_timeout_secs))
            .build()
            .map_err(|e| ExtractionError::HttpClient(e.to_string()))?;

        let model = resolve_model(settings.model.as_deref());
        tracing::info!(model = %model, base_url = %settings.api_base_url, "Vision client ready");

        Ok(Self {
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model,
            max_tokens: settings.max_tokens,
            client,
            timeout_secs: settings.extraction_timeout_secs,
        })
    }
}

/// Request body for POST /v1/messages
#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: &'a str,
}

/// Response body from POST /v1/messages
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl VisionClient for AnthropicClient {
    fn complete_with_image(
        &self,
        system: &str,
        instruction: &str,
        image_base64: &str,
        media_type: ImageMediaType,
    ) -> Result<String, ExtractionError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: media_type.as_mime(),
                            data: image_base64,
                        },
                    },
                    ContentBlock::Text { text: instruction },
                ],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ExtractionError::Transport(self.base_url.clone())
                } else if e.is_timeout() {
                    ExtractionError::Timeout(self.timeout_secs)
                } else {
                    ExtractionError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| ExtractionError::ResponseDecoding(e.to_string()))?;

        Ok(collect_text(parsed))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Concatenate every text block of a Messages response.
fn collect_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mock vision client for testing: returns a configurable reply or error.
pub struct MockVisionClient {
    response: Result<String, (u16, String)>,
    requests: Mutex<Vec<(String, ImageMediaType)>>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every call fails with an API error.
    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            response: Err((status, body.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Media types of the images received so far, in call order.
    pub fn received_media_types(&self) -> Vec<ImageMediaType> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|(_, m)| *m).collect())
            .unwrap_or_default()
    }
}

impl VisionClient for MockVisionClient {
    fn complete_with_image(
        &self,
        _system: &str,
        _instruction: &str,
        image_base64: &str,
        media_type: ImageMediaType,
    ) -> Result<String, ExtractionError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((image_base64.to_string(), media_type));
        }
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err((status, body)) => Err(ExtractionError::Api {
                status: *status,
                body: body.clone(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}
