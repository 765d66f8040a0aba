//! Multimodal reasoning client
//!
//! Sends the screenshot, context snapshot and optional note to the OpenAI
//! Responses API and returns the generated reply text.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::context::ContextSnapshot;
use crate::prompt::build_user_prompt;
use crate::screen::CapturedScreen;
use crate::{Error, Result};

/// Everything the reasoning service sees for one cycle
#[derive(Debug, Clone)]
pub struct CycleRequest {
    /// Screenshot taken at the start of the cycle
    pub image: CapturedScreen,

    /// Context facts gathered for the cycle
    pub context: ContextSnapshot,

    /// Free-text note from the user (CLI or spoken after the wake word)
    pub note: Option<String>,

    /// Upper bound on generated tokens
    pub max_output_tokens: u32,
}

/// Turns a cycle request into reply text
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Generate a reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Reasoning` on transport, quota or response failures
    async fn generate(&self, request: &CycleRequest) -> Result<String>;
}

/// OpenAI Responses API request
#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_output_tokens: u32,
    input: Vec<InputMessage<'a>>,
}

/// One input message
#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Vec<InputContent<'a>>,
}

/// Input content part (text or image)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent<'a> {
    InputText { text: &'a str },
    InputImage { image_url: String },
}

/// OpenAI Responses API response
#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Reasoner backed by the OpenAI Responses API
pub struct OpenAiReasoner {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl OpenAiReasoner {
    /// Create a reasoner from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::Config("missing required environment variable: OPENAI_API_KEY".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        tracing::debug!(model = %config.model, base_url = %config.base_url, "reasoner initialized");

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
        })
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn generate(&self, request: &CycleRequest) -> Result<String> {
        let prompt = build_user_prompt(&request.context, request.note.as_deref());

        let mut user_content = vec![InputContent::InputText { text: &prompt }];
        if request.image.bytes.is_empty() {
            tracing::warn!("screenshot is empty, sending text only");
        } else {
            user_content.push(InputContent::InputImage {
                image_url: data_url(&request.image),
            });
        }

        let body = ResponsesRequest {
            model: &self.model,
            temperature: self.temperature,
            max_output_tokens: request.max_output_tokens,
            input: vec![
                InputMessage {
                    role: "system",
                    content: vec![InputContent::InputText {
                        text: &self.system_prompt,
                    }],
                },
                InputMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };

        tracing::debug!(
            model = %self.model,
            image_bytes = request.image.bytes.len(),
            context_facts = request.context.len(),
            "sending reasoning request"
        );

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Reasoning(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Reasoning(format!("OpenAI API error {status}: {body}")));
        }

        let parsed: ResponsesResponse = response
            .json()
            .await
            .map_err(|e| Error::Reasoning(format!("parse error: {e}")))?;

        let text = extract_text(parsed)?;
        tracing::debug!(response_len = text.len(), "reasoning complete");
        Ok(text)
    }
}

/// Encode the screenshot as a `data:` URL
fn data_url(image: &CapturedScreen) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
    format!("data:{};base64,{encoded}", image.mime_type)
}

/// Pull reply text out of a response body
fn extract_text(response: ResponsesResponse) -> Result<String> {
    if let Some(text) = response.output_text.as_deref().map(str::trim) {
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }

    let text = response
        .output
        .into_iter()
        .flat_map(|item| item.content)
        .filter(|c| c.kind == "output_text")
        .filter_map(|c| c.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        return Err(Error::Reasoning("response did not contain text output".to_string()));
    }
    Ok(text)
}
