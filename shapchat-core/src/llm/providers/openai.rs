//! OpenAI chat completions provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::LinesStream;

use crate::error::{Result, ShapchatError};
use crate::llm::{
    FragmentStream, LLMProvider, LLMRequest, LLMResponse, ModelInfo, PromptMessage, TokenUsage,
};

pub use crate::llm::DEFAULT_MODEL;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions provider.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-3.5-turbo-1106", "gpt-4o")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL (for Azure OpenAI or compatible APIs).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OPENAI_API_KEY` - API key (required)
    /// - `OPENAI_MODEL` - Model name (optional, defaults to [`DEFAULT_MODEL`])
    /// - `OPENAI_BASE_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if OPENAI_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ShapchatError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OPENAI_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(&self, request: &LLMRequest, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn post(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ShapchatError::Provider(format!("Failed to send request: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = match serde_json::from_str::<ApiError>(&text) {
            Ok(error) => match error.error.error_type {
                Some(kind) => format!("{} ({})", error.error.message, kind),
                None => error.error.message,
            },
            Err(_) => text,
        };

        Err(ShapchatError::ProviderStatus {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn convert_messages(messages: &[PromptMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        })
        .collect()
}

/// One parsed SSE line.
#[derive(Debug, PartialEq)]
enum SseEvent {
    /// Content delta; empty for role-only or keep-alive chunks
    Fragment(String),
    /// The `[DONE]` end marker
    Done,
    /// Comment, blank line or non-data field
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ShapchatError::Provider(format!("Failed to parse stream chunk: {}", e)))?;

    let content = chunk
        .choices
        .first()
        .and_then(|choice| choice.delta.as_ref())
        .and_then(|delta| delta.content.clone())
        .unwrap_or_default();

    Ok(SseEvent::Fragment(content))
}

/// Turn SSE lines into content fragments.
///
/// The stream must finish with `[DONE]`; a body that ends without it yields a
/// final error so a cut-off reply is never taken as complete.
fn sse_fragments<S>(lines: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::io::Result<String>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(lines)), |state| async move {
        let Some(mut lines) = state else {
            return None;
        };
        loop {
            let item = match lines.next().await {
                Some(Ok(line)) => parse_sse_line(&line),
                Some(Err(e)) => Err(ShapchatError::Provider(format!("Stream read error: {}", e))),
                None => Err(ShapchatError::Provider(
                    "stream ended before [DONE]".to_string(),
                )),
            };
            match item {
                Ok(SseEvent::Fragment(content)) => return Some((Ok(content), Some(lines))),
                Ok(SseEvent::Skip) => continue,
                Ok(SseEvent::Done) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let response = self.post(&self.build_body(request, false)).await?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ShapchatError::Provider(format!("Failed to parse response: {}", e)))?;

        let content = body
            .choices
            .first()
            .ok_or_else(|| ShapchatError::Provider("API returned no choices".to_string()))?
            .message
            .as_ref()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LLMResponse { content, usage })
    }

    async fn generate_stream(&self, request: &LLMRequest) -> Result<FragmentStream> {
        let response = self.post(&self.build_body(request, true)).await?;

        // Convert response bytes to a stream of lines
        let bytes_stream = response.bytes_stream();
        let reader = tokio_util::io::StreamReader::new(
            bytes_stream.map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());

        let stream = sse_fragments(lines);
        Ok(Box::pin(stream))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}
