//! Generation backends
//!
//! [`LLMProvider`] is the seam between the conversation engine and a chat model. A
//! request carries the whole retained history plus the persona's sampling parameters;
//! the reply comes back whole or as an ordered fragment stream.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

/// Chat model used when none is configured
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-1106";

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A role-tagged message as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling parameters carried with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for generation (0.0-2.0)
    pub temperature: f32,

    /// Maximum tokens to generate for the response
    pub max_tokens: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<PromptMessage>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
}

impl LLMRequest {
    /// Create a request carrying the whole conversation and sampling parameters
    pub fn new(messages: Vec<PromptMessage>, params: SamplingParams) -> Self {
        Self {
            messages,
            temperature: Some(params.temperature),
            max_tokens: Some(params.max_tokens),
        }
    }

    /// Single user prompt without sampling parameters
    #[cfg(test)]
    pub(crate) fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![PromptMessage::new(MessageRole::User, prompt)],
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Ordered, finite sequence of content fragments. The end of the stream is the end marker;
/// an empty fragment is a heartbeat.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for generation backends.
///
/// Implementors accept an ordered list of role-tagged messages plus sampling
/// parameters and return either a completed message or a fragment stream.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a complete response in one round trip.
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Generate with streaming response.
    ///
    /// The default implementation wraps `generate_request` into a single-fragment stream.
    async fn generate_stream(&self, request: &LLMRequest) -> Result<FragmentStream> {
        let response = self.generate_request(request).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(response.content)])))
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

pub mod factory;
pub mod providers;
pub mod retry;
pub mod scripted;

pub use retry::{RetryConfig, RetryState, retry_dispatch};
pub use scripted::{ScriptedProvider, ScriptedReply};

pub use factory::LLMProviderFactory;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_request_carries_sampling_params() {
        let params = SamplingParams {
            temperature: 1.0,
            max_tokens: 300,
        };
        let request = LLMRequest::new(
            vec![PromptMessage::new(MessageRole::System, "You are helpful")],
            params,
        );

        assert_eq!(request.temperature, Some(1.0));
        assert_eq!(request.max_tokens, Some(300));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(MessageRole::System.as_str(), "system");
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[tokio::test]
    async fn test_default_stream_wraps_completion() {
        struct OneShot;

        #[async_trait]
        impl LLMProvider for OneShot {
            async fn generate_request(&self, _request: &LLMRequest) -> Result<LLMResponse> {
                Ok(LLMResponse {
                    content: "whole answer".to_string(),
                    usage: None,
                })
            }
        }

        let provider = OneShot;
        let mut stream = provider
            .generate_stream(&LLMRequest::from_prompt("hi"))
            .await
            .unwrap();

        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }
        assert_eq!(fragments, vec!["whole answer".to_string()]);
    }
}
