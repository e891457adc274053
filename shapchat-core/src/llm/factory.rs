//! Factory for creating LLM providers from configuration

use crate::config::{LLMProviderConfig, LLMProviderKind};
use crate::error::Result;
use crate::llm::LLMProvider;
use std::sync::Arc;

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::{DEFAULT_MODEL, OpenAIProvider};

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be created (e.g., missing API key)
    pub fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        match config.provider {
            #[cfg(feature = "llm-openai")]
            LLMProviderKind::OpenAI => {
                let model = if !config.model.is_empty() {
                    Some(config.model.clone())
                } else {
                    None
                };

                let provider = if let Some(api_key) = &config.api_key {
                    let model_str = model
                        .or_else(|| std::env::var("OPENAI_MODEL").ok())
                        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

                    if let Some(base_url) = &config.base_url {
                        OpenAIProvider::with_base_url(api_key.clone(), model_str, base_url.clone())
                    } else {
                        OpenAIProvider::new(api_key.clone(), model_str)
                    }
                } else {
                    OpenAIProvider::from_env(model)?
                };

                tracing::debug!(model = provider.model(), "Created OpenAI provider");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-openai"))]
            LLMProviderKind::OpenAI => Err(crate::error::ShapchatError::Configuration(
                "OpenAI provider requires 'llm-openai' feature".to_string(),
            )),
        }
    }
}
