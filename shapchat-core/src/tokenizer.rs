//! Token counting for budget accounting
//!
//! Token costs are backend-model specific, so every counter is scoped to a model
//! identifier. Counting may fail; [`measure`] turns a failure into a conservative
//! estimate so budget enforcement keeps working in a degraded mode.

use std::sync::Arc;

use crate::error::{Result, ShapchatError};

/// Maps text to a token cost for one backend model.
pub trait TokenCounter: Send + Sync {
    /// Model identifier the counts are valid for
    fn model(&self) -> &str;

    /// Count tokens in a text
    fn count(&self, text: &str) -> Result<usize>;

    /// Tokens the backend adds around every message, whatever its content
    fn message_overhead(&self) -> usize {
        DEFAULT_MESSAGE_OVERHEAD
    }
}

/// Role framing per message when a counter does not know better
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

/// Arc-wrapped token counter for sharing between the store and its callers.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;

/// Token cost of one text, flagged when it is a fallback estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCost {
    pub tokens: usize,
    pub estimated: bool,
}

/// Upper bound used when a counter fails: one token per UTF-8 byte plus the
/// per-message overhead.
pub fn worst_case_estimate(text: &str, message_overhead: usize) -> usize {
    text.len() + message_overhead
}

/// Count `text`, falling back to [`worst_case_estimate`] on failure.
pub fn measure(counter: &dyn TokenCounter, text: &str) -> TokenCost {
    match counter.count(text) {
        Ok(tokens) => TokenCost {
            tokens,
            estimated: false,
        },
        Err(e) => {
            let tokens = worst_case_estimate(text, counter.message_overhead());
            tracing::warn!(
                model = counter.model(),
                error = %e,
                fallback_tokens = tokens,
                "Token counting failed, using worst-case estimate"
            );
            TokenCost {
                tokens,
                estimated: true,
            }
        }
    }
}

/// Heuristic counter using character-based estimation.
///
/// tokens ≈ ceil(chars / chars_per_token) plus a fixed per-message overhead for the
/// role framing the backend adds around every message.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    model: String,
    chars_per_token: f64,
    message_overhead: usize,
}

impl HeuristicTokenCounter {
    /// Create a counter with the default ratio (4 chars per token, 4 tokens overhead)
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            chars_per_token: 4.0,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }

    /// Set the characters-per-token ratio
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = ratio.max(0.1);
        self
    }

    /// Set the per-message overhead
    pub fn with_message_overhead(mut self, overhead: usize) -> Self {
        self.message_overhead = overhead;
        self
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn model(&self) -> &str {
        &self.model
    }

    fn count(&self, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(self.message_overhead);
        }

        let chars = text.chars().count() as f64;
        let tokens = (chars / self.chars_per_token).ceil() as usize;
        Ok(tokens + self.message_overhead)
    }

    fn message_overhead(&self) -> usize {
        self.message_overhead
    }
}

/// Counter that always fails, for exercising degraded mode.
#[derive(Debug, Clone, Default)]
pub struct FailingTokenCounter;

impl TokenCounter for FailingTokenCounter {
    fn model(&self) -> &str {
        "unavailable"
    }

    fn count(&self, _text: &str) -> Result<usize> {
        Err(ShapchatError::TokenizationFailure {
            model: "unavailable".to_string(),
            reason: "no tokenizer loaded".to_string(),
        })
    }
}
