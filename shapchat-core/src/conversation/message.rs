//! Conversation messages

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::llm::{MessageRole, PromptMessage};
use crate::tokenizer::{TokenCost, TokenCounter, measure};

/// One turn of conversation text. Immutable once created; the token cost is computed
/// on first use and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    role: MessageRole,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    token_cost: OnceCell<TokenCost>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
            token_cost: OnceCell::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Token cost under `counter`, measured once and then cached
    pub fn token_cost(&self, counter: &dyn TokenCounter) -> TokenCost {
        *self
            .token_cost
            .get_or_init(|| measure(counter, &self.content))
    }

    /// Wire form sent to the backend
    pub fn to_prompt(&self) -> PromptMessage {
        PromptMessage::new(self.role, self.content.clone())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role && self.content == other.content
    }
}

impl Eq for Message {}
