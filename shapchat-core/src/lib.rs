//! # Shapchat - conversational explanations of model predictions
//!
//! Shapchat holds a multi-turn conversation with a generative text backend about a
//! machine-learning explanation. The core pieces are:
//! - A token-bounded conversation history that keeps the opening and newest exchanges
//!   and evicts the middle, oldest first, when the budget is exceeded
//! - A streaming exchange that accumulates response fragments with throttled rendering
//!   and cooperative cancellation
//! - A fixed registry of explanation personas (system prompt plus sampling parameters)
//! - An orchestrator that runs the turn loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shapchat_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ShapchatConfig::load()?;
//!     let provider = LLMProviderFactory::create(&config.llm)?;
//!     let counter = Arc::new(HeuristicTokenCounter::new(config.llm.model.clone()));
//!     let persona = config.persona_registry()?.resolve("analyst")?;
//!
//!     let mut orchestrator = ConversationOrchestrator::new(
//!         provider,
//!         counter,
//!         RecordingRenderer::new(),
//!         LineReader::stdin(),
//!         config.orchestrator_config(),
//!     );
//!     orchestrator.start(persona)?;
//!     orchestrator.run().await
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-openai` (default): OpenAI-compatible chat completions backend

pub mod config;
pub mod conversation;
pub mod error;
pub mod exchange;
pub mod input;
pub mod llm;
pub mod orchestrator;
pub mod persona;
pub mod render;
pub mod tokenizer;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LLMProviderConfig, LLMProviderKind, ShapchatConfig};
    pub use crate::conversation::{
        ConversationSession, HistoryConfig, HistoryStore, Message, SessionMetadata,
        SessionState, TrimReport,
    };
    pub use crate::error::{ErrorKind, InterruptReason, Result, ShapchatError};
    pub use crate::exchange::{
        ExchangeState, RefreshThrottle, StreamBuffer, StreamConfig, StreamingExchange,
    };
    pub use crate::input::{InputSource, LineReader};
    pub use crate::llm::{
        LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse, MessageRole, PromptMessage,
        RetryConfig, SamplingParams, ScriptedProvider, ScriptedReply,
    };
    pub use crate::orchestrator::{
        ConversationOrchestrator, InterruptHandle, OrchestratorConfig, TurnOutcome,
    };
    pub use crate::persona::{
        Persona, PersonaConfig, PersonaKind, PersonaRegistry, Selection, select_interactive,
    };
    pub use crate::render::{NoticeLevel, RecordingRenderer, Renderer};
    pub use crate::tokenizer::{
        HeuristicTokenCounter, SharedTokenCounter, TokenCost, TokenCounter,
    };
}
