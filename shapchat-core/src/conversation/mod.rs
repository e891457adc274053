//! Conversation Session Management
//!
//! Multi-turn conversation state kept within a token budget.
//!
//! # Features
//!
//! - Immutable messages with lazily cached token costs
//! - Budget enforcement that keeps the critical head and tail and evicts the middle
//! - Session lifecycle (active, blocked on budget, ended)
//!
//! # Example
//!
//! ```rust,ignore
//! use shapchat_core::conversation::{HistoryConfig, HistoryStore, Message};
//!
//! let mut history = HistoryStore::new(HistoryConfig::default(), counter);
//! history.append(Message::system("You are helpful"))?;
//! history.append(Message::user("Hello!"))?;
//! history.append(Message::assistant("Hi there! How can I help?"))?;
//!
//! let report = history.enforce_budget()?;
//! ```

mod history;
mod message;
mod session;

pub use history::{HistoryConfig, HistoryStore, TrimReport};
pub use message::Message;
pub use session::{ConversationSession, SessionMetadata, SessionState};
