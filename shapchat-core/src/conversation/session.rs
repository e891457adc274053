//! Conversation Session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapchatError};
use crate::persona::Persona;
use crate::tokenizer::SharedTokenCounter;

use super::history::{HistoryConfig, HistoryStore, TrimReport};
use super::message::Message;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Turns may start
    Active,
    /// The critical context overflowed the budget; the user has to raise the budget or
    /// reset before another turn starts
    BudgetBlocked { critical: usize, budget: usize },
    /// Session has ended
    Ended,
}

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Completed exchanges
    pub turn_count: usize,
    /// Persona the session runs under
    pub persona: Option<String>,
}

impl SessionMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            turn_count: 0,
            persona: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// One conversation: its history, persona and lifecycle state
#[derive(Debug)]
pub struct ConversationSession {
    id: String,
    state: SessionState,
    history: HistoryStore,
    persona: Option<Persona>,
    metadata: SessionMetadata,
}

impl ConversationSession {
    /// Create a session with a random id
    pub fn new(config: HistoryConfig, counter: SharedTokenCounter) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), config, counter)
    }

    pub fn with_id(id: impl Into<String>, config: HistoryConfig, counter: SharedTokenCounter) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Active,
            history: HistoryStore::new(config, counter),
            persona: None,
            metadata: SessionMetadata::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn persona(&self) -> Option<&Persona> {
        self.persona.as_ref()
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.state, SessionState::BudgetBlocked { .. })
    }

    /// Adopt a persona and install its system prompt as message 0.
    /// A session takes exactly one persona.
    pub fn install_persona(&mut self, persona: Persona) -> Result<()> {
        if self.persona.is_some() {
            return Err(ShapchatError::InvalidMessage(
                "session already has a persona".to_string(),
            ));
        }
        self.history
            .append(Message::system(persona.system_prompt.clone()))?;
        self.metadata.persona = Some(persona.role_key.clone());
        self.metadata.touch();
        self.persona = Some(persona);
        Ok(())
    }

    /// Append the user side of a new turn
    pub fn begin_turn(&mut self, content: impl Into<String>) -> Result<()> {
        self.ensure_active()?;
        self.history.append(Message::user(content))?;
        self.metadata.touch();
        Ok(())
    }

    /// Commit the assistant reply and enforce the budget. On overflow the session
    /// moves to [`SessionState::BudgetBlocked`] and the error is returned.
    pub fn complete_turn(&mut self, reply: Message) -> Result<TrimReport> {
        self.history.append(reply)?;
        self.metadata.turn_count += 1;
        self.metadata.touch();
        self.enforce()
    }

    /// Drop the user message of a turn whose exchange was abandoned
    pub fn abandon_turn(&mut self) -> Option<Message> {
        let retracted = self.history.retract_pending_user();
        if retracted.is_some() {
            self.metadata.touch();
        }
        retracted
    }

    /// Raise (or lower) the budget and re-enforce it
    pub fn set_budget(&mut self, budget: usize) -> Result<TrimReport> {
        self.history.set_budget(budget);
        self.enforce()
    }

    /// Forget the conversation but keep the system prompt; unblocks the session
    pub fn reset(&mut self) -> usize {
        let removed = self.history.discard_conversation();
        self.state = SessionState::Active;
        self.metadata.turn_count = 0;
        self.metadata.touch();
        removed
    }

    pub fn end(&mut self) {
        self.state = SessionState::Ended;
        self.metadata.touch();
    }

    fn enforce(&mut self) -> Result<TrimReport> {
        match self.history.enforce_budget() {
            Ok(report) => {
                if self.is_blocked() {
                    self.state = SessionState::Active;
                }
                Ok(report)
            }
            Err(ShapchatError::BudgetExceeded { critical, budget }) => {
                self.state = SessionState::BudgetBlocked { critical, budget };
                Err(ShapchatError::BudgetExceeded { critical, budget })
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::BudgetBlocked { critical, budget } => {
                Err(ShapchatError::BudgetExceeded { critical, budget })
            }
            SessionState::Ended => Err(ShapchatError::InvalidMessage(
                "session has ended".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaRegistry;
    use crate::tokenizer::HeuristicTokenCounter;
    use std::sync::Arc;

    fn session(budget: usize) -> ConversationSession {
        let counter = HeuristicTokenCounter::new("m")
            .with_chars_per_token(1.0)
            .with_message_overhead(0);
        ConversationSession::with_id(
            "test-session",
            HistoryConfig {
                budget,
                critical_head_size: 1,
                critical_tail_size: 2,
            },
            Arc::new(counter),
        )
    }

    #[test]
    fn test_session_creation() {
        let session = ConversationSession::new(
            HistoryConfig::default(),
            Arc::new(HeuristicTokenCounter::new("m")),
        );
        assert!(session.is_active());
        assert_eq!(session.id().len(), 36);
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_install_persona_once() {
        let mut session = session(100);
        let persona = PersonaRegistry::builtin().resolve("analyst").unwrap();

        session.install_persona(persona.clone()).unwrap();
        assert!(session.history().has_system_message());
        assert_eq!(session.metadata().persona.as_deref(), Some("analyst"));
        assert!(session.install_persona(persona).is_err());
    }

    #[test]
    fn test_turn_lifecycle() {
        let mut session = session(100);
        session.begin_turn("hello").unwrap();
        assert_eq!(session.abandon_turn().unwrap().content(), "hello");

        session.begin_turn("hello").unwrap();
        let report = session.complete_turn(Message::assistant("hi")).unwrap();
        assert!(!report.trimmed());
        assert_eq!(session.metadata().turn_count, 1);
        assert!(session.abandon_turn().is_none());
    }

    #[test]
    fn test_blocked_until_budget_raised() {
        let mut session = session(10);
        session.history_mut().append(Message::system("sys")).unwrap();
        session.begin_turn("0123456789").unwrap();

        let err = session.complete_turn(Message::assistant("abcdef")).unwrap_err();
        assert!(matches!(err, ShapchatError::BudgetExceeded { critical: 19, budget: 10 }));
        assert!(session.is_blocked());
        assert!(session.begin_turn("more").is_err());

        session.set_budget(50).unwrap();
        assert!(session.is_active());
        session.begin_turn("more").unwrap();
    }

    #[test]
    fn test_reset_unblocks_and_keeps_system_prompt() {
        let mut session = session(10);
        session.history_mut().append(Message::system("sys")).unwrap();
        session.begin_turn("0123456789").unwrap();
        assert!(session.complete_turn(Message::assistant("abcdef")).is_err());

        assert_eq!(session.reset(), 2);
        assert!(session.is_active());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.metadata().turn_count, 0);

        session.end();
        assert_eq!(session.state(), SessionState::Ended);
        assert!(session.begin_turn("late").is_err());
    }
}
