//! Error types for Shapchat operations

/// Result type for Shapchat operations
pub type Result<T> = std::result::Result<T, ShapchatError>;

/// How a caller is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Report and re-prompt; no state was changed
    Recoverable,
    /// The current exchange cycle cannot continue until the caller intervenes
    CycleFatal,
    /// Operation continued on a fallback path
    Degraded,
    /// An exchange was abandoned before producing a message
    Aborted,
    /// Session cannot continue
    Fatal,
}

/// Why a streaming exchange stopped before finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptReason {
    /// Cancelled through the exchange's cancellation hook
    Cancelled,
    /// The backend failed while dispatching or streaming
    Backend(String),
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptReason::Cancelled => write!(f, "cancelled"),
            InterruptReason::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

/// Error types for Shapchat
#[derive(Debug, thiserror::Error)]
pub enum ShapchatError {
    /// Persona key not present in the registry
    #[error("Unknown role '{role}'. Available roles: {}", available.join(", "))]
    UnknownRole { role: String, available: Vec<String> },

    /// Critical head and tail alone do not fit the token budget
    #[error(
        "Token budget exceeded: critical context needs {critical} tokens but the budget is {budget}. \
         Raise the budget or reset the conversation"
    )]
    BudgetExceeded { critical: usize, budget: usize },

    /// Token counter could not measure a text
    #[error("Tokenization failed for model {model}: {reason}")]
    TokenizationFailure { model: String, reason: String },

    /// Streaming exchange aborted before finalization
    #[error("Response stream interrupted after {fragments} fragment(s): {reason}")]
    StreamInterrupted {
        reason: InterruptReason,
        fragments: usize,
    },

    /// Structural violation when appending to history
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A line of user input that could not be decoded
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persona definition rejected at registry load
    #[error("Invalid persona: {0}")]
    InvalidPersona(String),

    /// Generation backend error (transport, parsing, exhausted script)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Generation backend answered with a non-success HTTP status
    #[error("Provider returned HTTP {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ShapchatError {
    /// Category used by the orchestrator to pick a recovery path
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShapchatError::UnknownRole { .. }
            | ShapchatError::InvalidMessage(_)
            | ShapchatError::InvalidInput(_) => ErrorKind::Recoverable,
            ShapchatError::BudgetExceeded { .. } => ErrorKind::CycleFatal,
            ShapchatError::TokenizationFailure { .. } => ErrorKind::Degraded,
            ShapchatError::StreamInterrupted { .. } => ErrorKind::Aborted,
            _ => ErrorKind::Fatal,
        }
    }

    /// Whether the error is a user-initiated cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ShapchatError::StreamInterrupted {
                reason: InterruptReason::Cancelled,
                ..
            }
        )
    }
}

impl From<String> for ShapchatError {
    fn from(s: String) -> Self {
        ShapchatError::Other(s)
    }
}

impl From<&str> for ShapchatError {
    fn from(s: &str) -> Self {
        ShapchatError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ShapchatError {
    fn from(err: anyhow::Error) -> Self {
        ShapchatError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = ShapchatError::UnknownRole {
            role: "wizard".to_string(),
            available: vec!["beginner".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::Recoverable);
        assert!(err.to_string().contains("wizard"));
        assert!(err.to_string().contains("beginner"));

        let err = ShapchatError::BudgetExceeded {
            critical: 390,
            budget: 300,
        };
        assert_eq!(err.kind(), ErrorKind::CycleFatal);

        let err = ShapchatError::StreamInterrupted {
            reason: InterruptReason::Cancelled,
            fragments: 3,
        };
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(err.is_cancellation());

        let err = ShapchatError::InvalidInput("not UTF-8".to_string());
        assert_eq!(err.kind(), ErrorKind::Recoverable);

        let err = ShapchatError::Provider("boom".to_string());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_cancellation());
    }
}
