//! Conversation orchestrator
//!
//! Drives the turn loop: read input, append the user message, run a streaming exchange,
//! commit the reply and enforce the token budget. A budget overflow blocks the session
//! until the user raises the budget or resets; an interrupted exchange abandons the turn
//! and leaves the history as it was before the turn started.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationSession, HistoryConfig, TrimReport};
use crate::error::{ErrorKind, InterruptReason, Result, ShapchatError};
use crate::exchange::{StreamConfig, StreamingExchange};
use crate::input::InputSource;
use crate::llm::{LLMProvider, RetryConfig};
use crate::persona::Persona;
use crate::render::{NoticeLevel, Renderer, guard};
use crate::tokenizer::SharedTokenCounter;

const HELP: &str = "Commands: /tokens (show usage), /budget <n> (change the token budget), \
                    /reset (forget the conversation, keep the persona), /help. \
                    Type exit or quit to leave.";

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub history: HistoryConfig,
    pub stream: StreamConfig,
    pub retry: RetryConfig,
    /// Inputs that end the session, compared case-insensitively
    pub exit_sentinels: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            stream: StreamConfig::default(),
            retry: RetryConfig::default(),
            exit_sentinels: vec!["exit".to_string(), "quit".to_string()],
        }
    }
}

/// How a single turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply committed and budget enforced
    Completed(TrimReport),
    /// The exchange was abandoned; the user message was retracted
    Interrupted(InterruptReason),
    /// Reply committed but the critical context exceeds the budget
    Blocked { critical: usize, budget: usize },
}

/// Cloneable handle for interrupting a running orchestrator from another task
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    active: Arc<Mutex<Option<CancellationToken>>>,
    shutdown: CancellationToken,
}

impl InterruptHandle {
    /// Cancel the exchange in flight. Returns `false` when nothing is streaming.
    pub fn interrupt(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop the session at the next suspension point
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Owner of one conversation session and its collaborators
pub struct ConversationOrchestrator<R, I> {
    provider: Arc<dyn LLMProvider>,
    session: ConversationSession,
    renderer: R,
    input: I,
    config: OrchestratorConfig,
    interrupt: InterruptHandle,
}

impl<R: Renderer, I: InputSource> ConversationOrchestrator<R, I> {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        counter: SharedTokenCounter,
        renderer: R,
        input: I,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            session: ConversationSession::new(config.history, counter),
            renderer,
            input,
            config,
            interrupt: InterruptHandle {
                active: Arc::new(Mutex::new(None)),
                shutdown: CancellationToken::new(),
            },
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ConversationSession {
        &mut self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    /// Install the persona's system prompt as the first message
    pub fn start(&mut self, persona: Persona) -> Result<()> {
        tracing::info!(
            session = %self.session.id(),
            persona = %persona.role_key,
            "Starting conversation"
        );
        self.session.install_persona(persona)
    }

    /// Send an already formatted opening prompt as the first user turn, without
    /// streaming, and show the answer.
    pub async fn send_opening(&mut self, prompt: &str) -> Result<TurnOutcome> {
        let persona = self.persona()?;
        self.session.begin_turn(prompt)?;

        let cancel = self.arm_exchange();
        let mut exchange = self.exchange();
        let result = exchange
            .complete(self.session.history().snapshot(), &persona, &cancel)
            .await;
        self.disarm_exchange();

        if let Ok(reply) = &result {
            guard(self.renderer.message(reply.content()), "message");
        }
        self.settle(result)
    }

    /// Run one turn for `text`
    pub async fn run_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        let persona = self.persona()?;
        self.session.begin_turn(text)?;

        let cancel = self.arm_exchange();
        let mut exchange = self.exchange();
        let result = exchange
            .run(
                self.session.history().snapshot(),
                &persona,
                &mut self.renderer,
                &cancel,
            )
            .await;
        self.disarm_exchange();

        self.settle(result)
    }

    /// Turn loop. Returns when the user exits, input ends or shutdown is requested.
    pub async fn run(&mut self) -> Result<()> {
        self.persona()?;

        loop {
            guard(self.renderer.prompt("(You): "), "prompt");

            let shutdown = self.interrupt.shutdown.clone();
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Ok(None),
                line = self.input.read_line() => line,
            };

            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == ErrorKind::Recoverable => {
                    tracing::warn!(error = %e, "Skipping unreadable input");
                    guard(
                        self.renderer.notice(
                            NoticeLevel::Warning,
                            "Could not read that line, please retype it.",
                        ),
                        "notice",
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(line) = line else {
                tracing::debug!("Input ended");
                break;
            };

            if self.is_exit(&line) {
                break;
            }
            if line.is_empty() {
                continue;
            }
            if let Some(command) = line.strip_prefix('/') {
                self.handle_command(command);
                continue;
            }
            if let Some(message) = self.blocked_notice() {
                guard(self.renderer.notice(NoticeLevel::Warning, &message), "notice");
                continue;
            }

            match self.run_turn(&line).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Fatal => return Err(e),
                Err(e) => guard(self.renderer.notice(NoticeLevel::Error, &e.to_string()), "notice"),
            }

            if self.interrupt.is_shutdown() {
                break;
            }
        }

        self.session.end();
        guard(self.renderer.notice(NoticeLevel::Info, "Goodbye!"), "notice");
        tracing::info!(
            session = %self.session.id(),
            turns = self.session.metadata().turn_count,
            "Conversation ended"
        );
        Ok(())
    }

    fn persona(&self) -> Result<Persona> {
        self.session
            .persona()
            .cloned()
            .ok_or_else(|| ShapchatError::InvalidState("no persona selected".to_string()))
    }

    fn exchange(&self) -> StreamingExchange {
        StreamingExchange::new(Arc::clone(&self.provider), self.config.stream)
            .with_retry(self.config.retry.clone())
    }

    fn arm_exchange(&self) -> CancellationToken {
        let token = self.interrupt.shutdown.child_token();
        *self
            .interrupt
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.clone());
        token
    }

    fn disarm_exchange(&self) {
        *self
            .interrupt
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Commit or abandon the turn depending on the exchange result
    fn settle(&mut self, result: Result<crate::conversation::Message>) -> Result<TurnOutcome> {
        let reply = match result {
            Ok(reply) => reply,
            Err(ShapchatError::StreamInterrupted { reason, fragments }) => {
                self.session.abandon_turn();
                let text = match &reason {
                    InterruptReason::Cancelled => "Response interrupted.".to_string(),
                    InterruptReason::Backend(msg) => {
                        format!("Response failed after {} fragment(s): {}", fragments, msg)
                    }
                };
                guard(self.renderer.notice(NoticeLevel::Warning, &text), "notice");
                return Ok(TurnOutcome::Interrupted(reason));
            }
            Err(e) => {
                self.session.abandon_turn();
                return Err(e);
            }
        };

        match self.session.complete_turn(reply) {
            Ok(report) => {
                if report.trimmed() {
                    tracing::debug!(
                        removed = report.removed,
                        tokens = report.tokens_after,
                        "Older messages dropped to stay within budget"
                    );
                }
                if self.session.history().estimated_count() > 0 {
                    tracing::warn!(
                        estimated = self.session.history().estimated_count(),
                        "Token counts include worst-case estimates"
                    );
                }
                Ok(TurnOutcome::Completed(report))
            }
            Err(ShapchatError::BudgetExceeded { critical, budget }) => {
                let err = ShapchatError::BudgetExceeded { critical, budget };
                guard(self.renderer.notice(NoticeLevel::Error, &err.to_string()), "notice");
                Ok(TurnOutcome::Blocked { critical, budget })
            }
            Err(e) => Err(e),
        }
    }

    fn is_exit(&self, line: &str) -> bool {
        self.config
            .exit_sentinels
            .iter()
            .any(|s| s.eq_ignore_ascii_case(line))
    }

    fn blocked_notice(&self) -> Option<String> {
        match self.session.state() {
            crate::conversation::SessionState::BudgetBlocked { critical, budget } => Some(format!(
                "The conversation needs {} tokens but the budget is {}. \
                 Use /budget <n> to raise it or /reset to start over.",
                critical, budget
            )),
            _ => None,
        }
    }

    fn handle_command(&mut self, command: &str) {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();

        let (level, text) = match name.as_str() {
            "help" => (NoticeLevel::Info, HELP.to_string()),
            "tokens" => {
                let history = self.session.history();
                let mut text = format!(
                    "{} / {} tokens across {} messages",
                    history.total_tokens(),
                    history.budget(),
                    history.len()
                );
                let estimated = history.estimated_count();
                if estimated > 0 {
                    text.push_str(&format!(" ({} estimated)", estimated));
                }
                (NoticeLevel::Info, text)
            }
            "budget" => match parts.next().map(str::parse::<usize>) {
                Some(Ok(budget)) if budget > 0 => match self.session.set_budget(budget) {
                    Ok(report) => (
                        NoticeLevel::Success,
                        format!(
                            "Budget set to {} tokens; {} message(s) dropped, {} tokens in use.",
                            budget, report.removed, report.tokens_after
                        ),
                    ),
                    Err(e) => (NoticeLevel::Error, e.to_string()),
                },
                _ => (
                    NoticeLevel::Error,
                    "Usage: /budget <n> with a positive token count".to_string(),
                ),
            },
            "reset" => {
                let removed = self.session.reset();
                (
                    NoticeLevel::Success,
                    format!("Conversation reset; {} message(s) discarded.", removed),
                )
            }
            _ => (
                NoticeLevel::Error,
                format!("Unknown command '/{}'. Type /help for the list.", name),
            ),
        };

        guard(self.renderer.notice(level, &text), "notice");
    }
}
