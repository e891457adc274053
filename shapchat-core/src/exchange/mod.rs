//! Streaming exchange
//!
//! One request/response cycle with the generation backend. The exchange dispatches the
//! conversation, accumulates fragments in receipt order and hands back the finished
//! assistant message. It never touches the history: committing the reply is the
//! caller's job, so an aborted exchange leaves nothing behind.
//!
//! ```text
//! Idle -> Dispatching -> Streaming -> Finalized
//!              |             |
//!              +-> Aborted <-+
//! ```

mod throttle;

pub use throttle::RefreshThrottle;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conversation::Message;
use crate::error::{InterruptReason, Result, ShapchatError};
use crate::llm::{LLMProvider, LLMRequest, PromptMessage, RetryConfig, retry_dispatch};
use crate::persona::Persona;
use crate::render::{Renderer, guard};

/// Streaming presentation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum renderer refreshes per second while a response streams
    pub refresh_per_second: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            refresh_per_second: 4,
        }
    }
}

/// Lifecycle of a [`StreamingExchange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Dispatching,
    Streaming,
    Finalized,
    Aborted,
}

/// Fragments received so far, in receipt order
#[derive(Debug, Default)]
pub struct StreamBuffer {
    text: String,
    fragments: usize,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Empty fragments are heartbeats and are ignored.
    pub fn push(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        self.text.push_str(fragment);
        self.fragments += 1;
        true
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Non-empty fragments received
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// A single request/response cycle. Single-use: a second run is rejected.
pub struct StreamingExchange {
    provider: Arc<dyn LLMProvider>,
    retry: RetryConfig,
    stream_config: StreamConfig,
    state: ExchangeState,
}

impl StreamingExchange {
    pub fn new(provider: Arc<dyn LLMProvider>, stream_config: StreamConfig) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
            stream_config,
            state: ExchangeState::Idle,
        }
    }

    /// Set the retry policy for dispatch failures
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Stream a reply to `history` under `persona`.
    ///
    /// The renderer sees throttled updates with the full text so far. On completion the
    /// assistant message is returned; cancellation or a backend failure yields
    /// [`ShapchatError::StreamInterrupted`] and the partial text is dropped.
    pub async fn run(
        &mut self,
        history: Vec<PromptMessage>,
        persona: &Persona,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        self.begin()?;
        let request = LLMRequest::new(history, persona.sampling());
        tracing::info!(
            persona = %persona.role_key,
            messages = request.messages.len(),
            temperature = persona.temperature,
            max_tokens = persona.response_token_cap,
            "Dispatching streaming request"
        );

        let provider = Arc::clone(&self.provider);
        let retry = self.retry.clone();
        let dispatch = retry_dispatch(&retry, || provider.generate_stream(&request));

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(self.abort(InterruptReason::Cancelled, 0, renderer));
            }
            result = dispatch => match result {
                Ok(stream) => stream,
                Err(e) => {
                    return Err(self.abort(InterruptReason::Backend(e.to_string()), 0, renderer));
                }
            },
        };

        self.state = ExchangeState::Streaming;
        guard(renderer.stream_started(), "stream_started");

        let mut buffer = StreamBuffer::new();
        let mut throttle = RefreshThrottle::per_second(self.stream_config.refresh_per_second);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.abort(InterruptReason::Cancelled, buffer.fragments(), renderer));
                }
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Ok(fragment)) => {
                    if buffer.push(&fragment) && throttle.ready() {
                        guard(renderer.stream_update(buffer.text()), "stream_update");
                    }
                }
                Some(Err(e)) => {
                    let reason = InterruptReason::Backend(e.to_string());
                    return Err(self.abort(reason, buffer.fragments(), renderer));
                }
            }
        }

        self.state = ExchangeState::Finalized;
        guard(renderer.stream_finished(buffer.text()), "stream_finished");
        tracing::info!(
            fragments = buffer.fragments(),
            chars = buffer.text().len(),
            "Response stream finished"
        );

        Ok(Message::assistant(buffer.into_text()))
    }

    /// Fetch a reply in one round trip, without streaming.
    pub async fn complete(
        &mut self,
        history: Vec<PromptMessage>,
        persona: &Persona,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        self.begin()?;
        let request = LLMRequest::new(history, persona.sampling());
        tracing::info!(
            persona = %persona.role_key,
            messages = request.messages.len(),
            "Dispatching request"
        );

        let provider = Arc::clone(&self.provider);
        let retry = self.retry.clone();
        let dispatch = retry_dispatch(&retry, || provider.generate_request(&request));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InterruptReason::Cancelled),
            result = dispatch => result.map_err(|e| InterruptReason::Backend(e.to_string())),
        };

        match outcome {
            Ok(response) => {
                self.state = ExchangeState::Finalized;
                if let Some(usage) = &response.usage {
                    tracing::debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Backend reported usage"
                    );
                }
                Ok(Message::assistant(response.content))
            }
            Err(reason) => {
                self.state = ExchangeState::Aborted;
                tracing::info!(%reason, "Request abandoned");
                Err(ShapchatError::StreamInterrupted {
                    reason,
                    fragments: 0,
                })
            }
        }
    }

    fn begin(&mut self) -> Result<()> {
        if self.state != ExchangeState::Idle {
            return Err(ShapchatError::InvalidState(format!(
                "exchange already ran (state {:?})",
                self.state
            )));
        }
        self.state = ExchangeState::Dispatching;
        Ok(())
    }

    fn abort(
        &mut self,
        reason: InterruptReason,
        fragments: usize,
        renderer: &mut dyn Renderer,
    ) -> ShapchatError {
        if self.state == ExchangeState::Streaming {
            guard(renderer.stream_aborted(), "stream_aborted");
        }
        self.state = ExchangeState::Aborted;
        tracing::info!(%reason, fragments, "Response stream abandoned");
        ShapchatError::StreamInterrupted { reason, fragments }
    }
}
