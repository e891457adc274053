//! Presentation collaborator
//!
//! Renderers display notices and the response being streamed. Rendering is never
//! allowed to affect conversation state: callers go through [`guard`], which logs a
//! failed render and carries on.

use crate::error::Result;

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Display surface for the conversation
pub trait Renderer: Send {
    /// Show an input prompt such as `(You): `
    fn prompt(&mut self, label: &str) -> Result<()>;

    /// Show a status line or error report
    fn notice(&mut self, level: NoticeLevel, text: &str) -> Result<()>;

    /// A streamed response is about to start
    fn stream_started(&mut self) -> Result<()>;

    /// Throttled refresh with the full text accumulated so far
    fn stream_update(&mut self, text: &str) -> Result<()>;

    /// The stream completed; `text` is the final content
    fn stream_finished(&mut self, text: &str) -> Result<()>;

    /// The stream was abandoned; anything shown so far is void
    fn stream_aborted(&mut self) -> Result<()>;

    /// Show a complete, non-streamed assistant message
    fn message(&mut self, text: &str) -> Result<()>;
}

/// Log and swallow a rendering failure.
pub fn guard(result: Result<()>, action: &str) {
    if let Err(e) = result {
        tracing::warn!(action, error = %e, "Renderer failed");
    }
}

/// What a [`RecordingRenderer`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Prompt(String),
    Notice(NoticeLevel, String),
    StreamStarted,
    StreamUpdate(String),
    StreamFinished(String),
    StreamAborted,
    Message(String),
}

/// Renderer that records every call, for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    events: Vec<RenderEvent>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[RenderEvent] {
        &self.events
    }

    /// Number of throttled stream refreshes seen
    pub fn update_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, RenderEvent::StreamUpdate(_)))
            .count()
    }

    /// Notices at the given level
    pub fn notices(&self, level: NoticeLevel) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RenderEvent::Notice(l, text) if *l == level => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn prompt(&mut self, label: &str) -> Result<()> {
        self.events.push(RenderEvent::Prompt(label.to_string()));
        Ok(())
    }

    fn notice(&mut self, level: NoticeLevel, text: &str) -> Result<()> {
        self.events.push(RenderEvent::Notice(level, text.to_string()));
        Ok(())
    }

    fn stream_started(&mut self) -> Result<()> {
        self.events.push(RenderEvent::StreamStarted);
        Ok(())
    }

    fn stream_update(&mut self, text: &str) -> Result<()> {
        self.events.push(RenderEvent::StreamUpdate(text.to_string()));
        Ok(())
    }

    fn stream_finished(&mut self, text: &str) -> Result<()> {
        self.events.push(RenderEvent::StreamFinished(text.to_string()));
        Ok(())
    }

    fn stream_aborted(&mut self) -> Result<()> {
        self.events.push(RenderEvent::StreamAborted);
        Ok(())
    }

    fn message(&mut self, text: &str) -> Result<()> {
        self.events.push(RenderEvent::Message(text.to_string()));
        Ok(())
    }
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn prompt(&mut self, label: &str) -> Result<()> {
        (**self).prompt(label)
    }

    fn notice(&mut self, level: NoticeLevel, text: &str) -> Result<()> {
        (**self).notice(level, text)
    }

    fn stream_started(&mut self) -> Result<()> {
        (**self).stream_started()
    }

    fn stream_update(&mut self, text: &str) -> Result<()> {
        (**self).stream_update(text)
    }

    fn stream_finished(&mut self, text: &str) -> Result<()> {
        (**self).stream_finished(text)
    }

    fn stream_aborted(&mut self) -> Result<()> {
        (**self).stream_aborted()
    }

    fn message(&mut self, text: &str) -> Result<()> {
        (**self).message(text)
    }
}
