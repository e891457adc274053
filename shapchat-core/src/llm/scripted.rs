//! Deterministic provider that replays scripted replies
//!
//! Used for offline runs and tests: each request pops the next reply from the script
//! and every request is recorded for later inspection.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, ShapchatError};
use crate::llm::{FragmentStream, LLMProvider, LLMRequest, LLMResponse, ModelInfo};

/// One scripted backend behaviour
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these fragments, then end the stream
    Fragments(Vec<String>),
    /// Stream these fragments, each preceded by a delay
    Paced {
        fragments: Vec<String>,
        interval: Duration,
    },
    /// Stream these fragments, then fail mid-stream
    FailAfter {
        fragments: Vec<String>,
        error: String,
    },
    /// Stream these fragments, then never produce another item
    StallAfter(Vec<String>),
    /// Fail before any fragment is produced
    DispatchError(String),
}

impl ScriptedReply {
    /// A single-fragment reply
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Fragments(vec![text.into()])
    }

    /// A reply split into the given fragments
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Fragments(fragments.into_iter().map(Into::into).collect())
    }
}

/// Provider replaying a fixed script of replies
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl ScriptedProvider {
    /// Create a provider that answers requests with `replies`, in order
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of replies not yet consumed
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn next_reply(&self, request: &LLMRequest) -> Result<ScriptedReply> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| ShapchatError::Provider("script exhausted".to_string()))
    }
}

fn ok_items(fragments: Vec<String>) -> impl futures::Stream<Item = Result<String>> + Send {
    futures::stream::iter(fragments.into_iter().map(Ok))
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        match self.next_reply(request)? {
            ScriptedReply::Fragments(fragments)
            | ScriptedReply::Paced { fragments, .. }
            | ScriptedReply::StallAfter(fragments) => Ok(LLMResponse {
                content: fragments.concat(),
                usage: None,
            }),
            ScriptedReply::FailAfter { error, .. } | ScriptedReply::DispatchError(error) => {
                Err(ShapchatError::Provider(error))
            }
        }
    }

    async fn generate_stream(&self, request: &LLMRequest) -> Result<FragmentStream> {
        let stream: FragmentStream = match self.next_reply(request)? {
            ScriptedReply::Fragments(fragments) => Box::pin(ok_items(fragments)),
            ScriptedReply::Paced {
                fragments,
                interval,
            } => Box::pin(futures::stream::iter(fragments).then(move |fragment| async move {
                tokio::time::sleep(interval).await;
                Ok(fragment)
            })),
            ScriptedReply::FailAfter { fragments, error } => Box::pin(
                ok_items(fragments)
                    .chain(futures::stream::once(async move {
                        Err(ShapchatError::Provider(error))
                    })),
            ),
            ScriptedReply::StallAfter(fragments) => {
                Box::pin(ok_items(fragments).chain(futures::stream::pending()))
            }
            ScriptedReply::DispatchError(error) => return Err(ShapchatError::Provider(error)),
        };
        Ok(stream)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "scripted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedReply::text("first"),
            ScriptedReply::fragments(["sec", "ond"]),
        ]);

        let first = provider
            .generate_request(&LLMRequest::from_prompt("a"))
            .await
            .unwrap();
        assert_eq!(first.content, "first");

        let mut stream = provider
            .generate_stream(&LLMRequest::from_prompt("b"))
            .await
            .unwrap();
        let mut collected = String::new();
        while let Some(fragment) = stream.next().await {
            collected.push_str(&fragment.unwrap());
        }
        assert_eq!(collected, "second");
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let provider = ScriptedProvider::new(Vec::new());
        let result = provider.generate_stream(&LLMRequest::from_prompt("a")).await;
        assert!(matches!(result, Err(ShapchatError::Provider(_))));
    }

    #[tokio::test]
    async fn test_fail_after_yields_error_last() {
        let provider = ScriptedProvider::new(vec![ScriptedReply::FailAfter {
            fragments: vec!["a".to_string()],
            error: "reset".to_string(),
        }]);

        let mut stream = provider
            .generate_stream(&LLMRequest::from_prompt("a"))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert!(stream.next().await.unwrap().is_err());
    }
}
