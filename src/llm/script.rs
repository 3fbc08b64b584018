//! Scripted LLM provider for tests and offline runs
//!
//! Replays a queue of canned steps, one per `generate` call, and records
//! every request it sees. Once the script runs dry it falls back to a
//! handler closure when one is installed, or repeats the last reply.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse};
use crate::error::{classify_message, EngineError, Result};

type Handler = dyn Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync;

/// One scripted step
#[derive(Clone)]
pub enum ScriptStep {
    /// Succeed with this response
    Reply(LlmResponse),
    /// Fail with a provider error classified from the message
    Fail(String),
}

impl ScriptStep {
    /// A plain successful reply
    pub fn reply(text: &str) -> Self {
        ScriptStep::Reply(response(text, "stop", Vec::new()))
    }

    /// A reply with an explicit finish reason ("length" for truncation)
    pub fn reply_with_finish(text: &str, finish_reason: &str) -> Self {
        ScriptStep::Reply(response(text, finish_reason, Vec::new()))
    }

    /// A reply carrying extra samples, as an n>1 call would return
    pub fn reply_multi(texts: &[&str]) -> Self {
        let mut iter = texts.iter();
        let first = iter.next().copied().unwrap_or_default();
        let alternates = iter.map(|t| t.to_string()).collect();
        ScriptStep::Reply(response(first, "stop", alternates))
    }

    /// A provider failure
    pub fn fail(message: &str) -> Self {
        ScriptStep::Fail(message.to_string())
    }
}

fn response(text: &str, finish_reason: &str, alternates: Vec<String>) -> LlmResponse {
    let completion_tokens = (text.split_whitespace().count() as u64).max(1);
    LlmResponse {
        text: text.to_string(),
        alternates,
        prompt_tokens: 40,
        completion_tokens,
        total_tokens: 40 + completion_tokens,
        finish_reason: finish_reason.to_string(),
    }
}

/// Scripted provider
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    handler: Option<Box<Handler>>,
    last_reply: Mutex<Option<LlmResponse>>,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    /// A provider that replays the given steps in order
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            handler: None,
            last_reply: Mutex::new(None),
            latency: None,
        }
    }

    /// A provider driven entirely by a handler closure
    pub fn with_handler(
        handler: impl Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            handler: Some(Box::new(handler)),
            last_reply: Mutex::new(None),
            latency: None,
        }
    }

    /// Add a fixed per-call latency, for deadline tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Handle to the recorded requests
    pub fn requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Build a plain reply response (for handlers)
    pub fn text_response(text: &str) -> LlmResponse {
        response(text, "stop", Vec::new())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let step = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match step {
            Some(ScriptStep::Reply(reply)) => {
                *self.last_reply.lock().unwrap_or_else(|e| e.into_inner()) = Some(reply.clone());
                Ok(reply)
            }
            Some(ScriptStep::Fail(message)) => Err(EngineError::Provider {
                kind: classify_message(&message),
                message,
            }),
            None => {
                if let Some(handler) = &self.handler {
                    return handler(request);
                }
                let last = self
                    .last_reply
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                last.ok_or_else(|| EngineError::Provider {
                    kind: classify_message("script exhausted"),
                    message: "script exhausted with no fallback reply".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineErrorKind;

    #[tokio::test]
    async fn test_replays_steps_then_repeats_last() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep::reply("first"),
            ScriptStep::reply("second"),
        ]);
        let request = LlmRequest::new("gpt-4o", "s", "u");

        assert_eq!(provider.generate(&request).await.unwrap().text, "first");
        assert_eq!(provider.generate(&request).await.unwrap().text, "second");
        // Script dry: repeats the last reply
        assert_eq!(provider.generate(&request).await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_fail_step_classifies() {
        let provider = ScriptedProvider::new(vec![ScriptStep::fail("request timed out")]);
        let err = provider
            .generate(&LlmRequest::new("m", "s", "u"))
            .await
            .unwrap_err();
        match err {
            EngineError::Provider { kind, .. } => assert_eq!(kind, LineErrorKind::Timeout),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_handler_mode() {
        let provider = ScriptedProvider::with_handler(|request| {
            Ok(ScriptedProvider::text_response(&format!(
                "echo: {}",
                request.user
            )))
        });
        let reply = provider
            .generate(&LlmRequest::new("m", "s", "hello"))
            .await
            .unwrap();
        assert_eq!(reply.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_multi_sample_reply() {
        let provider = ScriptedProvider::new(vec![ScriptStep::reply_multi(&["a", "b", "c"])]);
        let reply = provider
            .generate(&LlmRequest::new("m", "s", "u"))
            .await
            .unwrap();
        assert_eq!(reply.all_texts(), vec!["a", "b", "c"]);
    }
}
