//! LLM call wrapper: capability gating, fallbacks, and usage tracking
//!
//! # Overview
//!
//! All generation flows through [`LlmCaller::call`], which wraps the raw
//! provider with three behaviors the rest of the engine depends on:
//!
//! 1. **Capability gating** — sampling parameters are stripped before the
//!    first call for model families that reject them, and stop sequences are
//!    dropped for families that do not support them.
//! 2. **Rejected-parameter fallback** — if the provider rejects a sampling
//!    parameter by error message anyway, the call is retried once with all
//!    sampling parameters removed.
//! 3. **Stop-sequence fallback** — when strict JSON output was requested
//!    together with stop sequences and the caller's parse probe reports a
//!    truncation-looking failure, the call is retried once with stop
//!    sequences removed.
//!
//! Every call records latency, token usage, and fallback events into the
//! caller-supplied [`LlmStats`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::instrumentation::LlmStats;

pub mod capability;
pub mod script;

pub use capability::{capability_for, is_restricted, ModelCapability, TokenLimitParam};
pub use script::ScriptedProvider;

/// Requested response format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// One generation request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<u64>,
    pub response_format: Option<ResponseFormat>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    /// Samples requested in one call (legacy models only)
    pub n: Option<u32>,
}

impl LlmRequest {
    /// A bare request with everything optional unset
    pub fn new(model: &str, system: &str, user: &str) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
            temperature: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            seed: None,
            response_format: None,
            max_output_tokens: None,
            stop_sequences: Vec::new(),
            n: None,
        }
    }

    /// Any sampling knob set?
    pub fn has_sampling_params(&self) -> bool {
        self.temperature.is_some()
            || self.top_p.is_some()
            || self.presence_penalty.is_some()
            || self.frequency_penalty.is_some()
            || self.seed.is_some()
    }

    /// Remove every sampling knob
    pub fn strip_sampling_params(&mut self) {
        self.temperature = None;
        self.top_p = None;
        self.presence_penalty = None;
        self.frequency_penalty = None;
        self.seed = None;
    }
}

/// One generation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    /// Additional samples when `n > 1` was honored
    #[serde(default)]
    pub alternates: Vec<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Provider-reported finish reason: "stop", "length", ...
    pub finish_reason: String,
}

impl LlmResponse {
    /// All returned samples, primary first
    pub fn all_texts(&self) -> Vec<&str> {
        std::iter::once(self.text.as_str())
            .chain(self.alternates.iter().map(String::as_str))
            .collect()
    }
}

/// The provider seam
///
/// Implementations classify upstream failures into
/// `EngineError::Provider { kind, .. }` via `error::classify_message` so the
/// retry machinery can tell transient from fatal.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

/// Parse probe supplied by callers requesting strict JSON
///
/// Returns the parse error message when the text does not parse; the wrapper
/// inspects it for truncation symptoms.
pub type ParseProbe<'a> = &'a (dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync);

/// Outcome of a wrapped call
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub response: LlmResponse,
    pub latency_ms: u64,
    pub sampling_stripped: bool,
    pub stop_sequences_stripped: bool,
}

/// The call wrapper
#[derive(Clone)]
pub struct LlmCaller {
    provider: Arc<dyn LlmProvider>,
    stats: LlmStats,
}

impl LlmCaller {
    pub fn new(provider: Arc<dyn LlmProvider>, stats: LlmStats) -> Self {
        Self { provider, stats }
    }

    /// The shared statistics tracker
    pub fn stats(&self) -> &LlmStats {
        &self.stats
    }

    /// Execute a call with capability gating and fallbacks
    pub async fn call(
        &self,
        mut request: LlmRequest,
        parse_probe: Option<ParseProbe<'_>>,
    ) -> Result<CallOutcome> {
        let caps = capability_for(&request.model);
        let mut sampling_stripped = false;
        let mut stop_stripped = false;

        if !caps.accepts_sampling_params && request.has_sampling_params() {
            debug!(model = %request.model, "stripping sampling params for restricted model");
            request.strip_sampling_params();
            sampling_stripped = true;
        }
        if !caps.supports_stop_sequences && !request.stop_sequences.is_empty() {
            debug!(model = %request.model, "dropping stop sequences for model without support");
            request.stop_sequences.clear();
            stop_stripped = true;
        }
        if !caps.supports_multi_sample {
            request.n = None;
        }

        let start = Instant::now();

        let mut response = match self.provider.generate(&request).await {
            Ok(response) => response,
            Err(EngineError::Provider { kind, message })
                if request.has_sampling_params() && is_sampling_rejection(&message) =>
            {
                warn!(
                    model = %request.model,
                    kind = %kind,
                    "provider rejected sampling parameter, retrying stripped"
                );
                self.stats.record_sampling_rejection();
                request.strip_sampling_params();
                sampling_stripped = true;
                match self.provider.generate(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        self.stats.record_failure(elapsed_ms(start));
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                self.stats.record_failure(elapsed_ms(start));
                return Err(e);
            }
        };

        // Stop-sequence fallback: strict JSON + stop sequences + a parse
        // probe that reports truncation
        if let Some(probe) = parse_probe {
            if request.response_format == Some(ResponseFormat::JsonObject)
                && !request.stop_sequences.is_empty()
            {
                if let Err(parse_error) = probe(&response.text) {
                    if looks_truncated(&parse_error, &response.finish_reason) {
                        warn!(
                            model = %request.model,
                            error = %parse_error,
                            "truncation-looking parse failure, retrying without stop sequences"
                        );
                        self.stats.record_stop_sequence_retry();
                        request.stop_sequences.clear();
                        stop_stripped = true;
                        response = match self.provider.generate(&request).await {
                            Ok(response) => response,
                            Err(e) => {
                                self.stats.record_failure(elapsed_ms(start));
                                return Err(e);
                            }
                        };
                    }
                }
            }
        }

        let latency_ms = elapsed_ms(start);
        self.stats
            .record_call(latency_ms, response.prompt_tokens, response.completion_tokens);
        debug!(
            model = %request.model,
            latency_ms,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            finish_reason = %response.finish_reason,
            "llm call completed"
        );

        Ok(CallOutcome {
            response,
            latency_ms,
            sampling_stripped,
            stop_sequences_stripped: stop_stripped,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Does this error message look like a rejected sampling parameter?
fn is_sampling_rejection(message: &str) -> bool {
    let lowered = message.to_lowercase();
    let names_param = ["temperature", "top_p", "presence_penalty", "frequency_penalty", "seed"]
        .iter()
        .any(|p| lowered.contains(p));
    let rejects = lowered.contains("unsupported")
        || lowered.contains("not supported")
        || lowered.contains("does not support")
        || lowered.contains("invalid parameter");
    names_param && rejects
}

/// Does this parse failure look like a truncated response?
fn looks_truncated(parse_error: &str, finish_reason: &str) -> bool {
    let lowered = parse_error.to_lowercase();
    finish_reason == "length"
        || lowered.contains("eof")
        || lowered.contains("unexpected end")
        || lowered.contains("truncat")
}
