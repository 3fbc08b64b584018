/*!
 * Instrumentation for tracking LLM call statistics
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe statistics tracker for LLM calls
///
/// Cheap to clone and share: workers hand the same tracker to every caller
/// and snapshot it at shutdown.
#[derive(Debug, Clone)]
pub struct LlmStats {
    inner: Arc<LlmStatsInner>,
}

#[derive(Debug)]
struct LlmStatsInner {
    // Call counts
    total_calls: AtomicU64,
    failed_calls: AtomicU64,

    // Fallback events
    sampling_param_rejections: AtomicU64,
    stop_sequence_retries: AtomicU64,

    // Token accounting
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,

    // Timing
    total_latency_ms: AtomicU64,
    start_time: Instant,
}

impl LlmStats {
    /// Create a new statistics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LlmStatsInner {
                total_calls: AtomicU64::new(0),
                failed_calls: AtomicU64::new(0),
                sampling_param_rejections: AtomicU64::new(0),
                stop_sequence_retries: AtomicU64::new(0),
                prompt_tokens: AtomicU64::new(0),
                completion_tokens: AtomicU64::new(0),
                total_latency_ms: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// Record a completed call with its token usage
    pub fn record_call(&self, latency_ms: u64, prompt_tokens: u64, completion_tokens: u64) {
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.inner
            .prompt_tokens
            .fetch_add(prompt_tokens, Ordering::Relaxed);
        self.inner
            .completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    /// Record a failed call
    pub fn record_failure(&self, latency_ms: u64) {
        self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.failed_calls.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Record a sampling-parameter rejection that triggered a stripped retry
    pub fn record_sampling_rejection(&self) {
        self.inner
            .sampling_param_rejections
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stop-sequence fallback retry
    pub fn record_stop_sequence_retry(&self) {
        self.inner
            .stop_sequence_retries
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counters
    pub fn snapshot(&self) -> LlmStatsSnapshot {
        LlmStatsSnapshot {
            total_calls: self.inner.total_calls.load(Ordering::Relaxed),
            failed_calls: self.inner.failed_calls.load(Ordering::Relaxed),
            sampling_param_rejections: self
                .inner
                .sampling_param_rejections
                .load(Ordering::Relaxed),
            stop_sequence_retries: self.inner.stop_sequence_retries.load(Ordering::Relaxed),
            prompt_tokens: self.inner.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.inner.completion_tokens.load(Ordering::Relaxed),
            total_latency_ms: self.inner.total_latency_ms.load(Ordering::Relaxed),
            uptime_secs: self.inner.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for LlmStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the tracked counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmStatsSnapshot {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub sampling_param_rejections: u64,
    pub stop_sequence_retries: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_latency_ms: u64,
    pub uptime_secs: u64,
}

impl LlmStatsSnapshot {
    /// Total tokens across prompts and completions
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Mean latency per call in milliseconds
    pub fn mean_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_calls as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = LlmStats::new();
        stats.record_call(120, 500, 200);
        stats.record_call(80, 300, 100);
        stats.record_failure(40);
        stats.record_sampling_rejection();
        stats.record_stop_sequence_retry();

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.failed_calls, 1);
        assert_eq!(snap.sampling_param_rejections, 1);
        assert_eq!(snap.stop_sequence_retries, 1);
        assert_eq!(snap.prompt_tokens, 800);
        assert_eq!(snap.completion_tokens, 300);
        assert_eq!(snap.total_tokens(), 1100);
        assert_eq!(snap.total_latency_ms, 240);
        assert_eq!(snap.mean_latency_ms(), 80.0);
    }

    #[test]
    fn test_shared_across_clones() {
        let stats = LlmStats::new();
        let clone = stats.clone();
        clone.record_call(10, 1, 1);
        assert_eq!(stats.snapshot().total_calls, 1);
    }
}
