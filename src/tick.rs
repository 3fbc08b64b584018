//! Tick scheduler: advance one job under a per-job lock and a deadline
//!
//! # Overview
//!
//! One tick is one bounded slice of work for one job:
//!
//! 1. Acquire the `tick:{thread}` lock; bail quietly if another tick holds it
//! 2. Start a heartbeat extending the lock TTL while work proceeds
//! 3. Reconcile the job document and assert its invariants
//! 4. Pick up to N eligible chunks and claim them
//! 5. Check the per-user rate limit; revert the claim when exhausted
//! 6. Pre-warm the recipe cache so parallel chunk workers all hit it
//! 7. Process claimed chunks with bounded fan-out, each under the deadline
//! 8. Settle chunk outcomes back into the queue/active lists
//! 9. Run the auto-retry pass for failed lines
//! 10. Recompute job completion and release the lock (token-checked)

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::anchors::Anchor;
use crate::autoretry::run_auto_retry_pass;
use crate::chunkproc::{job_mut, ChunkProcessor, ChunkRunOutcome};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::job::{ChunkStatus, JobStatus};
use crate::kv::{KvStore, LockGuard};
use crate::state::{patch_with_retry, ThreadStateStore};

/// Minimum usable tick budget; below this no work is started
const MIN_TICK_BUDGET_MS: u64 = 1000;

/// Ticks allowed per thread per minute
const TICK_RATE_LIMIT_PER_MINUTE: i64 = 30;

/// Result of one tick
#[derive(Debug, Clone)]
pub struct TickResult {
    pub thread_id: String,
    pub picked: Vec<usize>,
    pub completed: Vec<usize>,
    pub failed: Vec<usize>,
    pub interrupted: Vec<usize>,
    pub lines_retried: usize,
    pub job_status: JobStatus,
}

impl TickResult {
    fn empty(thread_id: &str, job_status: JobStatus) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            picked: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            interrupted: Vec::new(),
            lines_retried: 0,
            job_status,
        }
    }
}

/// The tick runner
#[derive(Clone)]
pub struct TickRunner {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn ThreadStateStore>,
    processor: ChunkProcessor,
    config: EngineConfig,
}

impl TickRunner {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn ThreadStateStore>,
        processor: ChunkProcessor,
        config: EngineConfig,
    ) -> Self {
        Self {
            kv,
            store,
            processor,
            config,
        }
    }

    /// Run one tick for a thread
    ///
    /// Returns `None` when another tick holds the job lock.
    pub async fn run_tick(&self, thread_id: &str) -> Result<Option<TickResult>> {
        // A budget too small to translate anything: state untouched
        if self.config.max_processing_time_ms < MIN_TICK_BUDGET_MS {
            let status = self.current_status(thread_id).await?;
            return Ok(Some(TickResult::empty(thread_id, status)));
        }

        let lock_key = format!("tick:{thread_id}");
        let Some(mut guard) = LockGuard::acquire(
            Arc::clone(&self.kv),
            &lock_key,
            Duration::from_secs(self.config.tick_lock_ttl_secs),
        )
        .await?
        else {
            debug!(thread_id, "tick lock busy, skipping");
            return Ok(None);
        };
        guard.start_heartbeat(Duration::from_secs(self.config.tick_lock_ttl_secs / 3));

        let result = self.run_locked(thread_id).await;

        // The heartbeat stops before the conditional delete
        if !guard.release().await? {
            warn!(thread_id, "tick lock was no longer held at release");
        }
        result.map(Some)
    }

    async fn run_locked(&self, thread_id: &str) -> Result<TickResult> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.max_processing_time_ms);
        let debug_invariants = self.config.debug.invariants;

        // Reconcile and claim work in one optimistic transaction
        let (picked, _) = patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let job = job_mut(state)?;
            job.reconcile();

            let violations = job.check_invariants();
            if !violations.is_empty() {
                if cfg!(debug_assertions) && debug_invariants {
                    return Err(EngineError::Store(format!(
                        "job invariants violated: {}",
                        violations.join("; ")
                    )));
                }
                error!(job_id = %job.id, ?violations, "job invariants violated");
            }

            Ok(job.pick_work(Utc::now()))
        })
        .await?;

        let mut outcomes: Vec<ChunkRunOutcome> = Vec::new();
        let mut errored: Vec<(usize, String)> = Vec::new();

        if !picked.is_empty() {
            info!(thread_id, ?picked, "tick claimed chunks");

            // Lightweight per-user rate limit over the KV counter
            if !self.within_rate_limit(thread_id).await? {
                warn!(thread_id, "tick rate limit exhausted, reverting claim");
                self.revert_claim(thread_id, &picked).await?;
                let status = self.current_status(thread_id).await?;
                return Ok(TickResult::empty(thread_id, status));
            }

            // Pre-warm recipes so parallel chunk workers all hit the cache
            if let Err(e) = self.prewarm_recipes(thread_id).await {
                warn!(thread_id, error = %e, "recipe pre-warm failed, chunks will retry");
            }

            // Bounded chunk fan-out under the tick deadline
            let concurrency = self.config.effective_chunk_concurrency().max(1) as usize;
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let mut join_set = JoinSet::new();
            let anchors: Vec<Anchor> = Vec::new();

            for &chunk_index in &picked {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::Store(format!("semaphore: {e}")))?;
                let processor = self.processor.clone();
                let thread_id = thread_id.to_string();
                let anchors = anchors.clone();
                join_set.spawn(async move {
                    let result = processor
                        .process_chunk(&thread_id, chunk_index, &anchors, Some(deadline))
                        .await;
                    drop(permit);
                    (chunk_index, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => outcomes.push(outcome),
                    Ok((chunk_index, Err(e))) => {
                        error!(thread_id, chunk_index, error = %e, "chunk processing errored");
                        errored.push((chunk_index, e.to_string()));
                    }
                    Err(e) => error!(thread_id, error = %e, "chunk task panicked"),
                }
            }

            self.settle_outcomes(thread_id, &outcomes, &errored).await?;
        }

        // Auto-retry failed lines with remaining budget, still under the
        // lock; runs even on pick-free ticks so failed lines in terminal
        // chunks still recover
        let lines_retried = match run_auto_retry_pass(
            &self.store,
            self.processor.recipes(),
            self.processor.pipeline(),
            thread_id,
            Some(deadline),
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(thread_id, error = %e, "auto-retry pass failed");
                0
            }
        };

        let result = self.finish(thread_id, picked, outcomes, lines_retried).await;
        debug!(
            thread_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tick finished"
        );
        result
    }

    /// Move settled chunks out of `active`, requeue retries, record errors
    async fn settle_outcomes(
        &self,
        thread_id: &str,
        outcomes: &[ChunkRunOutcome],
        errored: &[(usize, String)],
    ) -> Result<()> {
        let outcomes = outcomes.to_vec();
        let errored = errored.to_vec();
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let job = job_mut(state)?;

            for outcome in &outcomes {
                let index = outcome.chunk_index;
                if outcome.interrupted {
                    // Stays processing, claimed in `active`; the next tick's
                    // reconciliation re-queues it
                    continue;
                }
                job.active.retain(|&i| i != index);
                if outcome.retry_scheduled && !job.queue.contains(&index) {
                    job.queue.push(index);
                }
            }

            for (index, message) in &errored {
                job.active.retain(|&i| i != *index);
                if let Some(chunk) = job.chunks.get_mut(index) {
                    if !chunk.status.is_terminal() {
                        chunk.status = ChunkStatus::Queued;
                        if !job.queue.contains(index) {
                            job.queue.push(*index);
                        }
                    }
                }
                job.last_error = Some(message.clone());
            }

            job.updated_at = Utc::now();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Recompute completion and build the tick result
    async fn finish(
        &self,
        thread_id: &str,
        picked: Vec<usize>,
        outcomes: Vec<ChunkRunOutcome>,
        lines_retried: usize,
    ) -> Result<TickResult> {
        let (job_status, _) =
            patch_with_retry(self.store.as_ref(), thread_id, move |state| {
                let job = job_mut(state)?;
                job.recompute_status();
                Ok(job.status)
            })
            .await?;

        let versioned = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;
        let job = versioned
            .state
            .translation_job
            .as_ref()
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;

        let mut result = TickResult::empty(thread_id, job_status);
        result.picked = picked;
        result.lines_retried = lines_retried;
        for outcome in outcomes {
            let status = job.chunks.get(&outcome.chunk_index).map(|c| c.status);
            match status {
                Some(ChunkStatus::Completed) => result.completed.push(outcome.chunk_index),
                Some(ChunkStatus::Failed) => result.failed.push(outcome.chunk_index),
                _ if outcome.interrupted => result.interrupted.push(outcome.chunk_index),
                _ => {}
            }
        }
        Ok(result)
    }

    async fn within_rate_limit(&self, thread_id: &str) -> Result<bool> {
        let key = format!("ratelimit:tick:{thread_id}");
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, Duration::from_secs(60)).await?;
        }
        Ok(count <= TICK_RATE_LIMIT_PER_MINUTE)
    }

    /// Return claimed chunks to the queue after a rate-limit rejection
    async fn revert_claim(&self, thread_id: &str, picked: &[usize]) -> Result<()> {
        let picked = picked.to_vec();
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let job = job_mut(state)?;
            for index in &picked {
                if let Some(chunk) = job.chunks.get_mut(index) {
                    if chunk.status == ChunkStatus::Processing {
                        chunk.status = ChunkStatus::Queued;
                    }
                }
                job.active.retain(|&i| i != *index);
                if !job.queue.contains(index) {
                    job.queue.push(*index);
                }
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn prewarm_recipes(&self, thread_id: &str) -> Result<()> {
        let versioned = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;
        let tcx = crate::chunkproc::ThreadContext::from_state(thread_id, &versioned.state)?;
        let recipe_ctx = tcx.recipe_context(&versioned.state);
        self.processor
            .recipes()
            .get_or_create(&recipe_ctx, &tcx.model)
            .await?;
        Ok(())
    }

    async fn current_status(&self, thread_id: &str) -> Result<JobStatus> {
        let versioned = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;
        Ok(versioned
            .state
            .translation_job
            .as_ref()
            .map(|j| j.status)
            .unwrap_or(JobStatus::Pending))
    }
}
