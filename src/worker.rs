//! Background worker: poll both queues, dispatch ticks and alignments
//!
//! One worker process polls the alignment queue first (while under its
//! concurrency cap) and the translation queue otherwise. Translation
//! dequeues run one scheduler tick and re-enqueue the thread until its job
//! completes; alignment dequeues fan out onto bounded concurrent tasks.
//! SIGINT/SIGTERM flip a watch channel; the loop drains in-flight work and
//! exits cleanly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::align::AlignmentService;
use crate::error::Result;
use crate::job::{AlignmentStatus, JobStatus, TranslationStatus};
use crate::queues::{AlignmentJob, AlignmentQueue, TranslationQueue};
use crate::state::ThreadStateStore;
use crate::tick::TickRunner;

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Concurrent alignment tasks
    pub alignment_concurrency: usize,
    /// Idle sleep between empty polls
    pub poll_interval: Duration,
    /// Re-enqueue delay for incomplete jobs
    pub reenqueue_delay: Duration,
    /// Re-enqueue delay after a tick error
    pub error_reenqueue_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            alignment_concurrency: 4,
            poll_interval: Duration::from_millis(200),
            reenqueue_delay: Duration::from_secs(1),
            error_reenqueue_delay: Duration::from_secs(5),
        }
    }
}

/// The worker process loop
pub struct Worker {
    store: Arc<dyn ThreadStateStore>,
    tick_runner: TickRunner,
    alignment: AlignmentService,
    translation_queue: TranslationQueue,
    alignment_queue: AlignmentQueue,
    options: WorkerOptions,
    alignment_model: String,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ThreadStateStore>,
        tick_runner: TickRunner,
        alignment: AlignmentService,
        translation_queue: TranslationQueue,
        alignment_queue: AlignmentQueue,
        options: WorkerOptions,
        alignment_model: String,
    ) -> Self {
        Self {
            store,
            tick_runner,
            alignment,
            translation_queue,
            alignment_queue,
            options,
            alignment_model,
        }
    }

    /// Run until the shutdown channel flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("worker started");
        let mut alignment_tasks: JoinSet<(String, usize)> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Reap finished alignment tasks and clear their active flags
            while let Some(done) = alignment_tasks.try_join_next() {
                match done {
                    Ok((thread_id, line_index)) => {
                        if let Err(e) = self.alignment_queue.deactivate(&thread_id, line_index).await
                        {
                            warn!(error = %e, "failed to clear alignment flag");
                        }
                    }
                    Err(e) => error!(error = %e, "alignment task panicked"),
                }
            }

            // Alignment first while under its cap
            if alignment_tasks.len() < self.options.alignment_concurrency {
                if let Some(job) = self.alignment_queue.dequeue().await? {
                    let service = self.alignment.clone();
                    let model = self.alignment_model.clone();
                    alignment_tasks.spawn(async move {
                        let key = (job.thread_id.clone(), job.line_index);
                        if let Err(e) = service.process(&job, &model).await {
                            // process() degrades internally; an error here is a store failure
                            error!(
                                thread_id = %job.thread_id,
                                line_index = job.line_index,
                                error = %e,
                                "alignment persistence failed"
                            );
                        }
                        key
                    });
                    continue;
                }
            }

            // Then translation
            if let Some(thread_id) = self.translation_queue.dequeue().await? {
                self.handle_translation(&thread_id).await;
                continue;
            }

            // Nothing to do: idle until the next poll or shutdown
            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(
            in_flight = alignment_tasks.len(),
            "worker draining in-flight alignment tasks"
        );
        while let Some(done) = alignment_tasks.join_next().await {
            if let Ok((thread_id, line_index)) = done {
                let _ = self.alignment_queue.deactivate(&thread_id, line_index).await;
            }
        }
        info!("worker stopped");
        Ok(())
    }

    /// One translation dequeue: run a tick, then decide the thread's fate
    async fn handle_translation(&self, thread_id: &str) {
        match self.tick_runner.run_tick(thread_id).await {
            Ok(Some(result)) => {
                debug!(
                    thread_id,
                    picked = result.picked.len(),
                    completed = result.completed.len(),
                    status = %result.job_status,
                    "tick ran"
                );
                if let Err(e) = self.enqueue_pending_alignments(thread_id).await {
                    warn!(thread_id, error = %e, "failed to enqueue alignment jobs");
                }

                if result.job_status == JobStatus::Completed {
                    info!(thread_id, "job completed, deactivating thread");
                    if let Err(e) = self.translation_queue.deactivate(thread_id).await {
                        warn!(thread_id, error = %e, "failed to deactivate thread");
                    }
                } else {
                    self.reenqueue_later(thread_id, self.options.reenqueue_delay);
                }
            }
            Ok(None) => {
                // Another tick holds the lock; try again shortly
                self.reenqueue_later(thread_id, self.options.reenqueue_delay);
            }
            Err(e) => {
                error!(thread_id, error = %e, "tick failed");
                self.reenqueue_later(thread_id, self.options.error_reenqueue_delay);
            }
        }
    }

    /// Queue alignment jobs for lines translated but not yet aligned
    async fn enqueue_pending_alignments(&self, thread_id: &str) -> Result<()> {
        let Some(versioned) = self.store.load(thread_id).await? else {
            return Ok(());
        };
        let Some(job) = versioned.state.translation_job.as_ref() else {
            return Ok(());
        };
        let source_language = versioned
            .state
            .poem_analysis
            .as_ref()
            .map(|a| a.language.clone())
            .unwrap_or_default();
        let target_language = job.guide_preferences.target_language.lang.clone();

        for chunk in job.chunks.values() {
            for line in &chunk.lines {
                if line.translation_status != TranslationStatus::Translated
                    || line.alignment_status != AlignmentStatus::Pending
                    || line.translations.is_empty()
                {
                    continue;
                }
                let alignment_job = AlignmentJob {
                    thread_id: thread_id.to_string(),
                    stanza_index: chunk.chunk_index,
                    line_index: line.line_number,
                    line_text: line.original_text.clone(),
                    variant_texts: line.translations.iter().map(|v| v.text.clone()).collect(),
                    source_language: source_language.clone(),
                    target_language: target_language.clone(),
                };
                self.alignment_queue.enqueue(&alignment_job).await?;
            }
        }
        Ok(())
    }

    fn reenqueue_later(&self, thread_id: &str, delay: Duration) {
        let queue = self.translation_queue.clone();
        let thread_id = thread_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.reenqueue(&thread_id).await {
                error!(thread_id, error = %e, "re-enqueue failed");
            }
        });
    }
}
