//! Auto-retry pass: resurrect failed lines at the end of a tick
//!
//! Failed lines with remaining retry budget are re-translated through the
//! full line pipeline, one at a time to respect provider rate limits. Each
//! attempt — success or not — bumps the line's retry count, which widens the
//! exponential eligibility window for the next pass.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::chunkproc::{chunk_mut, LinePipeline, ThreadContext};
use crate::error::{EngineError, Result};
use crate::job::{ChunkStatus, TranslationStatus, MAX_LINE_RETRIES};
use crate::recipe::RecipeCacheService;
use crate::state::{patch_with_retry, ThreadStateStore};

/// Eligibility window ceiling in seconds
const MAX_BACKOFF_SECS: i64 = 60;

/// One failed line eligible for retry
#[derive(Debug, Clone)]
struct RetryTarget {
    chunk_index: usize,
    line_position: usize,
    line_number: usize,
    text: String,
    prev_line: Option<String>,
    next_line: Option<String>,
}

/// Scan for eligible failed lines and retry them sequentially
///
/// Returns the number of lines whose retry succeeded.
pub async fn run_auto_retry_pass(
    store: &Arc<dyn ThreadStateStore>,
    recipes: &RecipeCacheService,
    pipeline: &LinePipeline,
    thread_id: &str,
    deadline: Option<Instant>,
) -> Result<usize> {
    let Some(versioned) = store.load(thread_id).await? else {
        return Ok(0);
    };
    let Some(job) = versioned.state.translation_job.as_ref() else {
        return Ok(0);
    };

    let now = Utc::now();
    let mut targets = Vec::new();
    for chunk in job.chunks.values() {
        let sources = job.chunk_source_lines(chunk.chunk_index);
        for (position, line) in chunk.lines.iter().enumerate() {
            if line.translation_status != TranslationStatus::Failed
                || line.retry_count >= MAX_LINE_RETRIES
                || !line.error_code.is_some_and(|k| k.is_retryable())
            {
                continue;
            }
            let backoff_secs = (5i64 << line.retry_count.min(10)).min(MAX_BACKOFF_SECS);
            if now - line.updated_at < chrono::Duration::seconds(backoff_secs) {
                continue;
            }
            let offset = sources
                .iter()
                .position(|(number, _)| *number == line.line_number);
            let Some(offset) = offset else { continue };
            targets.push(RetryTarget {
                chunk_index: chunk.chunk_index,
                line_position: position,
                line_number: line.line_number,
                text: sources[offset].1.clone(),
                prev_line: offset
                    .checked_sub(1)
                    .and_then(|i| sources.get(i))
                    .map(|(_, t)| t.clone()),
                next_line: sources.get(offset + 1).map(|(_, t)| t.clone()),
            });
        }
    }

    if targets.is_empty() {
        return Ok(0);
    }

    let tcx = ThreadContext::from_state(thread_id, &versioned.state)?;
    let recipe_ctx = tcx.recipe_context(&versioned.state);
    let bundle = recipes.get_or_create(&recipe_ctx, &tcx.model).await?;
    let poem = job.raw_poem.clone();

    info!(thread_id, eligible = targets.len(), "auto-retry pass starting");
    let mut succeeded = 0;

    // Sequential on purpose: retries must not amplify provider pressure
    for target in targets {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!(thread_id, "auto-retry pass stopping at deadline");
            break;
        }

        let attempt = pipeline
            .translate_line(
                &tcx,
                &bundle,
                &[],
                target.line_number,
                &target.text,
                target.prev_line.as_deref(),
                target.next_line.as_deref(),
                &poem,
                deadline,
            )
            .await;

        match attempt {
            Ok(new_line) => {
                succeeded += 1;
                apply_retry_success(store, thread_id, &target, new_line).await?;
            }
            Err(error) => {
                warn!(
                    thread_id,
                    line_number = target.line_number,
                    error = %error,
                    "auto-retry attempt failed"
                );
                apply_retry_failure(store, thread_id, &target).await?;
            }
        }
    }

    info!(thread_id, succeeded, "auto-retry pass finished");
    Ok(succeeded)
}

async fn apply_retry_success(
    store: &Arc<dyn ThreadStateStore>,
    thread_id: &str,
    target: &RetryTarget,
    new_line: crate::job::LineState,
) -> Result<()> {
    let target = target.clone();
    patch_with_retry(store.as_ref(), thread_id, move |state| {
        let chunk = chunk_mut(state, target.chunk_index)?;
        let line = chunk
            .lines
            .get_mut(target.line_position)
            .ok_or_else(|| EngineError::Store("retried line vanished".to_string()))?;

        line.translations = new_line.translations.clone();
        line.model_used = new_line.model_used.clone();
        line.quality_metadata = new_line.quality_metadata.clone();
        line.translation_status = TranslationStatus::Translated;
        line.error_code = None;
        line.retry_count += 1;
        line.updated_at = Utc::now();

        // A failed chunk whose lines all recovered is completed again
        let all_translated = chunk.lines.len() == chunk.total_lines
            && chunk
                .lines
                .iter()
                .all(|l| l.translation_status == TranslationStatus::Translated);
        if all_translated {
            chunk.status = ChunkStatus::Completed;
            chunk.error = None;
        }
        Ok(())
    })
    .await?;
    Ok(())
}

async fn apply_retry_failure(
    store: &Arc<dyn ThreadStateStore>,
    thread_id: &str,
    target: &RetryTarget,
) -> Result<()> {
    let target = target.clone();
    patch_with_retry(store.as_ref(), thread_id, move |state| {
        let chunk = chunk_mut(state, target.chunk_index)?;
        if let Some(line) = chunk.lines.get_mut(target.line_position) {
            line.retry_count += 1;
            line.updated_at = Utc::now();
        }
        Ok(())
    })
    .await?;
    Ok(())
}
