//! Chunk processor: translate every line of a chunk under a deadline
//!
//! # Overview
//!
//! Lines within a chunk run strictly sequentially. Each line flows through
//! the generate → gate → regenerate → validate pipeline and is persisted
//! into the chunk document through the CAS patch path before the next line
//! starts, so an interrupted tick loses nothing already written.
//!
//! Per-line errors are classified once (in `error::classify_message`) and
//! split the chunk's fate: retryable errors re-queue the chunk with an
//! exponential hold-off while the chunk's retry budget lasts, fatal errors
//! mark it failed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use verso_core_lexicon::LanguageFamily;

use crate::anchors::{validate_variant, Anchor};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::gate::run_gate;
use crate::generate::{LineContext, LineGenerator};
use crate::job::{
    AlignmentStatus, ChunkStatus, Job, LineState, QualityMetadata, TranslationStatus,
};
use crate::recipe::{Mode, RecipeBundle, RecipeCacheService, RecipeContext};
use crate::regen::{RegenRequest, Regenerator};
use crate::state::{patch_with_retry, ThreadState, ThreadStateStore};

/// Regeneration rounds per failure before settling for degraded
pub const MAX_REGEN_ROUNDS: u32 = 1;

/// Ceiling on the chunk retry hold-off
const MAX_RETRY_HOLDOFF_SECS: u64 = 30;

/// Default model when the guide named none
const DEFAULT_MODEL: &str = "gpt-4o";

/// Per-thread translation settings assembled from the state document
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub thread_id: String,
    pub mode: Mode,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
}

impl ThreadContext {
    /// Assemble from a loaded thread-state document
    pub fn from_state(thread_id: &str, state: &ThreadState) -> Result<Self> {
        let job = state
            .translation_job
            .as_ref()
            .ok_or_else(|| EngineError::ThreadNotFound(format!("{thread_id} has no job")))?;

        let guide = &job.guide_preferences;
        let source_lang = state
            .poem_analysis
            .as_ref()
            .map(|a| a.language.clone())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "auto".to_string());
        let target_lang = if guide.target_language.lang.is_empty() {
            "English".to_string()
        } else {
            guide.target_language.lang.clone()
        };

        Ok(Self {
            thread_id: thread_id.to_string(),
            mode: Mode::from_guide(&guide.translation_range_mode),
            source_lang,
            target_lang,
            model: guide
                .translation_model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// The recipe context for this thread's current inputs
    pub fn recipe_context(&self, state: &ThreadState) -> RecipeContext {
        let guide = state
            .translation_job
            .as_ref()
            .map(|j| &j.guide_preferences);
        RecipeContext {
            thread_id: self.thread_id.clone(),
            mode: self.mode,
            translation_intent: guide
                .map(|g| g.translation_intent.clone())
                .unwrap_or_default(),
            translation_zone: guide.map(|g| g.translation_zone.clone()).unwrap_or_default(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            poem: state
                .translation_job
                .as_ref()
                .map(|j| j.raw_poem.clone())
                .unwrap_or_default(),
        }
    }
}

/// The generate → gate → regenerate → validate pipeline for one line
#[derive(Clone)]
pub struct LinePipeline {
    generator: LineGenerator,
    regenerator: Regenerator,
    config: EngineConfig,
}

impl LinePipeline {
    pub fn new(generator: LineGenerator, regenerator: Regenerator, config: EngineConfig) -> Self {
        Self {
            generator,
            regenerator,
            config,
        }
    }

    /// Translate one line into a finished `LineState`
    #[allow(clippy::too_many_arguments)]
    pub async fn translate_line(
        &self,
        tcx: &ThreadContext,
        bundle: &RecipeBundle,
        anchors: &[Anchor],
        line_number: usize,
        text: &str,
        prev_line: Option<&str>,
        next_line: Option<&str>,
        poem: &str,
        deadline: Option<Instant>,
    ) -> Result<LineState> {
        if text.trim().is_empty() {
            return Ok(LineState::blank(line_number, text.to_string()));
        }

        let line_ctx = LineContext {
            line_text: text.to_string(),
            prev_line: prev_line.map(str::to_string),
            next_line: next_line.map(str::to_string),
            source_lang: tcx.source_lang.clone(),
            target_lang: tcx.target_lang.clone(),
            mode: tcx.mode,
            poem: poem.to_string(),
        };

        let generated = self
            .generator
            .generate(&line_ctx, bundle, anchors, &tcx.model)
            .await?;

        let mut variants = generated.variants.clone();
        let mut quality = QualityMetadata {
            degraded: generated.fallback_used,
            gate_reason: None,
            regen_rounds: 0,
        };

        // Diversity gate with targeted regeneration of the worst variant
        for _ in 0..MAX_REGEN_ROUNDS {
            let texts = variant_texts(&variants);
            let outcome = run_gate(&texts, &tcx.target_lang, tcx.mode, text);
            if outcome.pass {
                break;
            }
            let reason = outcome.reason.unwrap_or_else(|| "gate failed".to_string());
            let worst = outcome.worst_index.unwrap_or(2);
            debug!(line_number, reason = %reason, worst, "gate failed, regenerating");
            quality.gate_reason = Some(reason.clone());
            quality.regen_rounds += 1;

            let regen = self
                .regenerate_variant(tcx, bundle, anchors, &line_ctx, &variants, worst, &reason, deadline)
                .await?;
            quality.degraded |= regen.1;
            variants[worst] = regen.0;
        }

        // The gate's verdict on the final set: still failing means degraded
        let texts = variant_texts(&variants);
        let final_gate = run_gate(&texts, &tcx.target_lang, tcx.mode, text);
        if !final_gate.pass {
            quality.degraded = true;
            if quality.gate_reason.is_none() {
                quality.gate_reason = final_gate.reason;
            }
        }

        // Anchor and metadata validation; a violating variant gets one
        // targeted repair round before the line is marked degraded
        let target_family = LanguageFamily::resolve(&tcx.target_lang);
        for index in 0..variants.len() {
            let plan = bundle
                .recipe(variants[index].label)
                .and_then(|r| r.stance_plan.as_ref());
            let violations =
                validate_variant(&variants[index], anchors, tcx.mode, plan, target_family);
            if violations.is_empty() {
                continue;
            }

            let reason = violations.join("; ");
            if quality.regen_rounds < MAX_REGEN_ROUNDS + 1 {
                debug!(line_number, index, reason = %reason, "metadata violations, regenerating variant");
                quality.regen_rounds += 1;
                let regen = self
                    .regenerate_variant(
                        tcx, bundle, anchors, &line_ctx, &variants, index, &reason, deadline,
                    )
                    .await?;
                quality.degraded |= regen.1;
                variants[index] = regen.0;

                let plan = bundle
                    .recipe(variants[index].label)
                    .and_then(|r| r.stance_plan.as_ref());
                let remaining =
                    validate_variant(&variants[index], anchors, tcx.mode, plan, target_family);
                if !remaining.is_empty() {
                    warn!(line_number, index, "variant still violating after repair, degraded");
                    quality.degraded = true;
                    quality.gate_reason.get_or_insert(reason);
                }
            } else {
                quality.degraded = true;
                quality.gate_reason.get_or_insert(reason);
            }
        }

        Ok(LineState {
            line_number,
            original_text: text.to_string(),
            translations: variants,
            model_used: Some(generated.model_used),
            translation_status: TranslationStatus::Translated,
            alignment_status: AlignmentStatus::Pending,
            retry_count: 0,
            updated_at: Utc::now(),
            quality_metadata: Some(quality),
            error_code: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn regenerate_variant(
        &self,
        tcx: &ThreadContext,
        bundle: &RecipeBundle,
        anchors: &[Anchor],
        line_ctx: &LineContext,
        variants: &[crate::job::VariantResult],
        worst: usize,
        reason: &str,
        deadline: Option<Instant>,
    ) -> Result<(crate::job::VariantResult, bool)> {
        let replaced = variants[worst].clone();
        let recipe = bundle
            .recipe(replaced.label)
            .cloned()
            .ok_or_else(|| EngineError::Schema(format!("bundle missing recipe {}", replaced.label)))?;
        let fixed: Vec<_> = variants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != worst)
            .map(|(_, v)| v.clone())
            .collect();

        let outcome = self
            .regenerator
            .regenerate(RegenRequest {
                fixed,
                replaced,
                recipe,
                line: line_ctx.clone(),
                anchors: anchors.to_vec(),
                gate_reason: reason.to_string(),
                mode: tcx.mode,
                model: tcx.model.clone(),
                deadline,
            })
            .await?;
        Ok((outcome.variant, outcome.degraded))
    }

    /// The generator, for callers that skip the gate
    pub fn generator(&self) -> &LineGenerator {
        &self.generator
    }

    /// The configured regen bound, exposed for instrumentation
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn variant_texts(variants: &[crate::job::VariantResult]) -> [String; 3] {
    [
        variants.first().map(|v| v.text.clone()).unwrap_or_default(),
        variants.get(1).map(|v| v.text.clone()).unwrap_or_default(),
        variants.get(2).map(|v| v.text.clone()).unwrap_or_default(),
    ]
}

/// Outcome of processing one chunk in one tick
#[derive(Debug, Clone)]
pub struct ChunkRunOutcome {
    pub chunk_index: usize,
    pub lines_completed: usize,
    /// Deadline hit; chunk stays processing and resumes next tick
    pub interrupted: bool,
    /// Chunk was marked failed
    pub failed: bool,
    /// Chunk was re-queued with a retry hold-off
    pub retry_scheduled: bool,
}

/// The chunk processor
#[derive(Clone)]
pub struct ChunkProcessor {
    store: Arc<dyn ThreadStateStore>,
    recipes: Arc<RecipeCacheService>,
    pipeline: LinePipeline,
    config: EngineConfig,
}

impl ChunkProcessor {
    pub fn new(
        store: Arc<dyn ThreadStateStore>,
        recipes: Arc<RecipeCacheService>,
        pipeline: LinePipeline,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            recipes,
            pipeline,
            config,
        }
    }

    /// Process one chunk, line by line, until done or out of time
    pub async fn process_chunk(
        &self,
        thread_id: &str,
        chunk_index: usize,
        anchors: &[Anchor],
        deadline: Option<Instant>,
    ) -> Result<ChunkRunOutcome> {
        let versioned = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;
        let tcx = ThreadContext::from_state(thread_id, &versioned.state)?;
        let recipe_ctx = tcx.recipe_context(&versioned.state);
        let bundle = self.recipes.get_or_create(&recipe_ctx, &tcx.model).await?;

        let job = versioned
            .state
            .translation_job
            .as_ref()
            .ok_or_else(|| EngineError::ThreadNotFound(format!("{thread_id} has no job")))?;
        let sources = job.chunk_source_lines(chunk_index);
        let poem = job.raw_poem.clone();
        let already_stored = job
            .chunks
            .get(&chunk_index)
            .map(|c| c.lines.len())
            .unwrap_or(0);

        let mut outcome = ChunkRunOutcome {
            chunk_index,
            lines_completed: already_stored,
            interrupted: false,
            failed: false,
            retry_scheduled: false,
        };

        for (offset, (line_number, text)) in sources.iter().enumerate().skip(already_stored) {
            if self.config.enable_tick_time_slicing && deadline_passed(deadline) {
                info!(thread_id, chunk_index, offset, "deadline reached, interrupting chunk");
                outcome.interrupted = true;
                return Ok(outcome);
            }

            let prev_line = offset.checked_sub(1).and_then(|i| sources.get(i));
            let next_line = sources.get(offset + 1);

            let result = self
                .pipeline
                .translate_line(
                    &tcx,
                    &bundle,
                    anchors,
                    *line_number,
                    text,
                    prev_line.map(|(_, t)| t.as_str()),
                    next_line.map(|(_, t)| t.as_str()),
                    &poem,
                    deadline,
                )
                .await;

            match result {
                Ok(line) => {
                    self.persist_line(thread_id, chunk_index, line).await?;
                    outcome.lines_completed += 1;
                }
                Err(error) => {
                    let kind = error.line_kind();
                    warn!(
                        thread_id,
                        chunk_index,
                        line_number,
                        kind = %kind,
                        error = %error,
                        "line translation failed"
                    );
                    self.persist_failed_line(thread_id, chunk_index, *line_number, text, kind)
                        .await?;
                    outcome.lines_completed += 1;

                    if kind.is_retryable() {
                        let requeued = self
                            .schedule_chunk_retry(thread_id, chunk_index, &error)
                            .await?;
                        if requeued {
                            outcome.retry_scheduled = true;
                        } else {
                            self.mark_chunk_failed(thread_id, chunk_index, &error).await?;
                            outcome.failed = true;
                        }
                    } else {
                        self.mark_chunk_failed(thread_id, chunk_index, &error).await?;
                        outcome.failed = true;
                    }
                    return Ok(outcome);
                }
            }
        }

        self.finalize_chunk(thread_id, chunk_index).await?;
        Ok(outcome)
    }

    /// Append a finished line and bump the processed counter
    async fn persist_line(&self, thread_id: &str, chunk_index: usize, line: LineState) -> Result<()> {
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let chunk = chunk_mut(state, chunk_index)?;
            chunk.lines.push(line.clone());
            chunk.lines_processed = chunk.lines.len();
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn persist_failed_line(
        &self,
        thread_id: &str,
        chunk_index: usize,
        line_number: usize,
        text: &str,
        kind: crate::error::LineErrorKind,
    ) -> Result<()> {
        let text = text.to_string();
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let chunk = chunk_mut(state, chunk_index)?;
            chunk.lines.push(LineState {
                line_number,
                original_text: text.clone(),
                translations: Vec::new(),
                model_used: None,
                translation_status: TranslationStatus::Failed,
                alignment_status: AlignmentStatus::Pending,
                retry_count: 0,
                updated_at: Utc::now(),
                quality_metadata: None,
                error_code: Some(kind),
            });
            chunk.lines_processed = chunk.lines.len();
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Re-queue the chunk with `now + min(30s, 2s * 2^retries)`
    ///
    /// Returns false when the retry budget is exhausted.
    async fn schedule_chunk_retry(
        &self,
        thread_id: &str,
        chunk_index: usize,
        error: &EngineError,
    ) -> Result<bool> {
        let message = error.to_string();
        let (requeued, _) = patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let chunk = chunk_mut(state, chunk_index)?;
            if chunk.retries >= chunk.max_retries {
                return Ok(false);
            }
            let holdoff = (2u64 << chunk.retries.min(30)).min(MAX_RETRY_HOLDOFF_SECS);
            chunk.retries += 1;
            chunk.status = ChunkStatus::Queued;
            chunk.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(holdoff as i64));
            chunk.error = Some(message.clone());
            Ok(true)
        })
        .await?;
        Ok(requeued)
    }

    async fn mark_chunk_failed(
        &self,
        thread_id: &str,
        chunk_index: usize,
        error: &EngineError,
    ) -> Result<()> {
        let message = error.to_string();
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let chunk = chunk_mut(state, chunk_index)?;
            chunk.status = ChunkStatus::Failed;
            chunk.completed_at = Some(Utc::now());
            chunk.error = Some(message.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Mark a fully stored chunk completed or failed
    ///
    /// Completed only when every expected line is present and translated; a
    /// failed line fails the chunk; missing lines leave it processing.
    async fn finalize_chunk(&self, thread_id: &str, chunk_index: usize) -> Result<()> {
        patch_with_retry(self.store.as_ref(), thread_id, move |state| {
            let chunk = chunk_mut(state, chunk_index)?;
            if chunk.lines.len() < chunk.total_lines {
                return Ok(());
            }
            let any_failed = chunk
                .lines
                .iter()
                .any(|l| l.translation_status == TranslationStatus::Failed);
            if any_failed {
                chunk.status = ChunkStatus::Failed;
                chunk.error.get_or_insert_with(|| "line failures".to_string());
            } else {
                chunk.status = ChunkStatus::Completed;
                chunk.error = None;
            }
            chunk.completed_at = Some(Utc::now());
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// The line pipeline, shared with the auto-retry pass
    pub fn pipeline(&self) -> &LinePipeline {
        &self.pipeline
    }

    /// The recipe cache, shared with the tick's pre-warm step
    pub fn recipes(&self) -> &Arc<RecipeCacheService> {
        &self.recipes
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

pub(crate) fn chunk_mut(
    state: &mut ThreadState,
    chunk_index: usize,
) -> Result<&mut crate::job::ChunkState> {
    state
        .translation_job
        .as_mut()
        .and_then(|job| job.chunks.get_mut(&chunk_index))
        .ok_or_else(|| EngineError::Store(format!("chunk {chunk_index} not found")))
}

pub(crate) fn job_mut(state: &mut ThreadState) -> Result<&mut Job> {
    state
        .translation_job
        .as_mut()
        .ok_or_else(|| EngineError::Store("thread has no translation job".to_string()))
}
