//! Alignment service: word alignments for a line's three variants
//!
//! One batched LLM call aligns the source line against all three variants.
//! On any failure a positional word-to-word fallback is written instead, so
//! a line never stays unaligned; the caller clears the active flag either
//! way.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use verso_core_lexicon::tokenize;

use crate::chunkproc::chunk_mut;
use crate::error::Result;
use crate::job::{AlignmentStatus, WordAlignment};
use crate::llm::{LlmCaller, LlmRequest, ResponseFormat};
use crate::queues::AlignmentJob;
use crate::recipe::cache::parse_json_payload;
use crate::state::{patch_with_retry, ThreadStateStore};

#[derive(Debug, Deserialize)]
struct RawAlignmentPayload {
    /// One alignment list per variant, in A/B/C order
    alignments: Vec<Vec<RawAlignmentEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawAlignmentEntry {
    source: String,
    target: String,
}

/// The alignment service
#[derive(Clone)]
pub struct AlignmentService {
    caller: LlmCaller,
    store: Arc<dyn ThreadStateStore>,
}

impl AlignmentService {
    pub fn new(caller: LlmCaller, store: Arc<dyn ThreadStateStore>) -> Self {
        Self { caller, store }
    }

    /// Align one line's variants and persist the result
    ///
    /// Never fails the line: any upstream or parse error degrades to the
    /// word-to-word fallback.
    pub async fn process(&self, job: &AlignmentJob, model: &str) -> Result<()> {
        let alignments = match self.align_via_llm(job, model).await {
            Ok(alignments) => alignments,
            Err(e) => {
                warn!(
                    thread_id = %job.thread_id,
                    line_index = job.line_index,
                    error = %e,
                    "alignment call failed, using word-to-word fallback"
                );
                fallback_alignments(job)
            }
        };

        self.persist(job, alignments).await
    }

    async fn align_via_llm(
        &self,
        job: &AlignmentJob,
        model: &str,
    ) -> Result<Vec<Vec<WordAlignment>>> {
        let mut request = LlmRequest::new(model, &system_prompt(job), &user_prompt(job));
        request.response_format = Some(ResponseFormat::JsonObject);
        request.max_output_tokens = Some(800);

        let outcome = self.caller.call(request, None).await?;
        let payload: RawAlignmentPayload = parse_json_payload(&outcome.response.text)?;

        let mut alignments: Vec<Vec<WordAlignment>> = payload
            .alignments
            .into_iter()
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|e| WordAlignment {
                        source: e.source,
                        target: e.target,
                    })
                    .collect()
            })
            .collect();

        // Missing variants degrade individually to the fallback
        let fallback = fallback_alignments(job);
        while alignments.len() < job.variant_texts.len() {
            let index = alignments.len();
            alignments.push(fallback.get(index).cloned().unwrap_or_default());
        }
        Ok(alignments)
    }

    async fn persist(&self, job: &AlignmentJob, alignments: Vec<Vec<WordAlignment>>) -> Result<()> {
        let stanza_index = job.stanza_index;
        let line_index = job.line_index;
        patch_with_retry(self.store.as_ref(), &job.thread_id, move |state| {
            let chunk = chunk_mut(state, stanza_index)?;
            let Some(line) = chunk
                .lines
                .iter_mut()
                .find(|l| l.line_number == line_index)
            else {
                warn!(stanza_index, line_index, "aligned line no longer present");
                return Ok(());
            };

            for (variant, words) in line.translations.iter_mut().zip(alignments.iter()) {
                variant.words = words.clone();
            }
            line.alignment_status = AlignmentStatus::Aligned;
            line.updated_at = chrono::Utc::now();
            Ok(())
        })
        .await?;

        debug!(
            thread_id = %job.thread_id,
            line_index = job.line_index,
            "alignment persisted"
        );
        Ok(())
    }
}

/// Positional word-to-word fallback alignment
///
/// Pairs the i-th source token with the i-th target token, padding the
/// shorter side with its last token so every word lands somewhere.
fn fallback_alignments(job: &AlignmentJob) -> Vec<Vec<WordAlignment>> {
    let source_tokens = tokenize(&job.line_text);
    job.variant_texts
        .iter()
        .map(|variant| {
            let target_tokens = tokenize(variant);
            let paired = source_tokens.len().max(target_tokens.len());
            (0..paired)
                .filter_map(|i| {
                    let source = source_tokens
                        .get(i)
                        .or_else(|| source_tokens.last())?
                        .clone();
                    let target = target_tokens
                        .get(i)
                        .or_else(|| target_tokens.last())?
                        .clone();
                    Some(WordAlignment { source, target })
                })
                .collect()
        })
        .collect()
}

fn system_prompt(job: &AlignmentJob) -> String {
    format!(
        "You align words between a {src} poem line and its three {tgt} variants. \
         Respond with strict JSON only: {{\"alignments\": [[{{\"source\": word, \
         \"target\": word}}]]}} with one list per variant, in order.",
        src = job.source_language,
        tgt = job.target_language,
    )
}

fn user_prompt(job: &AlignmentJob) -> String {
    let mut prompt = format!("Source line:\n{}\n\nVariants:\n", job.line_text);
    for (index, text) in job.variant_texts.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, text));
    }
    prompt
}
