//! Targeted regeneration: salvage one failed variant with K candidates
//!
//! # Overview
//!
//! When the gate fails, only the worst variant is replaced. The regenerator
//! builds a single prompt embedding the two kept variants (with their openers
//! and structural signatures), constraints parsed from the gate reason, a
//! desired opener type the kept variants do not use, and the kept variants'
//! opening tokens as banned openings. It then samples K candidates — one
//! multi-sample call for legacy models, bounded fan-out batches for
//! restricted ones — validates them against the hard anchor/metadata
//! constraints, and picks the candidate least similar to the kept variants.
//!
//! The tick's deadline is plumbed in: the regenerator checks it between
//! batches and settles for what it has rather than outliving its tick.

use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use verso_core_lexicon::LanguageFamily;
use verso_core_structure::{jaccard, opener_type, opening_content_tokens, structural_signature, OpenerType};

use crate::anchors::{validate_variant, Anchor};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::generate::{build_variant, LineContext, RawVariant};
use crate::job::VariantResult;
use crate::llm::{capability_for, is_restricted, LlmCaller, LlmRequest, ResponseFormat};
use crate::recipe::cache::parse_json_payload;
use crate::recipe::{Mode, Recipe, StancePlan, SubjectForm, VariantLabel};

/// A regeneration request for one failed variant
#[derive(Debug, Clone)]
pub struct RegenRequest {
    /// The two variants kept as-is
    pub fixed: Vec<VariantResult>,
    /// The variant being replaced
    pub replaced: VariantResult,
    /// Recipe for the replaced label
    pub recipe: Recipe,
    pub line: LineContext,
    pub anchors: Vec<Anchor>,
    pub gate_reason: String,
    pub mode: Mode,
    pub model: String,
    /// Tick deadline; regeneration never outlives it
    pub deadline: Option<Instant>,
}

/// Regeneration result
#[derive(Debug, Clone)]
pub struct RegenOutcome {
    pub variant: VariantResult,
    /// True when constraints could not be fully satisfied and the best
    /// available candidate (or the original) was kept
    pub degraded: bool,
    pub candidates_tried: usize,
}

/// Constraints parsed from a gate reason
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RegenConstraints {
    pub must_avoid: Vec<String>,
    pub must_do: Vec<String>,
}

/// Map a gate reason onto explicit avoid/do constraint lists
pub(crate) fn parse_gate_reason(reason: &str) -> RegenConstraints {
    let lowered = reason.to_lowercase();
    let mut constraints = RegenConstraints::default();

    if lowered.contains("walk-verb") {
        constraints
            .must_avoid
            .push("walk/stroll/step/wander/march verbs".to_string());
        constraints
            .must_do
            .push("use a different motion framing".to_string());
    }
    if lowered.contains("comparison marker") {
        constraints
            .must_avoid
            .push("simile markers (like, as, as if, comme, como, come)".to_string());
        constraints
            .must_do
            .push("state the image directly, without simile".to_string());
    }
    if lowered.contains("subject-opener") {
        constraints
            .must_avoid
            .push("opening with the same grammatical subject as the kept variants".to_string());
        constraints
            .must_do
            .push("open from a different grammatical subject".to_string());
    }
    if lowered.contains("opening bigram") {
        constraints
            .must_avoid
            .push("repeating the kept variants' opening words".to_string());
    }
    if lowered.contains("jaccard") {
        constraints
            .must_avoid
            .push("reusing the kept variants' wording".to_string());
        constraints
            .must_do
            .push("choose fresh vocabulary for the same image".to_string());
    }
    constraints
}

/// The opener type the replacement should try, avoiding the kept variants'
///
/// Priority: PREP over NOUN_PHRASE over OTHER over PRON.
pub(crate) fn desired_opener(fixed: &[VariantResult], lang: LanguageFamily) -> OpenerType {
    let used: Vec<OpenerType> = fixed.iter().map(|v| opener_type(&v.text, lang)).collect();
    [
        OpenerType::Prep,
        OpenerType::NounPhrase,
        OpenerType::Other,
        OpenerType::Pron,
    ]
    .into_iter()
    .find(|candidate| !used.contains(candidate))
    .unwrap_or(OpenerType::Other)
}

/// Raw candidate payload
#[derive(Debug, Deserialize)]
struct RawCandidate {
    text: String,
    #[serde(default)]
    anchor_realizations: BTreeMap<String, String>,
    #[serde(default)]
    image_shift_summary: Option<String>,
    #[serde(default)]
    world_shift_summary: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    subject_form_used: Option<SubjectForm>,
}

/// The regenerator
#[derive(Clone)]
pub struct Regenerator {
    caller: LlmCaller,
    config: EngineConfig,
}

impl Regenerator {
    pub fn new(caller: LlmCaller, config: EngineConfig) -> Self {
        Self { caller, config }
    }

    /// Regenerate the failed variant
    pub async fn regenerate(&self, request: RegenRequest) -> Result<RegenOutcome> {
        let restricted = is_restricted(&request.model);
        let k = match request.mode {
            Mode::Focused => 1,
            Mode::Balanced | Mode::Adventurous => self.config.regen_k(restricted),
        };

        let raw_texts = self.sample_candidates(&request, k, restricted).await?;
        let candidates_tried = raw_texts.len();
        let target_family = LanguageFamily::resolve(&request.line.target_lang);

        let mut candidates: Vec<VariantResult> = Vec::new();
        for text in &raw_texts {
            match parse_json_payload::<RawCandidate>(text) {
                Ok(raw) if !raw.text.trim().is_empty() => {
                    let raw_variant = RawVariant {
                        label: request.replaced.label,
                        text: raw.text,
                        anchor_realizations: raw.anchor_realizations,
                        image_shift_summary: raw.image_shift_summary,
                        world_shift_summary: raw.world_shift_summary,
                        subject_form_used: None,
                    };
                    candidates.push(build_variant(
                        request.replaced.label,
                        &raw_variant,
                        target_family,
                    ));
                }
                Ok(_) => debug!("regen candidate had empty text, dropped"),
                Err(e) => debug!(error = %e, "regen candidate failed to parse, dropped"),
            }
        }

        if candidates.is_empty() {
            warn!(
                label = %request.replaced.label,
                "no usable regen candidates, keeping original variant degraded"
            );
            return Ok(RegenOutcome {
                variant: request.replaced,
                degraded: true,
                candidates_tried,
            });
        }

        let plan = request.recipe.stance_plan.as_ref();
        let (variant, degraded) =
            select_candidate(candidates, &request, plan, target_family);

        debug!(
            label = %variant.label,
            degraded,
            candidates_tried,
            "regen candidate selected"
        );
        Ok(RegenOutcome {
            variant,
            degraded,
            candidates_tried,
        })
    }

    /// Sample up to K candidate payload texts
    ///
    /// Legacy models: one call with n=K. Restricted models: bounded fan-out
    /// in batches, checking the deadline between batches.
    async fn sample_candidates(
        &self,
        request: &RegenRequest,
        k: u32,
        restricted: bool,
    ) -> Result<Vec<String>> {
        if deadline_passed(request.deadline) {
            warn!("regen deadline already passed, sampling nothing");
            return Ok(Vec::new());
        }

        let caps = capability_for(&request.model);
        let base = self.build_request(request);

        if caps.supports_multi_sample {
            let mut llm_request = base;
            llm_request.n = Some(k);
            let outcome = self.caller.call(llm_request, None).await?;
            return Ok(outcome
                .response
                .all_texts()
                .into_iter()
                .map(str::to_string)
                .collect());
        }

        let concurrency = if restricted && !self.config.enable_gpt5_regen_parallel {
            1
        } else {
            self.config.regen_concurrency(restricted).max(1)
        } as usize;

        let mut texts = Vec::new();
        let mut remaining = k as usize;

        while remaining > 0 {
            if deadline_passed(request.deadline) {
                warn!(
                    collected = texts.len(),
                    "regen deadline reached between batches, selecting from collected candidates"
                );
                break;
            }

            // Each batch is at most `concurrency` wide, so joining the whole
            // batch is the bound
            let batch = remaining.min(concurrency);
            let calls = (0..batch).map(|_| {
                let caller = self.caller.clone();
                let llm_request = base.clone();
                async move { caller.call(llm_request, None).await }
            });

            for result in join_all(calls).await {
                match result {
                    Ok(outcome) => texts.push(outcome.response.text),
                    Err(e) => warn!(error = %e, "regen candidate call failed"),
                }
            }
            remaining -= batch;
        }

        Ok(texts)
    }

    fn build_request(&self, request: &RegenRequest) -> LlmRequest {
        let mut llm_request = LlmRequest::new(
            &request.model,
            &regen_system_prompt(request),
            &regen_user_prompt(request),
        );
        llm_request.response_format = Some(ResponseFormat::JsonObject);
        llm_request.temperature = Some(0.95);
        llm_request.max_output_tokens = Some(self.config.regen_max_output_tokens);
        llm_request
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Validate, score, and pick the best candidate
///
/// Candidates passing the hard constraints compete on the dissimilarity +
/// fluency score; if none pass, the candidate with the fewest violations is
/// kept and the result marked degraded.
fn select_candidate(
    candidates: Vec<VariantResult>,
    request: &RegenRequest,
    plan: Option<&StancePlan>,
    target_family: LanguageFamily,
) -> (VariantResult, bool) {
    let fixed_signatures: Vec<String> = request
        .fixed
        .iter()
        .map(|v| structural_signature(&v.text, target_family))
        .collect();

    let mut passing: Vec<VariantResult> = Vec::new();
    let mut best_failing: Option<(usize, VariantResult)> = None;

    for candidate in candidates {
        let mut violations =
            validate_variant(&candidate, &request.anchors, request.mode, plan, target_family);

        // Adventurous mode also demands a unique structural signature
        if request.mode == Mode::Adventurous {
            let signature = structural_signature(&candidate.text, target_family);
            if fixed_signatures.contains(&signature) {
                violations.push("structural signature duplicates a kept variant".to_string());
            }
        }

        if violations.is_empty() {
            passing.push(candidate);
        } else {
            let count = violations.len();
            if best_failing.as_ref().is_none_or(|(best, _)| count < *best) {
                best_failing = Some((count, candidate));
            }
        }
    }

    if passing.is_empty() {
        if let Some((violations, candidate)) = best_failing {
            warn!(
                violations,
                "no regen candidate passed hard constraints, keeping the least bad"
            );
            return (candidate, true);
        }
        return (request.replaced.clone(), true);
    }

    let scored = passing
        .into_iter()
        .map(|candidate| {
            let score = candidate_score(&candidate, request, &fixed_signatures, target_family);
            (score, candidate)
        })
        .min_by(|(a, ca), (b, cb)| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.text.chars().count().cmp(&cb.text.chars().count()))
        });

    match scored {
        Some((_, candidate)) => (candidate, false),
        None => (request.replaced.clone(), true),
    }
}

/// Dissimilarity + fluency score; lower is better
fn candidate_score(
    candidate: &VariantResult,
    request: &RegenRequest,
    fixed_signatures: &[String],
    target_family: LanguageFamily,
) -> f64 {
    let primary = request
        .fixed
        .iter()
        .map(|f| jaccard(&candidate.text, &f.text))
        .fold(0.0f64, f64::max);

    let signature = structural_signature(&candidate.text, target_family);
    let signature_penalty = if fixed_signatures.contains(&signature) {
        0.15
    } else {
        0.0
    };

    primary + signature_penalty + fluency_penalty(&candidate.text, &request.fixed)
}

fn fluency_penalty(text: &str, fixed: &[VariantResult]) -> f64 {
    let mut penalty = 0.0;

    if has_repeated_punctuation(text) {
        penalty += 1.0;
    }

    let longest_fixed = fixed
        .iter()
        .map(|f| f.text.chars().count())
        .max()
        .unwrap_or(0);
    if longest_fixed > 0 && text.chars().count() as f64 > 1.6 * longest_fixed as f64 {
        penalty += 0.5;
    }

    if alphanumeric_ratio(text) < 0.9 {
        penalty += 0.3;
    }
    penalty
}

fn has_repeated_punctuation(text: &str) -> bool {
    let mut previous: Option<char> = None;
    for c in text.chars() {
        if !c.is_alphanumeric() && !c.is_whitespace() && c != '\'' {
            if previous == Some(c) {
                return true;
            }
            previous = Some(c);
        } else {
            previous = None;
        }
    }
    false
}

/// Alphanumeric chars over non-whitespace chars
fn alphanumeric_ratio(text: &str) -> f64 {
    let non_space = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_space == 0 {
        return 0.0;
    }
    let alnum = text
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'')
        .count();
    alnum as f64 / non_space as f64
}

fn regen_system_prompt(request: &RegenRequest) -> String {
    format!(
        "You replace exactly one failed variant ({label}) of a poem-line translation \
         from {src} into {tgt}. Respond with strict JSON only: \
         {{\"text\": string, \"anchor_realizations\": {{anchor id: exact substring}}, \
         \"image_shift_summary\": string (label B only), \
         \"world_shift_summary\": string (label C only), \
         \"subject_form_used\": \"we\"|\"you\"|\"third_person\"|\"impersonal\"|\"i\" (label C only)}}. \
         Every anchor realization must appear verbatim in the text.",
        label = request.replaced.label,
        src = request.line.source_lang,
        tgt = request.line.target_lang,
    )
}

fn regen_user_prompt(request: &RegenRequest) -> String {
    let lang = LanguageFamily::resolve(&request.line.target_lang);
    let constraints = parse_gate_reason(&request.gate_reason);
    let opener = desired_opener(&request.fixed, lang);

    let mut prompt = String::new();
    prompt.push_str(&format!("Source line:\n{}\n\n", request.line.line_text));
    if let Some(prev) = &request.line.prev_line {
        prompt.push_str(&format!("Previous line: {prev}\n"));
    }
    if let Some(next) = &request.line.next_line {
        prompt.push_str(&format!("Next line: {next}\n"));
    }

    prompt.push_str(&format!(
        "\nRecipe for {} ({}): {}\n",
        request.recipe.label,
        request
            .recipe
            .archetype
            .map(|a| a.as_str())
            .unwrap_or("unspecified"),
        request.recipe.directive
    ));
    if request.replaced.label == VariantLabel::C {
        if let Some(plan) = &request.recipe.stance_plan {
            prompt.push_str(&format!(
                "The variant must speak as \"{}\" throughout.\n",
                plan.subject_form
            ));
        }
    }

    prompt.push_str("\nKept variants (do not echo their structure):\n");
    let mut banned: Vec<String> = Vec::new();
    for variant in &request.fixed {
        prompt.push_str(&format!(
            "- {} [{}, opener {}]: {}\n",
            variant.label,
            structural_signature(&variant.text, lang),
            opener_type(&variant.text, lang),
            variant.text
        ));
        banned.extend(opening_content_tokens(&variant.text, lang, 3));
    }
    banned.sort();
    banned.dedup();
    if !banned.is_empty() {
        prompt.push_str(&format!(
            "\nDo not open with any of these words: {}\n",
            banned.join(", ")
        ));
    }
    prompt.push_str(&format!("Preferred opener type: {opener}\n"));

    prompt.push_str(&format!(
        "\nThe previous attempt failed because: {}\n",
        request.gate_reason
    ));
    for avoid in &constraints.must_avoid {
        prompt.push_str(&format!("Avoid: {avoid}\n"));
    }
    for must in &constraints.must_do {
        prompt.push_str(&format!("Do: {must}\n"));
    }

    if !request.anchors.is_empty() {
        prompt.push_str("\nSemantic anchors (each must be realized in the text):\n");
        for anchor in &request.anchors {
            prompt.push_str(&format!("- {}: {}\n", anchor.id, anchor.concept_en));
        }
    }
    prompt
}
