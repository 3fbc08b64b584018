//! Per-line generator: one LLM call, three labeled variants
//!
//! # Overview
//!
//! A single system/user prompt asks for strict JSON holding all three
//! variants with their anchor realizations and self-report metadata. The
//! wrapper's stop-sequence fallback covers truncation; a variant that fails
//! shape validation individually is replaced with a conservative fallback
//! and the result flagged, so one malformed variant never sinks the line.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use verso_core_lexicon::LanguageFamily;

use crate::anchors::{compute_subject_form, Anchor};
use crate::error::Result;
use crate::job::{SelfReport, VariantResult};
use crate::llm::{LlmCaller, LlmRequest, ResponseFormat};
use crate::recipe::cache::parse_json_payload;
use crate::recipe::{Mode, RecipeBundle, SubjectForm, VariantLabel};

/// Context for translating one line
#[derive(Debug, Clone)]
pub struct LineContext {
    pub line_text: String,
    pub prev_line: Option<String>,
    pub next_line: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub mode: Mode,
    pub poem: String,
}

/// Output of a generation call
#[derive(Debug, Clone)]
pub struct GeneratedLine {
    /// Exactly three variants, A then B then C
    pub variants: Vec<VariantResult>,
    pub model_used: String,
    /// True when any variant was replaced by the conservative fallback
    pub fallback_used: bool,
    pub latency_ms: u64,
}

/// Raw payload shape requested from the model
#[derive(Debug, Deserialize)]
pub(crate) struct RawLinePayload {
    pub variants: Vec<RawVariant>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVariant {
    pub label: VariantLabel,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub anchor_realizations: BTreeMap<String, String>,
    #[serde(default)]
    pub image_shift_summary: Option<String>,
    #[serde(default)]
    pub world_shift_summary: Option<String>,
    #[serde(default)]
    pub subject_form_used: Option<SubjectForm>,
}

/// The per-line generator
#[derive(Clone)]
pub struct LineGenerator {
    caller: LlmCaller,
}

impl LineGenerator {
    pub fn new(caller: LlmCaller) -> Self {
        Self { caller }
    }

    /// Translate one line into three variants
    pub async fn generate(
        &self,
        ctx: &LineContext,
        bundle: &RecipeBundle,
        anchors: &[Anchor],
        model: &str,
    ) -> Result<GeneratedLine> {
        let mut request = LlmRequest::new(model, &system_prompt(ctx), &user_prompt(ctx, bundle, anchors));
        request.response_format = Some(ResponseFormat::JsonObject);
        request.stop_sequences = vec!["```\n\n".to_string()];
        request.temperature = Some(0.9);
        request.max_output_tokens = Some(1200);

        let probe = |text: &str| -> std::result::Result<(), String> {
            parse_json_payload::<RawLinePayload>(text)
                .map(|_| ())
                .map_err(|e| e.to_string())
        };

        let outcome = self.caller.call(request, Some(&probe)).await?;
        let payload: RawLinePayload = parse_json_payload(&outcome.response.text)?;

        let target_family = LanguageFamily::resolve(&ctx.target_lang);
        let mut fallback_used = false;
        let mut variants = Vec::with_capacity(3);

        for label in VariantLabel::ALL {
            let raw = payload
                .variants
                .iter()
                .find(|v| v.label == label && !v.text.trim().is_empty());

            let variant = match raw {
                Some(raw) => build_variant(label, raw, target_family),
                None => {
                    warn!(label = %label, "variant missing or empty, substituting fallback");
                    fallback_used = true;
                    fallback_variant(label, ctx, &payload, target_family)
                }
            };
            variants.push(variant);
        }

        debug!(
            model,
            latency_ms = outcome.latency_ms,
            fallback_used,
            "line generated"
        );

        Ok(GeneratedLine {
            variants,
            model_used: model.to_string(),
            fallback_used,
            latency_ms: outcome.latency_ms,
        })
    }
}

/// Assemble a variant from a raw payload entry
///
/// For label C the subject form is recomputed from the text; the local value
/// wins over the model-reported one.
pub(crate) fn build_variant(
    label: VariantLabel,
    raw: &RawVariant,
    target_family: LanguageFamily,
) -> VariantResult {
    let text = raw.text.trim().to_string();

    let self_report = match label {
        VariantLabel::A => None,
        VariantLabel::B => Some(SelfReport {
            image_shift_summary: raw.image_shift_summary.clone(),
            world_shift_summary: None,
            subject_form_used: None,
        }),
        VariantLabel::C => Some(SelfReport {
            image_shift_summary: None,
            world_shift_summary: raw.world_shift_summary.clone(),
            subject_form_used: Some(compute_subject_form(&text, target_family)),
        }),
    };

    VariantResult {
        label,
        text,
        archetype: Some(label.archetype()),
        anchor_realizations: raw.anchor_realizations.clone(),
        self_report,
        words: Vec::new(),
    }
}

/// Conservative fallback for a variant that failed shape validation
///
/// Leans on variant A's text when present (the most faithful rendering),
/// otherwise the source line itself. Flagged by the caller; downstream
/// validation decides whether the line is degraded.
fn fallback_variant(
    label: VariantLabel,
    ctx: &LineContext,
    payload: &RawLinePayload,
    target_family: LanguageFamily,
) -> VariantResult {
    let base_text = payload
        .variants
        .iter()
        .find(|v| v.label == VariantLabel::A && !v.text.trim().is_empty())
        .map(|v| v.text.trim().to_string())
        .unwrap_or_else(|| ctx.line_text.clone());

    let self_report = match label {
        VariantLabel::A => None,
        VariantLabel::B => Some(SelfReport {
            image_shift_summary: None,
            world_shift_summary: None,
            subject_form_used: None,
        }),
        VariantLabel::C => Some(SelfReport {
            image_shift_summary: None,
            world_shift_summary: None,
            subject_form_used: Some(compute_subject_form(&base_text, target_family)),
        }),
    };

    VariantResult {
        label,
        text: base_text,
        archetype: Some(label.archetype()),
        anchor_realizations: BTreeMap::new(),
        self_report,
        words: Vec::new(),
    }
}

fn system_prompt(ctx: &LineContext) -> String {
    format!(
        "You translate one poem line from {src} into {tgt} as three artistically \
         distinct variants. Respond with strict JSON only: \
         {{\"variants\": [{{\"label\": \"A\"|\"B\"|\"C\", \"text\": string, \
         \"anchor_realizations\": {{anchor id: exact substring of the text}}, \
         \"image_shift_summary\": string (label B: at least 12 chars, name an anchor id), \
         \"world_shift_summary\": string (label C), \
         \"subject_form_used\": \"we\"|\"you\"|\"third_person\"|\"impersonal\"|\"i\" (label C)}}]}}. \
         Every anchor realization must appear verbatim in that variant's text. \
         The three variants must differ in opening, imagery, and wording.",
        src = ctx.source_lang,
        tgt = ctx.target_lang,
    )
}

fn user_prompt(ctx: &LineContext, bundle: &RecipeBundle, anchors: &[Anchor]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("Line to translate:\n{}\n\n", ctx.line_text));
    if let Some(prev) = &ctx.prev_line {
        prompt.push_str(&format!("Previous line: {prev}\n"));
    }
    if let Some(next) = &ctx.next_line {
        prompt.push_str(&format!("Next line: {next}\n"));
    }
    prompt.push_str(&format!("\nMode: {}\n", ctx.mode));

    prompt.push_str("\nRecipes:\n");
    for recipe in &bundle.recipes {
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            recipe.label,
            recipe
                .archetype
                .map(|a| a.as_str())
                .unwrap_or("unspecified"),
            recipe.directive
        ));
        if recipe.label == VariantLabel::C {
            if let Some(plan) = &recipe.stance_plan {
                prompt.push_str(&format!(
                    "  Variant C must speak as \"{}\" throughout.\n",
                    plan.subject_form
                ));
            }
        }
    }

    if !anchors.is_empty() {
        prompt.push_str("\nSemantic anchors (realize each in every variant):\n");
        for anchor in anchors {
            prompt.push_str(&format!("- {}: {}\n", anchor.id, anchor.concept_en));
        }
    }

    prompt.push_str(&format!("\nFull poem for context:\n{}\n", ctx.poem));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::LlmStats;
    use crate::llm::ScriptedProvider;
    use crate::recipe::{context_hash, static_bundle, RecipeContext};
    use std::sync::Arc;

    fn line_ctx() -> LineContext {
        LineContext {
            line_text: "河湾转冷".to_string(),
            prev_line: None,
            next_line: Some("风起".to_string()),
            source_lang: "Chinese".to_string(),
            target_lang: "English".to_string(),
            mode: Mode::Balanced,
            poem: "河湾转冷\n风起".to_string(),
        }
    }

    fn bundle() -> RecipeBundle {
        let ctx = RecipeContext {
            thread_id: "t1".to_string(),
            mode: Mode::Balanced,
            translation_intent: String::new(),
            translation_zone: String::new(),
            source_lang: "Chinese".to_string(),
            target_lang: "English".to_string(),
            poem: "河湾转冷\n风起".to_string(),
        };
        let hash = context_hash(&ctx);
        static_bundle(&ctx, &hash)
    }

    const GOOD_PAYLOAD: &str = r#"{
        "variants": [
            {"label": "A", "text": "The river bend turns cold",
             "anchor_realizations": {"RIVER_BEND": "river bend"}},
            {"label": "B", "text": "Cold settles where the water curves",
             "anchor_realizations": {"RIVER_BEND": "water curves"},
             "image_shift_summary": "Shifted RIVER_BEND from sight to temperature"},
            {"label": "C", "text": "We feel the bend of the river go cold",
             "anchor_realizations": {"RIVER_BEND": "bend of the river"},
             "world_shift_summary": "A shared crossing at dusk",
             "subject_form_used": "we"}
        ]
    }"#;

    fn anchors() -> Vec<Anchor> {
        vec![Anchor {
            id: "RIVER_BEND".to_string(),
            concept_en: "river bend".to_string(),
            source_tokens: vec!["河湾".to_string()],
        }]
    }

    fn generator(provider: ScriptedProvider) -> LineGenerator {
        LineGenerator::new(LlmCaller::new(Arc::new(provider), LlmStats::new()))
    }

    #[tokio::test]
    async fn test_generate_three_variants() {
        use crate::llm::script::ScriptStep;
        let provider = ScriptedProvider::new(vec![ScriptStep::reply(GOOD_PAYLOAD)]);
        let generator = generator(provider);

        let result = generator
            .generate(&line_ctx(), &bundle(), &anchors(), "gpt-4o")
            .await
            .unwrap();

        assert_eq!(result.variants.len(), 3);
        assert!(!result.fallback_used);
        assert_eq!(result.variants[0].label, VariantLabel::A);
        assert_eq!(result.variants[2].label, VariantLabel::C);
        // C's subject form is computed locally from the text
        assert_eq!(
            result.variants[2]
                .self_report
                .as_ref()
                .unwrap()
                .subject_form_used,
            Some(SubjectForm::We)
        );
    }

    #[tokio::test]
    async fn test_local_subject_form_wins_over_reported() {
        use crate::llm::script::ScriptStep;
        // Model claims "we" but the text opens first-person singular
        let payload = r#"{
            "variants": [
                {"label": "A", "text": "The river bend turns cold",
                 "anchor_realizations": {"RIVER_BEND": "river bend"}},
                {"label": "B", "text": "Cold settles where the water curves",
                 "anchor_realizations": {"RIVER_BEND": "water curves"},
                 "image_shift_summary": "Shifted RIVER_BEND to temperature"},
                {"label": "C", "text": "I walk the cold bend of the river",
                 "anchor_realizations": {"RIVER_BEND": "bend of the river"},
                 "world_shift_summary": "A lone crossing",
                 "subject_form_used": "we"}
            ]
        }"#;
        let provider = ScriptedProvider::new(vec![ScriptStep::reply(payload)]);
        let generator = generator(provider);

        let result = generator
            .generate(&line_ctx(), &bundle(), &anchors(), "gpt-4o")
            .await
            .unwrap();
        assert_eq!(
            result.variants[2]
                .self_report
                .as_ref()
                .unwrap()
                .subject_form_used,
            Some(SubjectForm::I)
        );
    }

    #[tokio::test]
    async fn test_missing_variant_gets_fallback() {
        use crate::llm::script::ScriptStep;
        let payload = r#"{
            "variants": [
                {"label": "A", "text": "The river bend turns cold",
                 "anchor_realizations": {"RIVER_BEND": "river bend"}},
                {"label": "B", "text": ""}
            ]
        }"#;
        let provider = ScriptedProvider::new(vec![ScriptStep::reply(payload)]);
        let generator = generator(provider);

        let result = generator
            .generate(&line_ctx(), &bundle(), &anchors(), "gpt-4o")
            .await
            .unwrap();
        assert!(result.fallback_used);
        assert_eq!(result.variants.len(), 3);
        // Fallbacks lean on variant A's faithful text
        assert_eq!(result.variants[1].text, "The river bend turns cold");
        assert_eq!(result.variants[2].text, "The river bend turns cold");
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_schema_error() {
        use crate::llm::script::ScriptStep;
        let provider = ScriptedProvider::new(vec![
            ScriptStep::reply("not json"),
            ScriptStep::reply("still not json"),
        ]);
        let generator = generator(provider);
        let err = generator
            .generate(&line_ctx(), &bundle(), &anchors(), "gpt-4o")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
