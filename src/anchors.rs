//! Semantic anchors: named concepts every variant must realize in-text
//!
//! # Overview
//!
//! An anchor names a concept from the source line (`RIVER_BEND`, `COLD_AIR`)
//! that each variant must carry as an actual substring of its translation.
//! Validation covers the anchor set itself (id format, uniqueness, no
//! pronoun concepts), each variant's realization map, and the self-report
//! metadata variants B and C attach.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use verso_core_lexicon::{contains_normalized, is_stopword_only, LanguageFamily};
use verso_core_structure::{subject_opener, SubjectOpener};

use crate::error::{EngineError, Result};
use crate::job::{SelfReport, VariantResult};
use crate::recipe::{Mode, StancePlan, SubjectForm};

/// Anchor set size bounds
pub const MIN_ANCHORS: usize = 2;
pub const MAX_ANCHORS: usize = 8;

/// A named semantic concept from the source line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// UPPER_SNAKE identifier, unique within the set
    pub id: String,
    /// English gloss of the concept
    pub concept_en: String,
    /// Source-line tokens the concept came from
    #[serde(default)]
    pub source_tokens: Vec<String>,
}

/// Pronouns and person markers that may not be anchor concepts
const PERSON_MARKERS: &[&str] = &[
    "i", "you", "we", "he", "she", "they", "it", "one", "me", "us", "them", "him", "her",
    "myself", "ourselves", "narrator", "speaker", "self",
];

/// Check an id is UPPER_SNAKE: uppercase start, then uppercase/digits/underscores
fn is_upper_snake(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Validate the anchor set itself
pub fn validate_anchor_set(anchors: &[Anchor]) -> Result<()> {
    if !(MIN_ANCHORS..=MAX_ANCHORS).contains(&anchors.len()) {
        return Err(EngineError::Schema(format!(
            "anchor set has {} entries, expected {MIN_ANCHORS}-{MAX_ANCHORS}",
            anchors.len()
        )));
    }

    let mut seen = std::collections::BTreeSet::new();
    for anchor in anchors {
        if !is_upper_snake(&anchor.id) {
            return Err(EngineError::Schema(format!(
                "anchor id {:?} is not UPPER_SNAKE",
                anchor.id
            )));
        }
        if !seen.insert(anchor.id.as_str()) {
            return Err(EngineError::Schema(format!(
                "duplicate anchor id {:?}",
                anchor.id
            )));
        }
        let concept = anchor.concept_en.trim().to_lowercase();
        if PERSON_MARKERS.contains(&concept.as_str()) {
            return Err(EngineError::Schema(format!(
                "anchor {:?} names a pronoun or person marker",
                anchor.id
            )));
        }
    }
    Ok(())
}

/// Realization length exception: single digits and single uppercase letters
/// (acronym fragments) pass the two-character floor
fn short_realization_allowed(realization: &str) -> bool {
    let mut chars = realization.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_ascii_digit() || c.is_ascii_uppercase(),
        _ => false,
    }
}

/// Validate one variant's realization map against the anchor set
///
/// Returns every violation found, empty when the variant is clean.
pub fn validate_variant_anchors(
    variant_text: &str,
    anchors: &[Anchor],
    realizations: &BTreeMap<String, String>,
    target_lang: LanguageFamily,
) -> Vec<String> {
    let mut violations = Vec::new();

    for anchor in anchors {
        let Some(realization) = realizations.get(&anchor.id) else {
            violations.push(format!("anchor {} has no realization", anchor.id));
            continue;
        };

        if !realization.chars().any(char::is_alphanumeric) {
            violations.push(format!(
                "anchor {} realization {:?} has no alphanumeric content",
                anchor.id, realization
            ));
            continue;
        }
        if realization.chars().count() < 2 && !short_realization_allowed(realization) {
            violations.push(format!(
                "anchor {} realization {:?} is too short",
                anchor.id, realization
            ));
            continue;
        }
        if is_stopword_only(realization, target_lang) {
            violations.push(format!(
                "anchor {} realization {:?} is stopword-only",
                anchor.id, realization
            ));
            continue;
        }
        if !contains_normalized(variant_text, realization) {
            violations.push(format!(
                "anchor {} realization {:?} does not appear in the variant text",
                anchor.id, realization
            ));
        }
    }

    violations
}

/// Vague phrases an image-shift summary may not consist of
const VAGUE_SUMMARIES: &[&str] = &[
    "more poetic",
    "just different",
    "slightly different",
    "different wording",
    "same but different",
    "more vivid",
    "more beautiful",
];

/// Validate variant B's image-shift self-report
pub fn validate_image_shift(report: Option<&SelfReport>, anchors: &[Anchor]) -> Vec<String> {
    let summary = report
        .and_then(|r| r.image_shift_summary.as_deref())
        .unwrap_or("")
        .trim();

    let mut violations = Vec::new();
    if summary.chars().count() < 12 {
        violations.push("image shift summary is missing or shorter than 12 chars".to_string());
        return violations;
    }

    let lowered = summary.to_lowercase();
    if VAGUE_SUMMARIES.contains(&lowered.as_str()) {
        violations.push(format!("image shift summary {summary:?} is vague"));
    }
    if !anchors.is_empty()
        && !anchors
            .iter()
            .any(|a| lowered.contains(&a.id.to_lowercase()))
    {
        violations.push("image shift summary mentions no anchor id".to_string());
    }
    violations
}

/// Validate variant C's world-shift self-report against the stance plan
pub fn validate_world_shift(
    report: Option<&SelfReport>,
    mode: Mode,
    plan: Option<&StancePlan>,
) -> Vec<String> {
    let mut violations = Vec::new();

    let Some(report) = report else {
        violations.push("variant C is missing its self report".to_string());
        return violations;
    };

    if report
        .world_shift_summary
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        violations.push("world shift summary is missing".to_string());
    }

    match report.subject_form_used {
        None => violations.push("subject form is missing".to_string()),
        Some(form) => {
            if !form.allowed_in(mode) {
                violations.push(format!("subject form {form} is forbidden in {mode} mode"));
            }
            if let Some(plan) = plan {
                if form != plan.subject_form {
                    violations.push(format!(
                        "subject form {form} does not match the stance plan's {}",
                        plan.subject_form
                    ));
                }
            }
        }
    }
    violations
}

/// Compute the subject form locally from the variant text
///
/// Preferred over the model-reported value: the text is ground truth.
pub fn compute_subject_form(text: &str, lang: LanguageFamily) -> SubjectForm {
    match subject_opener(text, lang) {
        Some(SubjectOpener::FirstSingular) => SubjectForm::I,
        Some(SubjectOpener::FirstPlural) => SubjectForm::We,
        Some(SubjectOpener::SecondPerson) => SubjectForm::You,
        Some(SubjectOpener::ThirdPerson) => SubjectForm::ThirdPerson,
        Some(SubjectOpener::Gerund) | None => SubjectForm::Impersonal,
    }
}

/// Full validation of a variant against anchors and metadata rules
pub fn validate_variant(
    variant: &VariantResult,
    anchors: &[Anchor],
    mode: Mode,
    plan: Option<&StancePlan>,
    target_lang: LanguageFamily,
) -> Vec<String> {
    let mut violations =
        validate_variant_anchors(&variant.text, anchors, &variant.anchor_realizations, target_lang);

    match variant.label {
        crate::recipe::VariantLabel::A => {}
        crate::recipe::VariantLabel::B => {
            violations.extend(validate_image_shift(variant.self_report.as_ref(), anchors));
        }
        crate::recipe::VariantLabel::C => {
            violations.extend(validate_world_shift(variant.self_report.as_ref(), mode, plan));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::VariantLabel;

    fn anchors() -> Vec<Anchor> {
        vec![
            Anchor {
                id: "RIVER_BEND".to_string(),
                concept_en: "river bend".to_string(),
                source_tokens: vec!["河".to_string()],
            },
            Anchor {
                id: "COLD_AIR".to_string(),
                concept_en: "cold air".to_string(),
                source_tokens: vec![],
            },
        ]
    }

    fn realizations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_anchor_set_valid() {
        assert!(validate_anchor_set(&anchors()).is_ok());
    }

    #[test]
    fn test_anchor_set_size_bounds() {
        assert!(validate_anchor_set(&[]).is_err());
        let one = vec![anchors().remove(0)];
        assert!(validate_anchor_set(&one).is_err());
        let many: Vec<Anchor> = (0..9)
            .map(|i| Anchor {
                id: format!("ANCHOR_{i}"),
                concept_en: format!("concept {i}"),
                source_tokens: vec![],
            })
            .collect();
        assert!(validate_anchor_set(&many).is_err());
    }

    #[test]
    fn test_anchor_id_format() {
        let mut bad = anchors();
        bad[0].id = "riverBend".to_string();
        assert!(validate_anchor_set(&bad).is_err());

        let mut bad = anchors();
        bad[0].id = "_RIVER".to_string();
        assert!(validate_anchor_set(&bad).is_err());

        let mut ok = anchors();
        ok[0].id = "RIVER_2".to_string();
        assert!(validate_anchor_set(&ok).is_ok());
    }

    #[test]
    fn test_anchor_duplicate_and_pronoun() {
        let mut dup = anchors();
        dup[1].id = "RIVER_BEND".to_string();
        assert!(validate_anchor_set(&dup).is_err());

        let mut pronoun = anchors();
        pronoun[0].concept_en = "I".to_string();
        assert!(validate_anchor_set(&pronoun).is_err());

        let mut narrator = anchors();
        narrator[0].concept_en = "NARRATOR".to_string();
        assert!(validate_anchor_set(&narrator).is_err());
    }

    #[test]
    fn test_realization_containment() {
        let text = "The river bends where the cold air settles";
        let good = realizations(&[("RIVER_BEND", "river bends"), ("COLD_AIR", "cold air")]);
        assert!(
            validate_variant_anchors(text, &anchors(), &good, LanguageFamily::English).is_empty()
        );

        let missing_text = realizations(&[("RIVER_BEND", "ocean"), ("COLD_AIR", "cold air")]);
        let violations =
            validate_variant_anchors(text, &anchors(), &missing_text, LanguageFamily::English);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("does not appear"));
    }

    #[test]
    fn test_realization_coverage_and_quality() {
        let text = "The river bends in the cold";
        // Missing COLD_AIR entirely
        let partial = realizations(&[("RIVER_BEND", "river bends")]);
        let violations =
            validate_variant_anchors(text, &anchors(), &partial, LanguageFamily::English);
        assert!(violations.iter().any(|v| v.contains("no realization")));

        // Stopword-only realization
        let stopwords = realizations(&[("RIVER_BEND", "the"), ("COLD_AIR", "cold")]);
        let violations =
            validate_variant_anchors(text, &anchors(), &stopwords, LanguageFamily::English);
        assert!(violations.iter().any(|v| v.contains("too short") || v.contains("stopword-only")));

        // Punctuation-only realization
        let punct = realizations(&[("RIVER_BEND", "—!"), ("COLD_AIR", "cold")]);
        let violations =
            validate_variant_anchors(text, &anchors(), &punct, LanguageFamily::English);
        assert!(violations.iter().any(|v| v.contains("no alphanumeric")));
    }

    #[test]
    fn test_short_realization_exceptions() {
        let text = "Route 7 in the cold";
        let anchors = vec![
            Anchor {
                id: "ROUTE_NUMBER".to_string(),
                concept_en: "route number".to_string(),
                source_tokens: vec![],
            },
            Anchor {
                id: "COLD_AIR".to_string(),
                concept_en: "cold air".to_string(),
                source_tokens: vec![],
            },
        ];
        let r = realizations(&[("ROUTE_NUMBER", "7"), ("COLD_AIR", "cold")]);
        assert!(validate_variant_anchors(text, &anchors, &r, LanguageFamily::English).is_empty());
    }

    #[test]
    fn test_image_shift_validation() {
        let good = SelfReport {
            image_shift_summary: Some("Shifted RIVER_BEND from sight to sound".to_string()),
            ..Default::default()
        };
        assert!(validate_image_shift(Some(&good), &anchors()).is_empty());

        let short = SelfReport {
            image_shift_summary: Some("shifted".to_string()),
            ..Default::default()
        };
        assert!(!validate_image_shift(Some(&short), &anchors()).is_empty());

        let vague = SelfReport {
            image_shift_summary: Some("more poetic".to_string()),
            ..Default::default()
        };
        assert!(!validate_image_shift(Some(&vague), &anchors()).is_empty());

        let no_anchor = SelfReport {
            image_shift_summary: Some("Turned the light colder and slower".to_string()),
            ..Default::default()
        };
        assert!(validate_image_shift(Some(&no_anchor), &anchors())
            .iter()
            .any(|v| v.contains("mentions no anchor")));

        assert!(!validate_image_shift(None, &anchors()).is_empty());
    }

    #[test]
    fn test_world_shift_validation() {
        let plan = StancePlan {
            subject_form: SubjectForm::We,
            world_frame: None,
            register_shift: None,
        };
        let good = SelfReport {
            world_shift_summary: Some("Moved the scene to a night harbor".to_string()),
            subject_form_used: Some(SubjectForm::We),
            ..Default::default()
        };
        assert!(validate_world_shift(Some(&good), Mode::Balanced, Some(&plan)).is_empty());

        // "i" forbidden outside focused
        let first_person = SelfReport {
            world_shift_summary: Some("Moved the scene".to_string()),
            subject_form_used: Some(SubjectForm::I),
            ..Default::default()
        };
        let violations = validate_world_shift(Some(&first_person), Mode::Balanced, Some(&plan));
        assert!(violations.iter().any(|v| v.contains("forbidden")));

        // Mismatch against the stance plan
        let mismatch = SelfReport {
            world_shift_summary: Some("Moved the scene".to_string()),
            subject_form_used: Some(SubjectForm::You),
            ..Default::default()
        };
        let violations = validate_world_shift(Some(&mismatch), Mode::Balanced, Some(&plan));
        assert!(violations.iter().any(|v| v.contains("does not match")));
    }

    #[test]
    fn test_compute_subject_form() {
        let en = LanguageFamily::English;
        assert_eq!(compute_subject_form("I walk alone", en), SubjectForm::I);
        assert_eq!(compute_subject_form("We walk alone", en), SubjectForm::We);
        assert_eq!(compute_subject_form("You walk alone", en), SubjectForm::You);
        assert_eq!(
            compute_subject_form("She walks alone", en),
            SubjectForm::ThirdPerson
        );
        assert_eq!(
            compute_subject_form("The river bends", en),
            SubjectForm::Impersonal
        );
        assert_eq!(
            compute_subject_form("Walking the shore", en),
            SubjectForm::Impersonal
        );
    }

    #[test]
    fn test_validate_variant_b_and_c() {
        let anchors = anchors();
        let b = VariantResult {
            label: VariantLabel::B,
            text: "The river bends in the cold air".to_string(),
            archetype: None,
            anchor_realizations: realizations(&[
                ("RIVER_BEND", "river bends"),
                ("COLD_AIR", "cold air"),
            ]),
            self_report: Some(SelfReport {
                image_shift_summary: Some("Bent RIVER_BEND toward sound".to_string()),
                ..Default::default()
            }),
            words: vec![],
        };
        assert!(validate_variant(&b, &anchors, Mode::Balanced, None, LanguageFamily::English)
            .is_empty());

        let c = VariantResult {
            label: VariantLabel::C,
            text: "We follow the river bend through cold air".to_string(),
            archetype: None,
            anchor_realizations: realizations(&[
                ("RIVER_BEND", "river bend"),
                ("COLD_AIR", "cold air"),
            ]),
            self_report: None,
            words: vec![],
        };
        let violations =
            validate_variant(&c, &anchors, Mode::Balanced, None, LanguageFamily::English);
        assert!(violations.iter().any(|v| v.contains("self report")));
    }
}
