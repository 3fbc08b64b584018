//! Diversity gate: the three variants of a line must not read as one voice
//!
//! # Overview
//!
//! Five checks run in order against the three variants; the first violation
//! fails the gate. The outcome names the worst variant so the regenerator
//! knows which one to replace, and carries a reason string the regenerator
//! parses into constraints.
//!
//! Check order:
//! 1. Subject-opener collision (balanced/adventurous)
//! 2. Opening content-bigram collision (all modes)
//! 3. Comparison-marker constraints
//! 4. Walk-verb bucket collision (balanced/adventurous)
//! 5. Pairwise Jaccard overlap

use tracing::debug;

use verso_core_lexicon::LanguageFamily;
use verso_core_structure::{
    comparison_marker, has_walk_verb, jaccard, opening_content_tokens,
    source_has_comparison_marker, subject_opener, tokenize,
};

use crate::recipe::Mode;

/// Jaccard ceiling for any variant pair
pub const JACCARD_LIMIT: f64 = 0.6;

/// Minimum token count before the bigram check applies
const BIGRAM_MIN_TOKENS: usize = 6;

/// Gate verdict
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub pass: bool,
    /// Index (0-2) of the variant to replace when the gate fails
    pub worst_index: Option<usize>,
    pub reason: Option<String>,
}

impl GateOutcome {
    fn pass() -> Self {
        Self {
            pass: true,
            worst_index: None,
            reason: None,
        }
    }

    fn fail(worst_index: usize, reason: String) -> Self {
        Self {
            pass: false,
            worst_index: Some(worst_index),
            reason: Some(reason),
        }
    }
}

/// Run the gate over three variant texts
pub fn run_gate(variants: &[String; 3], lang_hint: &str, mode: Mode, source: &str) -> GateOutcome {
    let lang = LanguageFamily::resolve(lang_hint);

    if let Some(outcome) = check_subject_openers(variants, lang, mode) {
        return outcome;
    }
    if let Some(outcome) = check_opening_bigrams(variants, lang) {
        return outcome;
    }
    if let Some(outcome) = check_comparison_markers(variants, lang, mode, source) {
        return outcome;
    }
    if let Some(outcome) = check_walk_verbs(variants, mode) {
        return outcome;
    }
    if let Some(outcome) = check_jaccard(variants) {
        return outcome;
    }

    debug!(mode = %mode, "gate passed");
    GateOutcome::pass()
}

/// Check 1: two variants sharing the same detected subject-opener pattern
fn check_subject_openers(
    variants: &[String; 3],
    lang: LanguageFamily,
    mode: Mode,
) -> Option<GateOutcome> {
    if mode == Mode::Focused {
        return None;
    }

    let openers: Vec<_> = variants.iter().map(|v| subject_opener(v, lang)).collect();
    for i in 0..variants.len() {
        for j in (i + 1)..variants.len() {
            if let (Some(a), Some(b)) = (openers[i], openers[j]) {
                if a == b {
                    return Some(GateOutcome::fail(
                        j,
                        format!("subject-opener collision: variants {i} and {j} both open with {a}"),
                    ));
                }
            }
        }
    }
    None
}

/// Check 2: identical first two content tokens (variants of 6+ tokens)
fn check_opening_bigrams(variants: &[String; 3], lang: LanguageFamily) -> Option<GateOutcome> {
    let bigrams: Vec<Option<Vec<String>>> = variants
        .iter()
        .map(|v| {
            if tokenize(v).len() < BIGRAM_MIN_TOKENS {
                return None;
            }
            let opening = opening_content_tokens(v, lang, 2);
            (opening.len() == 2).then_some(opening)
        })
        .collect();

    for i in 0..variants.len() {
        for j in (i + 1)..variants.len() {
            if let (Some(a), Some(b)) = (&bigrams[i], &bigrams[j]) {
                if a == b {
                    return Some(GateOutcome::fail(
                        j,
                        format!(
                            "opening bigram collision: variants {i} and {j} both open with \"{}\"",
                            a.join(" ")
                        ),
                    ));
                }
            }
        }
    }
    None
}

/// Check 3: comparison-marker constraints
fn check_comparison_markers(
    variants: &[String; 3],
    lang: LanguageFamily,
    mode: Mode,
    source: &str,
) -> Option<GateOutcome> {
    let markers: Vec<Option<&'static str>> =
        variants.iter().map(|v| comparison_marker(v, lang)).collect();

    // Two variants sharing the same marker always fail
    for i in 0..variants.len() {
        for j in (i + 1)..variants.len() {
            if let (Some(a), Some(b)) = (markers[i], markers[j]) {
                if a == b {
                    return Some(GateOutcome::fail(
                        j,
                        format!("shared comparison marker: variants {i} and {j} both use \"{a}\""),
                    ));
                }
            }
        }
    }

    if !source_has_comparison_marker(source) {
        return None;
    }

    let users: Vec<usize> = markers
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.map(|_| i))
        .collect();

    let limit_exceeded = match mode {
        // Focused keeps the source's simile; fails only when all three lean on one
        Mode::Focused => users.len() == 3,
        Mode::Balanced | Mode::Adventurous => users.len() > 1,
    };

    if limit_exceeded {
        let worst = *users.last()?;
        return Some(GateOutcome::fail(
            worst,
            format!(
                "comparison marker overuse: {} variants use a simile marker, at most one may",
                users.len()
            ),
        ));
    }
    None
}

/// Check 4: two variants drawing from the walk-verb bucket
fn check_walk_verbs(variants: &[String; 3], mode: Mode) -> Option<GateOutcome> {
    if mode == Mode::Focused {
        return None;
    }

    let walkers: Vec<usize> = variants
        .iter()
        .enumerate()
        .filter_map(|(i, v)| has_walk_verb(v).then_some(i))
        .collect();

    if walkers.len() >= 2 {
        let i = walkers[0];
        let j = walkers[1];
        return Some(GateOutcome::fail(
            j,
            format!("walk-verb collision: variants {i} and {j} both use a walk verb"),
        ));
    }
    None
}

/// Check 5: pairwise Jaccard overlap over normalized token sets
///
/// Worst index is the variant in the most high-overlap pairs; ties break
/// toward the second variant of the maximum pair.
fn check_jaccard(variants: &[String; 3]) -> Option<GateOutcome> {
    let mut max_overlap = 0.0f64;
    let mut max_pair = (0usize, 1usize);
    let mut high_counts = [0usize; 3];

    for i in 0..variants.len() {
        for j in (i + 1)..variants.len() {
            let overlap = jaccard(&variants[i], &variants[j]);
            if overlap > JACCARD_LIMIT {
                high_counts[i] += 1;
                high_counts[j] += 1;
            }
            if overlap > max_overlap {
                max_overlap = overlap;
                max_pair = (i, j);
            }
        }
    }

    if max_overlap <= JACCARD_LIMIT {
        return None;
    }

    let most = *high_counts.iter().max().unwrap_or(&0);
    let tied: Vec<usize> = (0..3).filter(|&i| high_counts[i] == most).collect();
    let worst = if tied.contains(&max_pair.1) {
        max_pair.1
    } else {
        *tied.first().unwrap_or(&max_pair.1)
    };

    Some(GateOutcome::fail(
        worst,
        format!(
            "jaccard overlap {max_overlap:.2} between variants {} and {} exceeds {JACCARD_LIMIT}",
            max_pair.0, max_pair.1
        ),
    ))
}
