//! Core-Structure: Pure-logic structural analysis of poem lines
//!
//! # Overview
//!
//! This crate classifies how a line *opens*, how long it is, and how it is
//! punctuated, and condenses those into a structural signature used for
//! template-collision detection. It also carries the lexical-overlap
//! primitives (Jaccard similarity, comparison markers, motion-verb buckets)
//! the diversity gate is built on.
//!
//! # Key Principles
//!
//! Pure logic, no I/O, no async. Language awareness comes exclusively from
//! `verso-core-lexicon`'s family resolution; all tables here are flat static
//! sets keyed by family.
//!
//! # Example
//!
//! ```
//! use verso_core_lexicon::LanguageFamily;
//! use verso_core_structure::{opener_type, structural_signature, OpenerType};
//!
//! let lang = LanguageFamily::English;
//! assert_eq!(opener_type("Under the bridge, we wait", lang), OpenerType::Prep);
//! assert_eq!(
//!     structural_signature("Under the bridge, we wait", lang),
//!     "PREP|short|c1d0k0s0|pres"
//! );
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use verso_core_lexicon::{content_tokens, LanguageFamily};
pub use verso_core_lexicon::tokenize;

mod tables;

use tables::{determiners, prepositions, pronouns, COMPARISON_MARKERS_CJK, WALK_VERBS};

/// How a line opens, by first-token class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenerType {
    /// Opens with a pronoun
    Pron,
    /// Opens with a preposition
    Prep,
    /// Opens with a determiner-led noun phrase
    NounPhrase,
    /// Opens with a gerund (English heuristic)
    Gerund,
    /// Anything else
    Other,
}

impl fmt::Display for OpenerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenerType::Pron => write!(f, "PRON"),
            OpenerType::Prep => write!(f, "PREP"),
            OpenerType::NounPhrase => write!(f, "NOUN_PHRASE"),
            OpenerType::Gerund => write!(f, "GERUND"),
            OpenerType::Other => write!(f, "OTHER"),
        }
    }
}

/// Length bucket measured in non-punctuation tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBucket {
    /// At most 6 tokens
    Short,
    /// 7 to 14 tokens
    Medium,
    /// 15 tokens or more
    Long,
}

impl fmt::Display for LengthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthBucket::Short => write!(f, "short"),
            LengthBucket::Medium => write!(f, "med"),
            LengthBucket::Long => write!(f, "long"),
        }
    }
}

/// The grammatical subject a line opens with, where detectable
///
/// Used by the gate's subject-opener collision check: two variants opening on
/// the same subject pattern read as the same template even when the imagery
/// differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectOpener {
    FirstSingular,
    FirstPlural,
    SecondPerson,
    ThirdPerson,
    Gerund,
}

impl fmt::Display for SubjectOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectOpener::FirstSingular => write!(f, "first_singular"),
            SubjectOpener::FirstPlural => write!(f, "first_plural"),
            SubjectOpener::SecondPerson => write!(f, "second_person"),
            SubjectOpener::ThirdPerson => write!(f, "third_person"),
            SubjectOpener::Gerund => write!(f, "gerund"),
        }
    }
}

/// Punctuation counts used in the structural signature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunctuationProfile {
    pub commas: usize,
    pub dashes: usize,
    pub colons: usize,
    pub semicolons: usize,
}

/// Count commas, dashes, colons, and semicolons in the raw text
///
/// Counted before normalization (normalization strips punctuation). Unicode
/// dash variants all count as dashes.
pub fn punctuation_profile(text: &str) -> PunctuationProfile {
    let mut profile = PunctuationProfile::default();
    for c in text.chars() {
        match c {
            ',' | '\u{3001}' | '\u{FF0C}' => profile.commas += 1,
            '-' | '\u{2010}'..='\u{2015}' | '\u{2212}' => profile.dashes += 1,
            ':' | '\u{FF1A}' => profile.colons += 1,
            ';' | '\u{FF1B}' => profile.semicolons += 1,
            _ => {}
        }
    }
    profile
}

/// Nouns ending in `-ing` that must not be mistaken for gerunds
static GERUND_DENYLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "morning", "evening", "nothing", "something", "anything", "everything", "thing",
        "things", "spring", "string", "ring", "king", "wing", "sing", "bring", "darling",
        "ceiling", "lightning", "building", "being", "during",
    ]
    .into_iter()
    .collect()
});

/// Classify the opener of a line
///
/// First-token lookup against the family's pronoun, preposition, and
/// determiner sets, with an English gerund heuristic guarded by a
/// noun-in-`-ing` denylist.
pub fn opener_type(text: &str, lang: LanguageFamily) -> OpenerType {
    let tokens = tokenize(text);
    let Some(first) = tokens.first() else {
        return OpenerType::Other;
    };
    let first = first.as_str();

    if pronouns(lang).contains(first) || (lang == LanguageFamily::French && first.starts_with("j'"))
    {
        return OpenerType::Pron;
    }
    if prepositions(lang).contains(first) {
        return OpenerType::Prep;
    }
    if determiners(lang).contains(first)
        || (lang == LanguageFamily::French && first.starts_with("l'"))
    {
        return OpenerType::NounPhrase;
    }
    if lang == LanguageFamily::English
        && first.len() > 4
        && first.ends_with("ing")
        && !GERUND_DENYLIST.contains(first)
    {
        return OpenerType::Gerund;
    }
    OpenerType::Other
}

/// Bucket a line's length in non-punctuation tokens
pub fn length_bucket(text: &str) -> LengthBucket {
    match tokenize(text).len() {
        0..=6 => LengthBucket::Short,
        7..=14 => LengthBucket::Medium,
        _ => LengthBucket::Long,
    }
}

/// Detect the subject pattern a line opens with, where one is detectable
pub fn subject_opener(text: &str, lang: LanguageFamily) -> Option<SubjectOpener> {
    let tokens = tokenize(text);
    let first = tokens.first()?.as_str();

    let detected = match lang {
        LanguageFamily::English => match first {
            "i" => Some(SubjectOpener::FirstSingular),
            "we" => Some(SubjectOpener::FirstPlural),
            "you" => Some(SubjectOpener::SecondPerson),
            "he" | "she" | "it" | "they" => Some(SubjectOpener::ThirdPerson),
            _ => None,
        },
        LanguageFamily::French => {
            if first == "je" || first.starts_with("j'") {
                Some(SubjectOpener::FirstSingular)
            } else {
                match first {
                    "nous" => Some(SubjectOpener::FirstPlural),
                    "tu" | "vous" => Some(SubjectOpener::SecondPerson),
                    "il" | "elle" | "ils" | "elles" | "on" => Some(SubjectOpener::ThirdPerson),
                    _ => None,
                }
            }
        }
        LanguageFamily::Spanish => match first {
            "yo" => Some(SubjectOpener::FirstSingular),
            "nosotros" | "nosotras" => Some(SubjectOpener::FirstPlural),
            "tú" | "tu" | "usted" | "ustedes" | "vosotros" | "vosotras" => {
                Some(SubjectOpener::SecondPerson)
            }
            "él" | "ella" | "ellos" | "ellas" => Some(SubjectOpener::ThirdPerson),
            _ => None,
        },
        LanguageFamily::German => match first {
            "ich" => Some(SubjectOpener::FirstSingular),
            "wir" => Some(SubjectOpener::FirstPlural),
            "du" | "ihr" => Some(SubjectOpener::SecondPerson),
            "er" | "sie" | "es" => Some(SubjectOpener::ThirdPerson),
            _ => None,
        },
        LanguageFamily::Portuguese => match first {
            "eu" => Some(SubjectOpener::FirstSingular),
            "nós" => Some(SubjectOpener::FirstPlural),
            "tu" | "você" | "vocês" | "vós" => Some(SubjectOpener::SecondPerson),
            "ele" | "ela" | "eles" | "elas" => Some(SubjectOpener::ThirdPerson),
            _ => None,
        },
        LanguageFamily::Italian => match first {
            "io" => Some(SubjectOpener::FirstSingular),
            "noi" => Some(SubjectOpener::FirstPlural),
            "tu" | "voi" => Some(SubjectOpener::SecondPerson),
            "lui" | "lei" | "loro" => Some(SubjectOpener::ThirdPerson),
            _ => None,
        },
    };

    detected.or_else(|| {
        if opener_type(text, lang) == OpenerType::Gerund {
            Some(SubjectOpener::Gerund)
        } else {
            None
        }
    })
}

/// Rough tense classification used as the last signature segment
///
/// A heuristic, not a parser: future markers win, then past-looking verb
/// endings, else present.
pub fn tense_approx(text: &str, lang: LanguageFamily) -> &'static str {
    let tokens = tokenize(text);

    let future_markers: &[&str] = match lang {
        LanguageFamily::English => &["will", "shall", "gonna"],
        LanguageFamily::French => &["sera", "seront", "aura", "auront"],
        LanguageFamily::Spanish => &["será", "serán", "habrá"],
        LanguageFamily::German => &["wird", "werden"],
        LanguageFamily::Portuguese => &["será", "serão", "haverá"],
        LanguageFamily::Italian => &["sarà", "saranno", "avrà"],
    };
    if tokens.iter().any(|t| future_markers.contains(&t.as_str())) {
        return "fut";
    }

    let past_endings: &[&str] = match lang {
        LanguageFamily::English => &["ed"],
        LanguageFamily::French => &["ait", "aient", "èrent"],
        LanguageFamily::Spanish => &["aba", "aban", "ió", "aron"],
        LanguageFamily::German => &["te", "ten"],
        LanguageFamily::Portuguese => &["ava", "avam", "ou", "aram"],
        LanguageFamily::Italian => &["ava", "avano", "ò", "arono"],
    };
    let is_past = tokens.iter().any(|t| {
        t.chars().count() > 4 && past_endings.iter().any(|suffix| t.ends_with(suffix))
    });
    if is_past {
        "past"
    } else {
        "pres"
    }
}

/// Build the structural signature `{opener}|{bucket}|c{c}d{d}k{k}s{s}|{tense}`
///
/// Stable under leading/trailing whitespace; used for template-collision
/// detection across a line's variants.
pub fn structural_signature(text: &str, lang: LanguageFamily) -> String {
    let trimmed = text.trim();
    let opener = opener_type(trimmed, lang);
    let bucket = length_bucket(trimmed);
    let punct = punctuation_profile(trimmed);
    let tense = tense_approx(trimmed, lang);
    format!(
        "{}|{}|c{}d{}k{}s{}|{}",
        opener, bucket, punct.commas, punct.dashes, punct.colons, punct.semicolons, tense
    )
}

/// Find a comparison marker used in a line, if any
///
/// Checks single-token markers and the two-token forms ("as if", "comme si",
/// "como si"). Returns the canonical marker so two variants can be compared
/// for *sharing* a marker.
pub fn comparison_marker(text: &str, lang: LanguageFamily) -> Option<&'static str> {
    let tokens = tokenize(text);
    for window in tokens.windows(2) {
        match (window[0].as_str(), window[1].as_str()) {
            ("as", "if") => return Some("as if"),
            ("comme", "si") => return Some("comme si"),
            ("como", "si") => return Some("como si"),
            _ => {}
        }
    }
    for token in &tokens {
        let marker: Option<&'static str> = match (lang, token.as_str()) {
            (LanguageFamily::English, "like") => Some("like"),
            (LanguageFamily::English, "as") => Some("as"),
            (LanguageFamily::French, "comme") => Some("comme"),
            (LanguageFamily::Spanish | LanguageFamily::Portuguese, "como") => Some("como"),
            (LanguageFamily::Italian, "come") => Some("come"),
            _ => None,
        };
        if marker.is_some() {
            return marker;
        }
    }
    None
}

/// Check whether a source line carries a comparison marker in any language
///
/// The source may be in a language outside the supported families (e.g.
/// Chinese), so this scans every family's markers plus CJK simile characters
/// as raw substrings.
pub fn source_has_comparison_marker(text: &str) -> bool {
    for marker in COMPARISON_MARKERS_CJK {
        if text.contains(marker) {
            return true;
        }
    }
    let families = [
        LanguageFamily::English,
        LanguageFamily::French,
        LanguageFamily::Spanish,
        LanguageFamily::Italian,
    ];
    families.iter().any(|f| comparison_marker(text, *f).is_some())
}

/// Check whether a line uses a verb from the walk/stroll/wander bucket
pub fn has_walk_verb(text: &str) -> bool {
    tokenize(text).iter().any(|t| WALK_VERBS.contains(t.as_str()))
}

/// Pairwise Jaccard similarity over normalized token sets
///
/// Returns 0.0 when either side has no tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// The first `n` content (non-stopword) tokens of a line
pub fn opening_content_tokens(text: &str, lang: LanguageFamily, n: usize) -> Vec<String> {
    content_tokens(text, lang).into_iter().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EN: LanguageFamily = LanguageFamily::English;

    #[test]
    fn test_opener_classification() {
        assert_eq!(opener_type("I walk alone", EN), OpenerType::Pron);
        assert_eq!(opener_type("Under the bridge", EN), OpenerType::Prep);
        assert_eq!(opener_type("The river bends", EN), OpenerType::NounPhrase);
        assert_eq!(opener_type("Walking into dusk", EN), OpenerType::Gerund);
        assert_eq!(opener_type("Rivers bend slowly", EN), OpenerType::Other);
        assert_eq!(opener_type("", EN), OpenerType::Other);
    }

    #[test]
    fn test_gerund_denylist() {
        assert_eq!(opener_type("Morning comes slowly", EN), OpenerType::Other);
        assert_eq!(opener_type("Nothing remains here", EN), OpenerType::Other);
        assert_eq!(opener_type("Lightning splits the sky", EN), OpenerType::Other);
    }

    #[test]
    fn test_french_openers() {
        let fr = LanguageFamily::French;
        assert_eq!(opener_type("Je marche seul", fr), OpenerType::Pron);
        assert_eq!(opener_type("J'avance dans la nuit", fr), OpenerType::Pron);
        assert_eq!(opener_type("Dans la nuit", fr), OpenerType::Prep);
        assert_eq!(opener_type("La rivière tourne", fr), OpenerType::NounPhrase);
        assert_eq!(opener_type("L'eau se retire", fr), OpenerType::NounPhrase);
    }

    #[test]
    fn test_length_buckets() {
        assert_eq!(length_bucket("one two three"), LengthBucket::Short);
        assert_eq!(
            length_bucket("one two three four five six seven eight"),
            LengthBucket::Medium
        );
        let long = "w ".repeat(16);
        assert_eq!(length_bucket(&long), LengthBucket::Long);
    }

    #[test]
    fn test_punctuation_profile() {
        let p = punctuation_profile("a, b — c: d; e, f");
        assert_eq!(p.commas, 2);
        assert_eq!(p.dashes, 1);
        assert_eq!(p.colons, 1);
        assert_eq!(p.semicolons, 1);
    }

    #[test]
    fn test_signature_shape_and_whitespace_stability() {
        let sig = structural_signature("Under the bridge, we wait", EN);
        assert_eq!(sig, "PREP|short|c1d0k0s0|pres");
        assert_eq!(
            structural_signature("  Under the bridge, we wait \n", EN),
            sig
        );
    }

    #[test]
    fn test_signature_tense_segment() {
        assert!(structural_signature("The river bended away", EN).ends_with("|past"));
        assert!(structural_signature("The river will bend", EN).ends_with("|fut"));
        assert!(structural_signature("The river bends", EN).ends_with("|pres"));
    }

    #[test]
    fn test_subject_openers() {
        assert_eq!(subject_opener("I walk", EN), Some(SubjectOpener::FirstSingular));
        assert_eq!(subject_opener("We wait", EN), Some(SubjectOpener::FirstPlural));
        assert_eq!(subject_opener("You linger", EN), Some(SubjectOpener::SecondPerson));
        assert_eq!(subject_opener("They scatter", EN), Some(SubjectOpener::ThirdPerson));
        assert_eq!(subject_opener("Walking home", EN), Some(SubjectOpener::Gerund));
        assert_eq!(subject_opener("Rivers bend", EN), None);
        assert_eq!(
            subject_opener("Je marche", LanguageFamily::French),
            Some(SubjectOpener::FirstSingular)
        );
        assert_eq!(
            subject_opener("Nous marchons", LanguageFamily::French),
            Some(SubjectOpener::FirstPlural)
        );
        assert_eq!(
            subject_opener("Yo camino", LanguageFamily::Spanish),
            Some(SubjectOpener::FirstSingular)
        );
    }

    #[test]
    fn test_comparison_markers() {
        assert_eq!(comparison_marker("soft like rain", EN), Some("like"));
        assert_eq!(comparison_marker("as if the sky fell", EN), Some("as if"));
        assert_eq!(
            comparison_marker("comme si de rien", LanguageFamily::French),
            Some("comme si")
        );
        assert_eq!(
            comparison_marker("ligero como el viento", LanguageFamily::Spanish),
            Some("como")
        );
        assert_eq!(comparison_marker("the rain falls", EN), None);
    }

    #[test]
    fn test_source_marker_detection_cjk() {
        assert!(source_has_comparison_marker("像风一样"));
        assert!(source_has_comparison_marker("soft like rain"));
        assert!(!source_has_comparison_marker("风吹过"));
    }

    #[test]
    fn test_walk_verbs() {
        assert!(has_walk_verb("I walk alone"));
        assert!(has_walk_verb("wandering the streets"));
        assert!(has_walk_verb("je marche vers la mer"));
        assert!(has_walk_verb("yo camino al mar"));
        assert!(!has_walk_verb("I swim alone"));
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert_eq!(jaccard("", "a"), 0.0);
        let half = jaccard("a b c", "a b d");
        assert!(half > 0.49 && half < 0.51);
    }

    #[test]
    fn test_opening_content_tokens() {
        assert_eq!(
            opening_content_tokens("The river bends in the dark", EN, 2),
            vec!["river", "bends"]
        );
    }
}
