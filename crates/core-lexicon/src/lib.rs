//! Core-Lexicon: Pure-logic language support for Verso
//!
//! # Overview
//!
//! This crate provides the lexical primitives the translation engine leans on
//! everywhere: language-family stopword sets, punctuation-tolerant
//! normalization, substring containment over normalized forms, and
//! tokenization.
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The scheduler, queues, or persistence layers
//! - LLM providers or prompts
//! - Application-specific concerns
//!
//! Everything here is deterministic and synchronous, so the gate and anchor
//! checks built on top of it are trivially testable.
//!
//! # Example
//!
//! ```
//! use verso_core_lexicon::{LanguageFamily, normalize_for_containment, tokenize};
//!
//! let family = LanguageFamily::resolve("fr-CA");
//! assert_eq!(family, LanguageFamily::French);
//! assert!(family.is_stopword("dans"));
//!
//! assert_eq!(normalize_for_containment("The  RIVER—bends"), "the river bends");
//! assert_eq!(tokenize("Don't stop, now!"), vec!["don't", "stop", "now"]);
//! ```

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fmt;

mod stopwords;

use stopwords::{DE, EN, ES, FR, IT, PT};

/// Language family used for stopword lookup and opener heuristics
///
/// Resolution is intentionally forgiving: full language names, two-letter ISO
/// codes, and BCP-47 tags all map to a family. Anything unrecognized falls
/// back to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    English,
    French,
    Spanish,
    German,
    Portuguese,
    Italian,
}

impl LanguageFamily {
    /// Resolve a language hint to a family
    ///
    /// Accepts language names ("french"), ISO 639-1 codes ("fr"), and BCP-47
    /// tags ("fr-CA", "pt_BR"). English is the fallback for anything else.
    pub fn resolve(hint: &str) -> Self {
        let lowered = hint.trim().to_lowercase();
        let primary = lowered
            .split(|c| c == '-' || c == '_')
            .next()
            .unwrap_or_default();

        match primary {
            "en" | "english" => LanguageFamily::English,
            "fr" | "french" | "francais" | "français" => LanguageFamily::French,
            "es" | "spanish" | "espanol" | "español" | "castellano" => LanguageFamily::Spanish,
            "de" | "german" | "deutsch" => LanguageFamily::German,
            "pt" | "portuguese" | "portugues" | "português" => LanguageFamily::Portuguese,
            "it" | "italian" | "italiano" => LanguageFamily::Italian,
            _ => LanguageFamily::English,
        }
    }

    /// ISO 639-1 code for this family
    pub fn code(&self) -> &'static str {
        match self {
            LanguageFamily::English => "en",
            LanguageFamily::French => "fr",
            LanguageFamily::Spanish => "es",
            LanguageFamily::German => "de",
            LanguageFamily::Portuguese => "pt",
            LanguageFamily::Italian => "it",
        }
    }

    /// The stopword set for this family
    pub fn stopwords(&self) -> &'static HashSet<&'static str> {
        static EN_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| EN.iter().copied().collect());
        static FR_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| FR.iter().copied().collect());
        static ES_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| ES.iter().copied().collect());
        static DE_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| DE.iter().copied().collect());
        static PT_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| PT.iter().copied().collect());
        static IT_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| IT.iter().copied().collect());

        match self {
            LanguageFamily::English => &EN_SET,
            LanguageFamily::French => &FR_SET,
            LanguageFamily::Spanish => &ES_SET,
            LanguageFamily::German => &DE_SET,
            LanguageFamily::Portuguese => &PT_SET,
            LanguageFamily::Italian => &IT_SET,
        }
    }

    /// Check whether a (already lowercased/normalized) token is a stopword
    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords().contains(token)
    }
}

impl fmt::Display for LanguageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Normalize text for containment checks
///
/// The transform is: curly quotes to straight quotes, unicode dashes to a
/// plain hyphen, every non-alphanumeric character except the apostrophe to a
/// space, lowercase, and whitespace collapsed to single spaces. The result is
/// stable under re-application.
pub fn normalize_for_containment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;

    for raw in text.chars() {
        let c = match raw {
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{02BC}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201F}' => '"',
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            other => other,
        };

        if c.is_alphanumeric() || c == '\'' {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Substring containment over normalized forms
///
/// Both sides are normalized before the check, so punctuation and quote-style
/// differences between an anchor realization and the variant text do not
/// break containment.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    let needle = normalize_for_containment(needle);
    if needle.is_empty() {
        return false;
    }
    normalize_for_containment(haystack).contains(&needle)
}

/// Tokenize text: normalize, then split on whitespace
///
/// Empty tokens are dropped; a blank input yields an empty vector.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_for_containment(text)
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Check whether every token of `text` is a stopword in the given family
///
/// Returns false for empty input so a blank realization never passes as
/// "content".
pub fn is_stopword_only(text: &str, family: LanguageFamily) -> bool {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return false;
    }
    tokens.iter().all(|t| family.is_stopword(t.as_str()))
}

/// Content tokens: tokens that survive stopword removal
pub fn content_tokens(text: &str, family: LanguageFamily) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !family.is_stopword(t.as_str()))
        .collect()
}
