//! Recipes: per-variant artistic identities for a whole poem
//!
//! # Overview
//!
//! Each translation mode gets a bundle of three recipes, one per variant
//! label. A recipe fixes the variant's archetype, a short directive, an
//! unusualness budget, optionally a five-axis lens, and (for variant C) a
//! stance plan holding the subject form the variant must keep for the whole
//! poem.
//!
//! Bundles are keyed by a context hash over everything that shapes them; a
//! hash mismatch means the inputs changed and the bundle must be regenerated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

pub mod cache;

pub use cache::RecipeCacheService;

/// Recipe schema version folded into the context hash
pub const RECIPE_SCHEMA_VERSION: u32 = 3;

/// Directive length cap in characters
pub const MAX_DIRECTIVE_CHARS: usize = 200;

/// Translation mode selected by the guide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Focused,
    Balanced,
    Adventurous,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Focused => "focused",
            Mode::Balanced => "balanced",
            Mode::Adventurous => "adventurous",
        }
    }

    /// Parse a guide-supplied mode string, defaulting to balanced
    pub fn from_guide(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "focused" => Mode::Focused,
            "adventurous" => Mode::Adventurous,
            _ => Mode::Balanced,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Variant label A/B/C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantLabel {
    A,
    B,
    C,
}

impl VariantLabel {
    pub const ALL: [VariantLabel; 3] = [VariantLabel::A, VariantLabel::B, VariantLabel::C];

    /// The fixed archetype for this label
    pub fn archetype(&self) -> Archetype {
        match self {
            VariantLabel::A => Archetype::EssenceCut,
            VariantLabel::B => Archetype::PrismaticReimagining,
            VariantLabel::C => Archetype::WorldVoiceTransposition,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            VariantLabel::A => 0,
            VariantLabel::B => 1,
            VariantLabel::C => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(VariantLabel::A),
            1 => Some(VariantLabel::B),
            2 => Some(VariantLabel::C),
            _ => None,
        }
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantLabel::A => write!(f, "A"),
            VariantLabel::B => write!(f, "B"),
            VariantLabel::C => write!(f, "C"),
        }
    }
}

/// The three artistic identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    /// Strip to the image's essence; conservative fidelity
    EssenceCut,
    /// Reimagine the central image through a shifted lens
    PrismaticReimagining,
    /// Transpose the poem's world and speaking voice
    WorldVoiceTransposition,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::EssenceCut => "essence_cut",
            Archetype::PrismaticReimagining => "prismatic_reimagining",
            Archetype::WorldVoiceTransposition => "world_voice_transposition",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How far one lens axis may move from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensSetting {
    Preserve,
    Shift,
    Transform,
}

/// The five-axis lens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lens {
    pub imagery: LensSetting,
    pub diction: LensSetting,
    pub syntax: LensSetting,
    pub sound: LensSetting,
    pub stance: LensSetting,
}

impl Lens {
    /// Clamp every axis to a ceiling
    pub fn clamped_to(&self, ceiling: LensSetting) -> Lens {
        Lens {
            imagery: self.imagery.min(ceiling),
            diction: self.diction.min(ceiling),
            syntax: self.syntax.min(ceiling),
            sound: self.sound.min(ceiling),
            stance: self.stance.min(ceiling),
        }
    }
}

/// How far an archetype may push its lens in a given mode
///
/// The flat 3x3 constraint table: rows are archetypes, columns are modes in
/// focused/balanced/adventurous order.
pub fn lens_ceiling(archetype: Archetype, mode: Mode) -> LensSetting {
    const TABLE: [[LensSetting; 3]; 3] = [
        // essence_cut
        [LensSetting::Preserve, LensSetting::Preserve, LensSetting::Shift],
        // prismatic_reimagining
        [LensSetting::Preserve, LensSetting::Shift, LensSetting::Transform],
        // world_voice_transposition
        [LensSetting::Shift, LensSetting::Transform, LensSetting::Transform],
    ];
    let row = match archetype {
        Archetype::EssenceCut => 0,
        Archetype::PrismaticReimagining => 1,
        Archetype::WorldVoiceTransposition => 2,
    };
    let col = match mode {
        Mode::Focused => 0,
        Mode::Balanced => 1,
        Mode::Adventurous => 2,
    };
    TABLE[row][col]
}

/// How much strangeness a variant is allowed to spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnusualnessBudget {
    Low,
    Medium,
    High,
}

impl UnusualnessBudget {
    /// Default budget per label and mode
    pub fn default_for(label: VariantLabel, mode: Mode) -> Self {
        match (label, mode) {
            (VariantLabel::A, _) => UnusualnessBudget::Low,
            (VariantLabel::B, Mode::Focused) => UnusualnessBudget::Low,
            (VariantLabel::B, _) => UnusualnessBudget::Medium,
            (VariantLabel::C, Mode::Focused) => UnusualnessBudget::Medium,
            (VariantLabel::C, _) => UnusualnessBudget::High,
        }
    }
}

/// Subject form variant C must keep for the whole poem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectForm {
    We,
    You,
    ThirdPerson,
    Impersonal,
    I,
}

impl SubjectForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectForm::We => "we",
            SubjectForm::You => "you",
            SubjectForm::ThirdPerson => "third_person",
            SubjectForm::Impersonal => "impersonal",
            SubjectForm::I => "i",
        }
    }

    /// "i" is forbidden outside focused mode
    pub fn allowed_in(&self, mode: Mode) -> bool {
        !(matches!(self, SubjectForm::I) && mode != Mode::Focused)
    }
}

impl fmt::Display for SubjectForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Poem-stable metadata for variant C
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StancePlan {
    pub subject_form: SubjectForm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_frame: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_shift: Option<String>,
}

/// One variant's recipe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Recipe {
    pub label: VariantLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archetype: Option<Archetype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens: Option<Lens>,
    pub directive: String,
    pub unusualness_budget: UnusualnessBudget,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance_plan: Option<StancePlan>,
}

/// A mode's bundle of three recipes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeBundle {
    pub thread_id: String,
    pub mode: Mode,
    pub context_hash: String,
    pub recipes: Vec<Recipe>,
    pub created_at: DateTime<Utc>,
    pub model_used: String,
}

impl RecipeBundle {
    /// The recipe for a label; bundles always carry all three
    pub fn recipe(&self, label: VariantLabel) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.label == label)
    }
}

/// Everything the context hash covers
#[derive(Debug, Clone)]
pub struct RecipeContext {
    pub thread_id: String,
    pub mode: Mode,
    pub translation_intent: String,
    pub translation_zone: String,
    pub source_lang: String,
    pub target_lang: String,
    pub poem: String,
}

/// Stable hash over the recipe-shaping inputs
///
/// Same inputs, same hash; the hash is what validates a cache hit.
pub fn context_hash(ctx: &RecipeContext) -> String {
    let poem_hash = blake3::hash(ctx.poem.as_bytes());
    let mut hasher = blake3::Hasher::new();
    hasher.update(RECIPE_SCHEMA_VERSION.to_le_bytes().as_slice());
    for part in [
        ctx.translation_intent.as_str(),
        ctx.translation_zone.as_str(),
        ctx.source_lang.as_str(),
        ctx.target_lang.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(poem_hash.as_bytes());
    let digest = hasher.finalize();
    digest.to_hex().as_str()[..16].to_string()
}

/// Deterministic stance plan for variant C
///
/// Derived from the context hash so every holder of the same inputs injects
/// the same plan. "i" is never chosen outside focused mode.
pub fn deterministic_stance_plan(ctx: &RecipeContext, hash: &str) -> StancePlan {
    let allowed: &[SubjectForm] = match ctx.mode {
        Mode::Focused => &[
            SubjectForm::I,
            SubjectForm::We,
            SubjectForm::ThirdPerson,
            SubjectForm::Impersonal,
        ],
        _ => &[
            SubjectForm::We,
            SubjectForm::You,
            SubjectForm::ThirdPerson,
            SubjectForm::Impersonal,
        ],
    };
    let seed = hash
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    StancePlan {
        subject_form: allowed[seed % allowed.len()],
        world_frame: None,
        register_shift: None,
    }
}

/// The fixed directive bundle used when simplified prompts are enabled
pub fn static_bundle(ctx: &RecipeContext, hash: &str) -> RecipeBundle {
    let directives = [
        "Translate the line's essential image plainly and faithfully, trimming ornament.",
        "Re-see the central image through one deliberate shift of light, texture, or scale.",
        "Carry the line into a shifted world and voice while keeping its emotional core.",
    ];

    let recipes = VariantLabel::ALL
        .iter()
        .zip(directives)
        .map(|(label, directive)| {
            let stance_plan = if *label == VariantLabel::C {
                Some(deterministic_stance_plan(ctx, hash))
            } else {
                None
            };
            Recipe {
                label: *label,
                archetype: Some(label.archetype()),
                lens: None,
                directive: directive.to_string(),
                unusualness_budget: UnusualnessBudget::default_for(*label, ctx.mode),
                mode: ctx.mode,
                stance_plan,
            }
        })
        .collect();

    RecipeBundle {
        thread_id: ctx.thread_id.clone(),
        mode: ctx.mode,
        context_hash: hash.to_string(),
        recipes,
        created_at: Utc::now(),
        model_used: "static".to_string(),
    }
}

/// Raw LLM recipe payload before validation
#[derive(Debug, Deserialize)]
pub(crate) struct RawRecipePayload {
    pub recipes: Vec<RawRecipe>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRecipe {
    pub label: VariantLabel,
    #[serde(default)]
    pub archetype: Option<Archetype>,
    #[serde(default)]
    pub lens: Option<Lens>,
    pub directive: String,
    #[serde(default)]
    pub unusualness_budget: Option<UnusualnessBudget>,
    #[serde(default)]
    pub stance_plan: Option<StancePlan>,
}

/// Validate a raw payload into a bundle
///
/// Enforces: exactly one recipe per label, the fixed label-archetype mapping,
/// the directive length cap, the lens constraint table, and a legal stance
/// plan for C (injecting the deterministic plan when missing or forbidden).
pub fn validate_bundle(
    ctx: &RecipeContext,
    hash: &str,
    model_used: &str,
    payload: RawRecipePayload,
) -> Result<RecipeBundle> {
    let mut recipes = Vec::with_capacity(3);

    for label in VariantLabel::ALL {
        let raw = payload
            .recipes
            .iter()
            .find(|r| r.label == label)
            .ok_or_else(|| EngineError::Schema(format!("recipe bundle missing label {label}")))?;

        if payload.recipes.iter().filter(|r| r.label == label).count() > 1 {
            return Err(EngineError::Schema(format!(
                "recipe bundle has duplicate label {label}"
            )));
        }

        let directive: String = raw.directive.trim().chars().take(MAX_DIRECTIVE_CHARS).collect();
        if directive.is_empty() {
            return Err(EngineError::Schema(format!(
                "recipe {label} has an empty directive"
            )));
        }

        let archetype = label.archetype();
        let lens = raw
            .lens
            .map(|lens| lens.clamped_to(lens_ceiling(archetype, ctx.mode)));

        let stance_plan = if label == VariantLabel::C {
            let plan = raw
                .stance_plan
                .clone()
                .filter(|p| p.subject_form.allowed_in(ctx.mode))
                .unwrap_or_else(|| deterministic_stance_plan(ctx, hash));
            Some(plan)
        } else {
            None
        };

        recipes.push(Recipe {
            label,
            archetype: Some(archetype),
            lens,
            directive,
            unusualness_budget: raw
                .unusualness_budget
                .unwrap_or_else(|| UnusualnessBudget::default_for(label, ctx.mode)),
            mode: ctx.mode,
            stance_plan,
        });
    }

    Ok(RecipeBundle {
        thread_id: ctx.thread_id.clone(),
        mode: ctx.mode,
        context_hash: hash.to_string(),
        recipes,
        created_at: Utc::now(),
        model_used: model_used.to_string(),
    })
}
