//! Engine configuration from environment variables
//!
//! All knobs are environment-driven with clamped ranges, so a bad value
//! degrades to the nearest bound instead of failing startup.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-subsystem debug flags, all off by default
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DebugFlags {
    pub variants: bool,
    pub gate: bool,
    pub regen: bool,
    pub sampling: bool,
    pub stop_sequences: bool,
    pub lock: bool,
    pub invariants: bool,
    pub anchor_realizations: bool,
    pub subject_form: bool,
}

/// Engine configuration
///
/// The "stanza" naming in the environment variables is legacy for "chunk" and
/// is kept for compatibility with existing deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum chunks a single tick may pick up (1-5)
    pub max_chunks_per_tick: u32,

    /// Concurrent chunk workers within a tick (1-3)
    pub chunk_concurrency: u32,

    /// Allow chunk_concurrency > 1 to take effect
    pub enable_parallel_stanzas: bool,

    /// Regeneration sample count for restricted model families (1-6)
    pub gpt5_regen_k: u32,

    /// Regeneration sample count for everything else (1-6)
    pub default_regen_k: u32,

    /// Candidate fan-out bound for restricted model families (1-8)
    pub gpt5_regen_concurrency: u32,

    /// Candidate fan-out bound for everything else (1-8)
    pub default_regen_concurrency: u32,

    /// Output-token cap for regeneration calls (200-3000)
    pub regen_max_output_tokens: u32,

    /// Enforce the tick wall-clock deadline between lines
    pub enable_tick_time_slicing: bool,

    /// Fan out restricted-model regen candidates instead of serializing them
    pub enable_gpt5_regen_parallel: bool,

    /// Serve static recipe bundles instead of LLM-generated ones
    pub use_simplified_prompts: bool,

    /// Tick processing budget in milliseconds
    pub max_processing_time_ms: u64,

    /// Per-job tick lock TTL in seconds
    pub tick_lock_ttl_secs: u64,

    /// Recipe generation lock TTL in seconds
    pub recipe_lock_ttl_secs: u64,

    /// Debug flags
    pub debug: DebugFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_tick: 1,
            chunk_concurrency: 1,
            enable_parallel_stanzas: false,
            gpt5_regen_k: 3,
            default_regen_k: 6,
            gpt5_regen_concurrency: 6,
            default_regen_concurrency: 3,
            regen_max_output_tokens: 1500,
            enable_tick_time_slicing: true,
            enable_gpt5_regen_parallel: false,
            use_simplified_prompts: false,
            max_processing_time_ms: 2500,
            tick_lock_ttl_secs: 600,
            recipe_lock_ttl_secs: 90,
            debug: DebugFlags::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a caller-supplied lookup
    ///
    /// Exists so tests can exercise parsing and clamping without touching
    /// process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_chunks_per_tick: clamped_u32(
                &lookup,
                "MAX_STANZAS_PER_TICK",
                1,
                5,
                defaults.max_chunks_per_tick,
            ),
            chunk_concurrency: clamped_u32(
                &lookup,
                "CHUNK_CONCURRENCY",
                1,
                3,
                defaults.chunk_concurrency,
            ),
            enable_parallel_stanzas: flag(&lookup, "ENABLE_PARALLEL_STANZAS", false),
            gpt5_regen_k: clamped_u32(&lookup, "GPT5_REGEN_K", 1, 6, defaults.gpt5_regen_k),
            default_regen_k: clamped_u32(&lookup, "DEFAULT_REGEN_K", 1, 6, defaults.default_regen_k),
            gpt5_regen_concurrency: clamped_u32(
                &lookup,
                "GPT5_REGEN_CONCURRENCY",
                1,
                8,
                defaults.gpt5_regen_concurrency,
            ),
            default_regen_concurrency: clamped_u32(
                &lookup,
                "DEFAULT_REGEN_CONCURRENCY",
                1,
                8,
                defaults.default_regen_concurrency,
            ),
            regen_max_output_tokens: clamped_u32(
                &lookup,
                "REGEN_MAX_OUTPUT_TOKENS",
                200,
                3000,
                defaults.regen_max_output_tokens,
            ),
            enable_tick_time_slicing: flag(&lookup, "ENABLE_TICK_TIME_SLICING", true),
            enable_gpt5_regen_parallel: flag(&lookup, "ENABLE_GPT5_REGEN_PARALLEL", false),
            use_simplified_prompts: flag(&lookup, "USE_SIMPLIFIED_PROMPTS", false),
            max_processing_time_ms: defaults.max_processing_time_ms,
            tick_lock_ttl_secs: defaults.tick_lock_ttl_secs,
            recipe_lock_ttl_secs: defaults.recipe_lock_ttl_secs,
            debug: DebugFlags {
                variants: flag(&lookup, "DEBUG_VARIANTS", false),
                gate: flag(&lookup, "DEBUG_GATE", false),
                regen: flag(&lookup, "DEBUG_REGEN", false),
                sampling: flag(&lookup, "DEBUG_SAMPLING", false),
                stop_sequences: flag(&lookup, "DEBUG_STOP_SEQUENCES", false),
                lock: flag(&lookup, "DEBUG_LOCK", false),
                invariants: flag(&lookup, "DEBUG_INVARIANTS", false),
                anchor_realizations: flag(&lookup, "DEBUG_ANCHOR_REALIZATIONS", false),
                subject_form: flag(&lookup, "DEBUG_SUBJECT_FORM", false),
            },
        }
    }

    /// Effective chunk concurrency: parallel stanzas must be enabled for the
    /// knob to raise fan-out above one
    pub fn effective_chunk_concurrency(&self) -> u32 {
        if self.enable_parallel_stanzas {
            self.chunk_concurrency
        } else {
            1
        }
    }

    /// Regen K for a given restricted/default model family split
    pub fn regen_k(&self, restricted_model: bool) -> u32 {
        if restricted_model {
            self.gpt5_regen_k
        } else {
            self.default_regen_k
        }
    }

    /// Regen candidate concurrency, clamped to K
    pub fn regen_concurrency(&self, restricted_model: bool) -> u32 {
        let cap = if restricted_model {
            self.gpt5_regen_concurrency
        } else {
            self.default_regen_concurrency
        };
        cap.min(self.regen_k(restricted_model))
    }
}

fn clamped_u32(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u32,
    max: u32,
    default: u32,
) -> u32 {
    match lookup(name) {
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(v) if v < min => {
                warn!(name, value = v, min, "config value below range, clamping");
                min
            }
            Ok(v) if v > max => {
                warn!(name, value = v, max, "config value above range, clamping");
                max
            }
            Ok(v) => v,
            Err(_) => {
                warn!(name, raw, "unparseable config value, using default");
                default
            }
        },
        None => default,
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name) {
        Some(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.max_chunks_per_tick, 1);
        assert_eq!(config.chunk_concurrency, 1);
        assert_eq!(config.gpt5_regen_k, 3);
        assert_eq!(config.default_regen_k, 6);
        assert_eq!(config.regen_max_output_tokens, 1500);
        assert!(config.enable_tick_time_slicing);
        assert!(!config.use_simplified_prompts);
        assert!(!config.debug.gate);
    }

    #[test]
    fn test_clamping() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("MAX_STANZAS_PER_TICK", "99"),
            ("CHUNK_CONCURRENCY", "0"),
            ("REGEN_MAX_OUTPUT_TOKENS", "50"),
        ]));
        assert_eq!(config.max_chunks_per_tick, 5);
        assert_eq!(config.chunk_concurrency, 1);
        assert_eq!(config.regen_max_output_tokens, 200);
    }

    #[test]
    fn test_unparseable_uses_default() {
        let config = EngineConfig::from_lookup(lookup_from(&[("DEFAULT_REGEN_K", "six")]));
        assert_eq!(config.default_regen_k, 6);
    }

    #[test]
    fn test_flags() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ENABLE_TICK_TIME_SLICING", "0"),
            ("USE_SIMPLIFIED_PROMPTS", "1"),
            ("DEBUG_GATE", "true"),
        ]));
        assert!(!config.enable_tick_time_slicing);
        assert!(config.use_simplified_prompts);
        assert!(config.debug.gate);
    }

    #[test]
    fn test_effective_chunk_concurrency_requires_parallel_stanzas() {
        let config = EngineConfig::from_lookup(lookup_from(&[("CHUNK_CONCURRENCY", "3")]));
        assert_eq!(config.effective_chunk_concurrency(), 1);

        let config = EngineConfig::from_lookup(lookup_from(&[
            ("CHUNK_CONCURRENCY", "3"),
            ("ENABLE_PARALLEL_STANZAS", "1"),
        ]));
        assert_eq!(config.effective_chunk_concurrency(), 3);
    }

    #[test]
    fn test_regen_knobs() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("GPT5_REGEN_K", "2"),
            ("GPT5_REGEN_CONCURRENCY", "8"),
        ]));
        assert_eq!(config.regen_k(true), 2);
        // Concurrency is clamped to K
        assert_eq!(config.regen_concurrency(true), 2);
        assert_eq!(config.regen_k(false), 6);
        assert_eq!(config.regen_concurrency(false), 3);
    }
}
