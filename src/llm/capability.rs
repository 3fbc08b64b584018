//! Per-model capability table
//!
//! Model families differ in which knobs they accept: some reject sampling
//! parameters outright, some name their output-token cap differently, some
//! cannot return multiple samples per call. The wrapper consults this flat
//! prefix-keyed table instead of probing at runtime.

/// Field name a provider expects for the output-token cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitParam {
    MaxTokens,
    MaxOutputTokens,
    MaxCompletionTokens,
}

impl TokenLimitParam {
    /// Wire name of the parameter
    pub fn field_name(&self) -> &'static str {
        match self {
            TokenLimitParam::MaxTokens => "max_tokens",
            TokenLimitParam::MaxOutputTokens => "max_output_tokens",
            TokenLimitParam::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Capabilities of one model-name prefix
#[derive(Debug, Clone, Copy)]
pub struct ModelCapability {
    pub prefix: &'static str,
    /// Accepts temperature/top_p/penalties/seed
    pub accepts_sampling_params: bool,
    pub supports_stop_sequences: bool,
    /// Accepts `n` for multiple samples in one call
    pub supports_multi_sample: bool,
    pub token_limit_param: TokenLimitParam,
}

/// Default entry for unknown models: fully permissive, `max_tokens`
const DEFAULT_CAPABILITY: ModelCapability = ModelCapability {
    prefix: "",
    accepts_sampling_params: true,
    supports_stop_sequences: true,
    supports_multi_sample: true,
    token_limit_param: TokenLimitParam::MaxTokens,
};

/// The table, longest-prefix-first within each family
const CAPABILITIES: &[ModelCapability] = &[
    // Restricted families: sampling knobs rejected, no multi-sample
    ModelCapability {
        prefix: "gpt-5",
        accepts_sampling_params: false,
        supports_stop_sequences: false,
        supports_multi_sample: false,
        token_limit_param: TokenLimitParam::MaxCompletionTokens,
    },
    ModelCapability {
        prefix: "o1",
        accepts_sampling_params: false,
        supports_stop_sequences: false,
        supports_multi_sample: false,
        token_limit_param: TokenLimitParam::MaxCompletionTokens,
    },
    ModelCapability {
        prefix: "o3",
        accepts_sampling_params: false,
        supports_stop_sequences: false,
        supports_multi_sample: false,
        token_limit_param: TokenLimitParam::MaxCompletionTokens,
    },
    ModelCapability {
        prefix: "o4",
        accepts_sampling_params: false,
        supports_stop_sequences: false,
        supports_multi_sample: false,
        token_limit_param: TokenLimitParam::MaxCompletionTokens,
    },
    // Legacy generative families
    ModelCapability {
        prefix: "gpt-4",
        accepts_sampling_params: true,
        supports_stop_sequences: true,
        supports_multi_sample: true,
        token_limit_param: TokenLimitParam::MaxTokens,
    },
    ModelCapability {
        prefix: "gpt-3.5",
        accepts_sampling_params: true,
        supports_stop_sequences: true,
        supports_multi_sample: true,
        token_limit_param: TokenLimitParam::MaxTokens,
    },
    ModelCapability {
        prefix: "claude",
        accepts_sampling_params: true,
        supports_stop_sequences: true,
        supports_multi_sample: false,
        token_limit_param: TokenLimitParam::MaxOutputTokens,
    },
];

/// Look up the capability entry for a model name
///
/// Longest matching prefix wins; unknown models get the permissive default.
pub fn capability_for(model: &str) -> &'static ModelCapability {
    CAPABILITIES
        .iter()
        .filter(|c| model.starts_with(c.prefix))
        .max_by_key(|c| c.prefix.len())
        .unwrap_or(&DEFAULT_CAPABILITY)
}

/// Whether the model family rejects sampling parameters
pub fn is_restricted(model: &str) -> bool {
    !capability_for(model).accepts_sampling_params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_families() {
        assert!(is_restricted("gpt-5-turbo"));
        assert!(is_restricted("o1-preview"));
        assert!(is_restricted("o3-mini"));
        assert!(!is_restricted("gpt-4o"));
        assert!(!is_restricted("claude-sonnet"));
        assert!(!is_restricted("totally-unknown"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        // "gpt-5" must not fall through to a shorter "gpt-" style entry
        let caps = capability_for("gpt-5-mini");
        assert_eq!(caps.prefix, "gpt-5");
        assert!(!caps.supports_multi_sample);

        let caps = capability_for("gpt-4o-mini");
        assert_eq!(caps.prefix, "gpt-4");
        assert!(caps.supports_multi_sample);
    }

    #[test]
    fn test_token_limit_field_names() {
        assert_eq!(
            capability_for("gpt-5").token_limit_param.field_name(),
            "max_completion_tokens"
        );
        assert_eq!(
            capability_for("gpt-4").token_limit_param.field_name(),
            "max_tokens"
        );
        assert_eq!(
            capability_for("claude-opus").token_limit_param.field_name(),
            "max_output_tokens"
        );
        assert_eq!(
            capability_for("mystery").token_limit_param.field_name(),
            "max_tokens"
        );
    }
}
