//! Error types for the translation engine
//!
//! Two layers: `EngineError` is the crate-wide error enum, and
//! `LineErrorKind` is the stable per-line classification persisted into the
//! job document and used for retry decisions. Classification lives here, in
//! one place, and is shared by the chunk processor and the scheduler.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Crate-wide error enum
#[derive(Debug, Error)]
pub enum EngineError {
    /// Recipe generation lock could not be acquired within budget
    #[error("recipe generation lock contention for {resource}")]
    RecipeGenerationContention { resource: String },

    /// Optimistic concurrency conflict persisted past the retry bound
    #[error("thread-state write conflict after {attempts} attempts")]
    StateConflict { attempts: u32 },

    /// Thread state document does not exist
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// Upstream LLM provider failure, pre-classified
    #[error("provider error ({kind}): {message}")]
    Provider { kind: LineErrorKind, message: String },

    /// LLM output failed shape or content validation
    #[error("schema validation failed: {0}")]
    Schema(String),

    /// KV or thread-state backend failure
    #[error("store error: {0}")]
    Store(String),

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable error code surfaced to callers and stored in job documents
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::RecipeGenerationContention { .. } => "RECIPE_GENERATION_CONTENTION",
            EngineError::StateConflict { .. } => "STATE_CONFLICT",
            EngineError::ThreadNotFound(_) => "THREAD_NOT_FOUND",
            EngineError::Provider { kind, .. } => kind.code(),
            EngineError::Schema(_) => LineErrorKind::ValidationError.code(),
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Serialization(_) => LineErrorKind::ValidationError.code(),
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the failed operation is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RecipeGenerationContention { .. } => true,
            EngineError::StateConflict { .. } => true,
            EngineError::Provider { kind, .. } => kind.is_retryable(),
            EngineError::Store(_) => true,
            EngineError::ThreadNotFound(_)
            | EngineError::Schema(_)
            | EngineError::Serialization(_)
            | EngineError::Config(_) => false,
        }
    }

    /// Per-line classification of this error
    pub fn line_kind(&self) -> LineErrorKind {
        match self {
            EngineError::Provider { kind, .. } => *kind,
            EngineError::Schema(_) | EngineError::Serialization(_) => {
                LineErrorKind::ValidationError
            }
            EngineError::Store(msg) => classify_message(msg),
            _ => LineErrorKind::Unknown,
        }
    }
}

/// Stable per-line error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineErrorKind {
    Timeout,
    RateLimit,
    ServerError,
    ModelNotFound,
    ValidationError,
    AuthError,
    Unknown,
}

impl LineErrorKind {
    /// Stable string code, as stored in chunk/line records
    pub fn code(&self) -> &'static str {
        match self {
            LineErrorKind::Timeout => "timeout",
            LineErrorKind::RateLimit => "rate_limit",
            LineErrorKind::ServerError => "server_error",
            LineErrorKind::ModelNotFound => "model_not_found",
            LineErrorKind::ValidationError => "validation_error",
            LineErrorKind::AuthError => "auth_error",
            LineErrorKind::Unknown => "unknown",
        }
    }

    /// Timeout, rate-limit, and server errors are retryable; the rest are not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LineErrorKind::Timeout | LineErrorKind::RateLimit | LineErrorKind::ServerError
        )
    }
}

impl std::fmt::Display for LineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Classify a raw provider/backend error message into a `LineErrorKind`
///
/// The single classification implementation: both the chunk processor and the
/// scheduler route through here.
pub fn classify_message(message: &str) -> LineErrorKind {
    let lowered = message.to_lowercase();

    if lowered.contains("timeout") || lowered.contains("timed out") {
        LineErrorKind::Timeout
    } else if lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("429")
        || lowered.contains("too many requests")
    {
        LineErrorKind::RateLimit
    } else if lowered.contains("model not found")
        || lowered.contains("model_not_found")
        || lowered.contains("unknown model")
        || lowered.contains("no such model")
    {
        LineErrorKind::ModelNotFound
    } else if lowered.contains("500")
        || lowered.contains("502")
        || lowered.contains("503")
        || lowered.contains("server error")
        || lowered.contains("internal error")
        || lowered.contains("overloaded")
        || lowered.contains("unavailable")
    {
        LineErrorKind::ServerError
    } else if lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("forbidden")
        || lowered.contains("api key")
        || lowered.contains("authentication")
    {
        LineErrorKind::AuthError
    } else if lowered.contains("validation") || lowered.contains("schema") {
        LineErrorKind::ValidationError
    } else {
        LineErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_retryable_kinds() {
        assert_eq!(classify_message("request timed out"), LineErrorKind::Timeout);
        assert_eq!(
            classify_message("429 Too Many Requests"),
            LineErrorKind::RateLimit
        );
        assert_eq!(
            classify_message("upstream 503 service unavailable"),
            LineErrorKind::ServerError
        );
        assert!(LineErrorKind::Timeout.is_retryable());
        assert!(LineErrorKind::RateLimit.is_retryable());
        assert!(LineErrorKind::ServerError.is_retryable());
    }

    #[test]
    fn test_classify_fatal_kinds() {
        assert_eq!(
            classify_message("model not found: m-42"),
            LineErrorKind::ModelNotFound
        );
        assert_eq!(
            classify_message("401 unauthorized: bad api key"),
            LineErrorKind::AuthError
        );
        assert_eq!(
            classify_message("schema mismatch on variant B"),
            LineErrorKind::ValidationError
        );
        assert_eq!(classify_message("something odd"), LineErrorKind::Unknown);
        assert!(!LineErrorKind::ModelNotFound.is_retryable());
        assert!(!LineErrorKind::AuthError.is_retryable());
        assert!(!LineErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_engine_error_codes() {
        let err = EngineError::RecipeGenerationContention {
            resource: "recipe-gen:t1:balanced:abc".to_string(),
        };
        assert_eq!(err.code(), "RECIPE_GENERATION_CONTENTION");
        assert!(err.is_retryable());

        let err = EngineError::Provider {
            kind: LineErrorKind::RateLimit,
            message: "429".to_string(),
        };
        assert_eq!(err.code(), "rate_limit");
        assert!(err.is_retryable());

        let err = EngineError::Schema("missing variant C".to_string());
        assert_eq!(err.code(), "validation_error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_line_kind_projection() {
        let err = EngineError::Provider {
            kind: LineErrorKind::Timeout,
            message: "timed out".to_string(),
        };
        assert_eq!(err.line_kind(), LineErrorKind::Timeout);

        let err = EngineError::Store("connection timed out".to_string());
        assert_eq!(err.line_kind(), LineErrorKind::Timeout);
    }
}
