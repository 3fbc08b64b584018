//! Thread-state store: one JSON document per thread, optimistic concurrency
//!
//! # Overview
//!
//! Each workshop thread owns a single state document holding the poem, the
//! guide answers, the recipe cache slots, and the translation job. Writers
//! load `(state, version)`, mutate, and write back with a compare-and-swap on
//! the version; conflicting writers retry up to a small bound.
//!
//! The translation job lives at a fixed field (`translation_job`) inside the
//! document, so every chunk/line mutation flows through the same CAS path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::job::Job;
use crate::recipe::RecipeBundle;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStateStore;

/// Write attempts before a conflict becomes an error
pub const PATCH_RETRY_BOUND: u32 = 3;

/// Stanza boundaries detected for the poem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoemStanzas {
    pub stanzas: Vec<Stanza>,
    pub total_stanzas: usize,
    /// "local", "ai", or "fallback"
    pub detection_method: String,
}

/// One stanza: a contiguous run of poem lines
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stanza {
    pub lines: Vec<String>,
}

/// Target language selection from the guide
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetLanguage {
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
}

/// Answers collected by the (out-of-scope) guide flow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideAnswers {
    #[serde(default)]
    pub translation_intent: String,
    #[serde(default)]
    pub translation_zone: String,
    /// "focused", "balanced", or "adventurous"
    #[serde(default)]
    pub translation_range_mode: String,
    #[serde(default)]
    pub target_language: TargetLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_method: Option<String>,
}

/// Source-poem analysis produced upstream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoemAnalysis {
    #[serde(default)]
    pub language: String,
}

/// Per-mode recipe cache slots (schema v3)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerModeRecipes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused: Option<RecipeBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balanced: Option<RecipeBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adventurous: Option<RecipeBundle>,
}

/// The thread-state document
///
/// Field names match the stored JSON exactly; unknown fields written by the
/// surrounding application are dropped on rewrite, so the engine only ever
/// patches through the typed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_poem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poem_stanzas: Option<PoemStanzas>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_answers: Option<GuideAnswers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poem_analysis: Option<PoemAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_recipes_v3: Option<PerModeRecipes>,
    /// Legacy single-slot cache, migrated to v3 on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_recipes_v2: Option<RecipeBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_job: Option<Job>,
}

/// A loaded document with its version
#[derive(Debug, Clone)]
pub struct VersionedState {
    pub state: ThreadState,
    pub version: u64,
}

/// Result of a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The write landed; this is the new version
    Applied(u64),
    /// Another writer got there first
    Conflict,
}

/// Store trait for thread-state documents
#[async_trait]
pub trait ThreadStateStore: Send + Sync {
    /// Load a document with its current version
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedState>>;

    /// Create a document at version 1; fails if the thread already exists
    async fn create(&self, thread_id: &str, state: ThreadState) -> Result<u64>;

    /// Compare-and-swap write of the whole document
    async fn patch(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: ThreadState,
    ) -> Result<PatchOutcome>;
}

/// Load-mutate-CAS loop with the standard retry bound
///
/// The updater runs against a fresh copy of the document on every attempt.
/// Returns the updater's value and the version that was written.
pub async fn patch_with_retry<S, F, T>(
    store: &S,
    thread_id: &str,
    mut updater: F,
) -> Result<(T, u64)>
where
    S: ThreadStateStore + ?Sized,
    F: FnMut(&mut ThreadState) -> Result<T>,
{
    for attempt in 0..PATCH_RETRY_BOUND {
        let versioned = store
            .load(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;

        let mut state = versioned.state;
        let value = updater(&mut state)?;

        match store.patch(thread_id, versioned.version, state).await? {
            PatchOutcome::Applied(new_version) => return Ok((value, new_version)),
            PatchOutcome::Conflict => {
                tracing::debug!(thread_id, attempt, "thread-state write conflict, retrying");
            }
        }
    }
    Err(EngineError::StateConflict {
        attempts: PATCH_RETRY_BOUND,
    })
}

/// Set a single field by dot-separated path, through the same CAS discipline
///
/// Convenience for callers that patch one leaf (e.g. a recipe slot) without
/// hand-writing an updater. The path is resolved over the JSON form of the
/// document; intermediate objects are created as needed.
pub async fn patch_field<S>(
    store: &S,
    thread_id: &str,
    path: &str,
    value: serde_json::Value,
) -> Result<u64>
where
    S: ThreadStateStore + ?Sized,
{
    let ((), version) = patch_with_retry(store, thread_id, |state| {
        let mut doc = serde_json::to_value(&*state)?;
        set_path(&mut doc, path, value.clone())?;
        *state = serde_json::from_value(doc)?;
        Ok(())
    })
    .await?;
    Ok(version)
}

fn set_path(doc: &mut serde_json::Value, path: &str, value: serde_json::Value) -> Result<()> {
    let mut cursor = doc;
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| EngineError::Config("empty patch path".to_string()))?;

    for segment in parents {
        let obj = cursor.as_object_mut().ok_or_else(|| {
            EngineError::Config(format!("patch path {path} crosses a non-object"))
        })?;
        cursor = obj
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }

    match cursor.as_object_mut() {
        Some(obj) => {
            obj.insert(last.to_string(), value);
            Ok(())
        }
        None => Err(EngineError::Config(format!(
            "patch path {path} ends in a non-object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_state() -> ThreadState {
        ThreadState {
            raw_poem: Some("A\nB".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_load_roundtrip() {
        let store = MemoryStateStore::new();
        let v = store.create("t1", seeded_state()).await.unwrap();
        assert_eq!(v, 1);

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.state.raw_poem.as_deref(), Some("A\nB"));
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_monotonic_and_conflict() {
        let store = MemoryStateStore::new();
        store.create("t1", seeded_state()).await.unwrap();

        let mut state = store.load("t1").await.unwrap().unwrap();
        state.state.raw_poem = Some("changed".to_string());
        assert_eq!(
            store.patch("t1", 1, state.state.clone()).await.unwrap(),
            PatchOutcome::Applied(2)
        );
        // Stale writer sees a conflict
        assert_eq!(
            store.patch("t1", 1, state.state).await.unwrap(),
            PatchOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_patch_with_retry_survives_interleaved_writer() {
        let store = MemoryStateStore::new();
        store.create("t1", seeded_state()).await.unwrap();

        // Interleave a competing write to bump the version
        let competing = store.load("t1").await.unwrap().unwrap();
        store
            .patch("t1", competing.version, competing.state)
            .await
            .unwrap();

        let ((), version) = patch_with_retry(&store, "t1", |state| {
            state.raw_poem = Some("patched".to_string());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(version, 3);

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.state.raw_poem.as_deref(), Some("patched"));
    }

    #[tokio::test]
    async fn test_patch_missing_thread() {
        let store = MemoryStateStore::new();
        let err = patch_with_retry(&store, "ghost", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, EngineError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn test_patch_field_sets_leaf() {
        let store = MemoryStateStore::new();
        store.create("t1", seeded_state()).await.unwrap();

        patch_field(
            &store,
            "t1",
            "poem_analysis.language",
            serde_json::json!("Chinese"),
        )
        .await
        .unwrap();

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.state.poem_analysis.unwrap().language, "Chinese");
    }
}
