//! Recipe cache: memory layer, per-mode slots, lock-mediated generation
//!
//! # Overview
//!
//! Three layers, checked in order:
//!
//! 1. A process-local TTL cache keyed by `(thread, mode, hash)`.
//! 2. The per-mode slot in the thread-state document (schema v3), with a
//!    read-path migration from the legacy single-slot v2 field.
//! 3. Generation: static bundles when simplified prompts are enabled (no
//!    lock), otherwise one LLM call serialized by the
//!    `recipe-gen:{thread}:{mode}:{hash}` lock so concurrent ticks never
//!    generate twice.
//!
//! After acquiring the generation lock the store is re-checked: the previous
//! holder may have finished while we waited.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, warn};

use super::{
    context_hash, static_bundle, validate_bundle, Mode, RawRecipePayload, RecipeBundle,
    RecipeContext,
};
use crate::error::{EngineError, Result};
use crate::kv::{KvStore, LockGuard};
use crate::llm::{LlmCaller, LlmRequest, ResponseFormat};
use crate::state::{patch_with_retry, PerModeRecipes, ThreadStateStore};

/// Memory-layer TTL
const MEMORY_TTL: Duration = Duration::from_secs(600);

/// Memory-layer capacity (bundles)
const MEMORY_CAPACITY: u64 = 256;

/// Lock acquisition profile
#[derive(Debug, Clone, Copy)]
pub struct LockProfile {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_wait: Duration,
}

impl Default for LockProfile {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(250),
            max_wait: Duration::from_secs(15),
        }
    }
}

/// The recipe cache service
pub struct RecipeCacheService {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn ThreadStateStore>,
    caller: LlmCaller,
    use_simplified_prompts: bool,
    lock_ttl: Duration,
    lock_profile: LockProfile,
    memory: Cache<String, RecipeBundle>,
}

impl RecipeCacheService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn ThreadStateStore>,
        caller: LlmCaller,
        use_simplified_prompts: bool,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            kv,
            store,
            caller,
            use_simplified_prompts,
            lock_ttl,
            lock_profile: LockProfile::default(),
            memory: Cache::builder()
                .max_capacity(MEMORY_CAPACITY)
                .time_to_live(MEMORY_TTL)
                .build(),
        }
    }

    /// Override the lock acquisition profile (tests use tighter timings)
    pub fn with_lock_profile(mut self, profile: LockProfile) -> Self {
        self.lock_profile = profile;
        self
    }

    /// Fetch the bundle for this context, generating it once if needed
    pub async fn get_or_create(&self, ctx: &RecipeContext, model: &str) -> Result<RecipeBundle> {
        let hash = context_hash(ctx);
        let memory_key = format!("{}:{}:{}", ctx.thread_id, ctx.mode, hash);

        if let Some(bundle) = self.memory.get(&memory_key).await {
            debug!(thread_id = %ctx.thread_id, mode = %ctx.mode, "recipe memory-cache hit");
            return Ok(bundle);
        }

        if let Some(bundle) = self.read_persisted(ctx, &hash).await? {
            self.memory.insert(memory_key, bundle.clone()).await;
            return Ok(bundle);
        }

        // Static bundles need no LLM call and no lock
        if self.use_simplified_prompts {
            let bundle = static_bundle(ctx, &hash);
            self.persist(ctx, &bundle).await?;
            self.memory.insert(memory_key, bundle.clone()).await;
            return Ok(bundle);
        }

        let lock_key = format!("recipe-gen:{}:{}:{}", ctx.thread_id, ctx.mode, hash);
        let guard = LockGuard::acquire_with_retry(
            Arc::clone(&self.kv),
            &lock_key,
            self.lock_ttl,
            self.lock_profile.max_attempts,
            self.lock_profile.base_delay,
            self.lock_profile.max_wait,
        )
        .await?
        .ok_or(EngineError::RecipeGenerationContention { resource: lock_key })?;

        // Another holder may have generated while we were waiting on the lock
        let result = match self.read_persisted(ctx, &hash).await? {
            Some(bundle) => Ok(bundle),
            None => self.generate(ctx, &hash, model).await,
        };

        let released = guard.release().await?;
        if !released {
            warn!(thread_id = %ctx.thread_id, mode = %ctx.mode, "recipe lock expired before release");
        }

        let bundle = result?;
        self.memory.insert(memory_key, bundle.clone()).await;
        Ok(bundle)
    }

    /// Read the v3 per-mode slot, migrating a matching legacy v2 bundle
    async fn read_persisted(
        &self,
        ctx: &RecipeContext,
        hash: &str,
    ) -> Result<Option<RecipeBundle>> {
        let Some(versioned) = self.store.load(&ctx.thread_id).await? else {
            return Ok(None);
        };

        if let Some(per_mode) = &versioned.state.variant_recipes_v3 {
            if let Some(bundle) = slot(per_mode, ctx.mode) {
                if bundle.context_hash == hash {
                    debug!(thread_id = %ctx.thread_id, mode = %ctx.mode, "recipe store hit");
                    return Ok(Some(bundle.clone()));
                }
            }
        }

        // Legacy single-slot cache: migrate on match
        if let Some(legacy) = &versioned.state.variant_recipes_v2 {
            if legacy.mode == ctx.mode && legacy.context_hash == hash {
                info!(thread_id = %ctx.thread_id, mode = %ctx.mode, "migrating legacy recipe slot");
                let bundle = legacy.clone();
                let migrated = bundle.clone();
                patch_with_retry(self.store.as_ref(), &ctx.thread_id, move |state| {
                    let per_mode = state.variant_recipes_v3.get_or_insert_with(PerModeRecipes::default);
                    *slot_mut(per_mode, migrated.mode) = Some(migrated.clone());
                    state.variant_recipes_v2 = None;
                    Ok(())
                })
                .await?;
                return Ok(Some(bundle));
            }
        }

        Ok(None)
    }

    /// Generate via LLM, validate, and persist into the per-mode slot
    async fn generate(&self, ctx: &RecipeContext, hash: &str, model: &str) -> Result<RecipeBundle> {
        let mut request = LlmRequest::new(model, &system_prompt(), &user_prompt(ctx));
        request.response_format = Some(ResponseFormat::JsonObject);
        request.max_output_tokens = Some(1200);
        request.temperature = Some(0.8);

        let outcome = self.caller.call(request, None).await?;
        let payload: RawRecipePayload = parse_json_payload(&outcome.response.text)?;
        let bundle = validate_bundle(ctx, hash, model, payload)?;

        self.persist(ctx, &bundle).await?;
        info!(
            thread_id = %ctx.thread_id,
            mode = %ctx.mode,
            context_hash = %hash,
            latency_ms = outcome.latency_ms,
            "recipe bundle generated"
        );
        Ok(bundle)
    }

    async fn persist(&self, ctx: &RecipeContext, bundle: &RecipeBundle) -> Result<()> {
        let bundle = bundle.clone();
        let mode = ctx.mode;
        patch_with_retry(self.store.as_ref(), &ctx.thread_id, move |state| {
            let per_mode = state.variant_recipes_v3.get_or_insert_with(PerModeRecipes::default);
            *slot_mut(per_mode, mode) = Some(bundle.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn slot(per_mode: &PerModeRecipes, mode: Mode) -> &Option<RecipeBundle> {
    match mode {
        Mode::Focused => &per_mode.focused,
        Mode::Balanced => &per_mode.balanced,
        Mode::Adventurous => &per_mode.adventurous,
    }
}

fn slot_mut(per_mode: &mut PerModeRecipes, mode: Mode) -> &mut Option<RecipeBundle> {
    match mode {
        Mode::Focused => &mut per_mode.focused,
        Mode::Balanced => &mut per_mode.balanced,
        Mode::Adventurous => &mut per_mode.adventurous,
    }
}

/// Parse a strict-JSON payload, tolerating markdown code fences
pub(crate) fn parse_json_payload<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(stripped.trim())?)
}

fn system_prompt() -> String {
    "You design three distinct artistic recipes for translating a poem. \
     Respond with strict JSON only: {\"recipes\": [{\"label\": \"A\"|\"B\"|\"C\", \
     \"archetype\": string, \"directive\": string (max 200 chars), \
     \"unusualness_budget\": \"low\"|\"medium\"|\"high\", \
     \"lens\": {\"imagery\"|\"diction\"|\"syntax\"|\"sound\"|\"stance\": \
     \"preserve\"|\"shift\"|\"transform\"} (optional), \
     \"stance_plan\": {\"subject_form\": \"we\"|\"you\"|\"third_person\"|\"impersonal\"|\"i\"} \
     (label C only)}]}. \
     Label A is essence_cut: faithful, pared to the essential image. \
     Label B is prismatic_reimagining: one deliberate perceptual shift. \
     Label C is world_voice_transposition: a shifted world and speaking voice."
        .to_string()
}

fn user_prompt(ctx: &RecipeContext) -> String {
    format!(
        "Source language: {src}\nTarget language: {tgt}\nMode: {mode}\n\
         Intent: {intent}\nZone: {zone}\n\nPoem:\n{poem}\n\n\
         Produce the three recipes for this poem.",
        src = ctx.source_lang,
        tgt = ctx.target_lang,
        mode = ctx.mode,
        intent = ctx.translation_intent,
        zone = ctx.translation_zone,
        poem = ctx.poem,
    )
}
