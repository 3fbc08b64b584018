//! Shared harness for the integration suites
//!
//! Builds a full engine against the in-memory stores and a handler-driven
//! scripted provider. The default handler answers recipe, line, and regen
//! prompts with deterministic, gate-clean JSON.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use verso::chunkproc::{ChunkProcessor, LinePipeline};
use verso::config::EngineConfig;
use verso::generate::LineGenerator;
use verso::instrumentation::LlmStats;
use verso::job::Job;
use verso::kv::MemoryKv;
use verso::llm::{LlmCaller, LlmRequest, LlmResponse, ScriptedProvider};
use verso::recipe::RecipeCacheService;
use verso::regen::Regenerator;
use verso::state::{GuideAnswers, MemoryStateStore, TargetLanguage, ThreadState, ThreadStateStore};
use verso::tick::TickRunner;

pub struct TestEngine {
    pub kv: Arc<MemoryKv>,
    pub store: Arc<MemoryStateStore>,
    pub store_dyn: Arc<dyn ThreadStateStore>,
    pub runner: TickRunner,
    pub pipeline: LinePipeline,
    pub recipes: Arc<RecipeCacheService>,
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
}

/// Recipes JSON with a "we" stance plan for variant C
pub const RECIPES_JSON: &str = r#"{
    "recipes": [
        {"label": "A", "directive": "keep the plain image"},
        {"label": "B", "directive": "shift one sense"},
        {"label": "C", "directive": "move the world",
         "stance_plan": {"subject_form": "we"}}
    ]
}"#;

/// Three gate-clean variants templated over a source line
pub fn clean_line_payload(line: &str) -> String {
    serde_json::json!({
        "variants": [
            {"label": "A", "text": format!("The letter {line} rests on stone"),
             "anchor_realizations": {}},
            {"label": "B", "text": format!("Quiet ink bends around {line}"),
             "anchor_realizations": {},
             "image_shift_summary": "turned the mark from sight to weight"},
            {"label": "C", "text": format!("We read {line} under late light"),
             "anchor_realizations": {},
             "world_shift_summary": "a shared reading at dusk",
             "subject_form_used": "we"}
        ]
    })
    .to_string()
}

/// A gate-clean regen candidate
pub fn clean_regen_payload(line: &str) -> String {
    serde_json::json!({
        "text": format!("Under far lamps, {line} goes quiet"),
        "anchor_realizations": {},
        "image_shift_summary": "moved the mark under lamplight",
        "world_shift_summary": "an elsewhere with the same current",
        "subject_form_used": "impersonal"
    })
    .to_string()
}

/// A regen candidate honoring a first-person-plural stance plan
pub fn we_regen_payload(line: &str) -> String {
    serde_json::json!({
        "text": format!("We gather where {line} goes quiet"),
        "anchor_realizations": {},
        "world_shift_summary": "a shared elsewhere with the same current",
        "subject_form_used": "we"
    })
    .to_string()
}

/// Extract the source line a prompt is asking about
pub fn prompt_line(request: &LlmRequest) -> String {
    for marker in ["Line to translate:\n", "Source line:\n"] {
        if let Some((_, rest)) = request.user.split_once(marker) {
            return rest.lines().next().unwrap_or_default().to_string();
        }
    }
    String::new()
}

/// The default deterministic handler: recipes, clean lines, clean regens
pub fn default_handler(request: &LlmRequest) -> verso::Result<LlmResponse> {
    let text = if request.system.contains("artistic recipes") {
        RECIPES_JSON.to_string()
    } else if request.system.contains("replace exactly one failed variant") {
        if request.user.contains("speak as \"we\"") {
            we_regen_payload(&prompt_line(request))
        } else {
            clean_regen_payload(&prompt_line(request))
        }
    } else {
        clean_line_payload(&prompt_line(request))
    };
    Ok(ScriptedProvider::text_response(&text))
}

/// Build the engine with a handler-driven provider
pub fn engine_with_handler(
    config: EngineConfig,
    latency: Option<Duration>,
    handler: impl Fn(&LlmRequest) -> verso::Result<LlmResponse> + Send + Sync + 'static,
) -> TestEngine {
    let mut provider = ScriptedProvider::with_handler(handler);
    if let Some(latency) = latency {
        provider = provider.with_latency(latency);
    }
    let requests = provider.requests();

    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStateStore::new());
    let caller = LlmCaller::new(Arc::new(provider), LlmStats::new());

    let kv_dyn: Arc<dyn verso::kv::KvStore> = Arc::clone(&kv) as Arc<dyn verso::kv::KvStore>;
    let store_dyn: Arc<dyn ThreadStateStore> = Arc::clone(&store) as Arc<dyn ThreadStateStore>;

    let recipes = Arc::new(RecipeCacheService::new(
        Arc::clone(&kv_dyn),
        Arc::clone(&store_dyn),
        caller.clone(),
        config.use_simplified_prompts,
        Duration::from_secs(config.recipe_lock_ttl_secs),
    ));
    let pipeline = LinePipeline::new(
        LineGenerator::new(caller.clone()),
        Regenerator::new(caller.clone(), config.clone()),
        config.clone(),
    );
    let processor = ChunkProcessor::new(
        Arc::clone(&store_dyn),
        Arc::clone(&recipes),
        pipeline.clone(),
        config.clone(),
    );
    let runner = TickRunner::new(kv_dyn, Arc::clone(&store_dyn), processor, config);

    TestEngine {
        kv,
        store,
        store_dyn,
        runner,
        pipeline,
        recipes,
        requests,
    }
}

/// Seed a thread with a poem and a ready job
pub async fn seed_thread(store: &MemoryStateStore, thread_id: &str, poem: &str, mode: &str) {
    let guide = GuideAnswers {
        translation_range_mode: mode.to_string(),
        target_language: TargetLanguage {
            lang: "English".to_string(),
            variety: None,
        },
        translation_model: Some("gpt-4o".to_string()),
        ..Default::default()
    };
    let job = Job::from_poem(thread_id, poem, guide.clone(), 3, 3);
    let state = ThreadState {
        raw_poem: Some(poem.to_string()),
        guide_answers: Some(guide),
        translation_job: Some(job),
        ..Default::default()
    };
    store.create(thread_id, state).await.expect("seed thread");
}

/// Load the job back out of the store
pub async fn load_job(store: &MemoryStateStore, thread_id: &str) -> Job {
    store
        .load(thread_id)
        .await
        .expect("load state")
        .expect("thread exists")
        .state
        .translation_job
        .expect("job exists")
}
