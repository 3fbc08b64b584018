//! Recipe cache integration: racing ticks serialize on the generation lock

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use verso::instrumentation::LlmStats;
use verso::kv::MemoryKv;
use verso::llm::{LlmCaller, LlmRequest, ScriptedProvider};
use verso::recipe::cache::LockProfile;
use verso::recipe::{context_hash, Mode, RecipeCacheService, RecipeContext};
use verso::state::{MemoryStateStore, ThreadState, ThreadStateStore};

fn ctx() -> RecipeContext {
    RecipeContext {
        thread_id: "t1".to_string(),
        mode: Mode::Balanced,
        translation_intent: "keep the chill".to_string(),
        translation_zone: "imagist".to_string(),
        source_lang: "Chinese".to_string(),
        target_lang: "English".to_string(),
        poem: "河湾转冷\n风起".to_string(),
    }
}

fn service(
    kv: Arc<MemoryKv>,
    store: Arc<MemoryStateStore>,
    latency: Duration,
    calls: Arc<Mutex<usize>>,
) -> RecipeCacheService {
    let handler = move |_request: &LlmRequest| {
        *calls.lock().unwrap() += 1;
        Ok(ScriptedProvider::text_response(common::RECIPES_JSON))
    };
    let provider = ScriptedProvider::with_handler(handler).with_latency(latency);
    RecipeCacheService::new(
        kv,
        store,
        LlmCaller::new(Arc::new(provider), LlmStats::new()),
        false,
        Duration::from_secs(90),
    )
    .with_lock_profile(LockProfile {
        max_attempts: 6,
        base_delay: Duration::from_millis(30),
        max_wait: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn test_racing_callers_generate_once() {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStateStore::new());
    store.create("t1", ThreadState::default()).await.unwrap();

    let calls = Arc::new(Mutex::new(0usize));
    // Two independent services (cold memory caches) race on the same inputs
    let first = Arc::new(service(
        Arc::clone(&kv),
        Arc::clone(&store),
        Duration::from_millis(120),
        Arc::clone(&calls),
    ));
    let second = Arc::new(service(
        Arc::clone(&kv),
        Arc::clone(&store),
        Duration::from_millis(120),
        Arc::clone(&calls),
    ));

    let (a, b) = tokio::join!(
        {
            let svc = Arc::clone(&first);
            async move { svc.get_or_create(&ctx(), "gpt-4o").await }
        },
        {
            let svc = Arc::clone(&second);
            async move { svc.get_or_create(&ctx(), "gpt-4o").await }
        }
    );
    let a = a.unwrap();
    let b = b.unwrap();

    // The lock serialized them: one LLM call, one persisted bundle
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(a.context_hash, b.context_hash);
    assert_eq!(a.created_at, b.created_at);
    assert_eq!(a.recipes, b.recipes);

    let state = store.load("t1").await.unwrap().unwrap().state;
    let slot = state
        .variant_recipes_v3
        .expect("v3 slot")
        .balanced
        .expect("balanced bundle");
    assert_eq!(slot.created_at, a.created_at);
}

#[tokio::test]
async fn test_identical_inputs_identical_hash_and_content() {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStateStore::new());
    store.create("t1", ThreadState::default()).await.unwrap();

    let calls = Arc::new(Mutex::new(0usize));
    let svc = service(kv, store, Duration::ZERO, calls);

    let first = svc.get_or_create(&ctx(), "gpt-4o").await.unwrap();
    let second = svc.get_or_create(&ctx(), "gpt-4o").await.unwrap();

    assert_eq!(first.context_hash, context_hash(&ctx()));
    assert_eq!(first.context_hash, second.context_hash);
    assert_eq!(first.recipes, second.recipes);
}

#[tokio::test]
async fn test_contention_error_then_success_after_release() {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(MemoryStateStore::new());
    store.create("t1", ThreadState::default()).await.unwrap();

    let calls = Arc::new(Mutex::new(0usize));
    let svc = service(Arc::clone(&kv), store, Duration::ZERO, calls)
        // A tight profile so exhaustion happens quickly
        .with_lock_profile(LockProfile {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_wait: Duration::from_millis(100),
        });

    let hash = context_hash(&ctx());
    let lock_key = format!("recipe-gen:t1:balanced:{hash}");
    use verso::kv::KvStore;
    kv.set_if_absent(&lock_key, "foreign-holder", Duration::from_secs(30))
        .await
        .unwrap();

    let err = svc.get_or_create(&ctx(), "gpt-4o").await.unwrap_err();
    assert_eq!(err.code(), "RECIPE_GENERATION_CONTENTION");

    kv.del(&lock_key).await.unwrap();
    let bundle = svc.get_or_create(&ctx(), "gpt-4o").await.unwrap();
    assert_eq!(bundle.context_hash, hash);
}
