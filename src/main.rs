/*!
 * Verso worker binary
 *
 * Three commands: `worker` runs the polling loop against both queues,
 * `enqueue` seeds a thread with a poem and pushes it onto the translation
 * queue, `status` prints a job's progress.
 *
 * The LLM provider is an external collaborator; this binary ships only an
 * `--offline` provider that fabricates deterministic output for smoke runs.
 * Real deployments embed the `verso` crate and supply their own
 * `LlmProvider` implementation.
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use verso::align::AlignmentService;
use verso::chunkproc::{ChunkProcessor, LinePipeline};
use verso::config::EngineConfig;
use verso::generate::LineGenerator;
use verso::instrumentation::LlmStats;
use verso::job::Job;
use verso::kv::{KvStore, MemoryKv};
use verso::llm::{LlmCaller, LlmProvider, ScriptedProvider};
use verso::queues::{AlignmentQueue, TranslationQueue};
use verso::recipe::RecipeCacheService;
use verso::regen::Regenerator;
use verso::state::{GuideAnswers, TargetLanguage, ThreadState, ThreadStateStore};
use verso::tick::TickRunner;
use verso::worker::{Worker, WorkerOptions};

#[derive(Parser)]
#[command(name = "verso", version, about = "Multi-variant poetry translation engine")]
struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background worker loop
    Worker {
        /// Thread-state database path
        #[arg(long, default_value = "verso.db")]
        db: String,

        /// Redis URL for queues and locks (in-memory when omitted)
        #[arg(long)]
        redis: Option<String>,

        /// Use the deterministic offline provider
        #[arg(long)]
        offline: bool,
    },

    /// Create a job for a poem and enqueue it
    Enqueue {
        /// Thread identifier
        #[arg(long)]
        thread: String,

        /// Poem file, one line per poem line, blank lines split stanzas
        #[arg(long)]
        poem: PathBuf,

        /// Translation mode: focused, balanced, or adventurous
        #[arg(long, default_value = "balanced")]
        mode: String,

        /// Target language
        #[arg(long, default_value = "English")]
        target_lang: String,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "verso.db")]
        db: String,

        #[arg(long)]
        redis: Option<String>,
    },

    /// Print a job's progress
    Status {
        #[arg(long)]
        thread: String,

        #[arg(long, default_value = "verso.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    verso::logging::init_logging(cli.verbose);

    match cli.command {
        Commands::Worker { db, redis, offline } => run_worker(&db, redis.as_deref(), offline).await,
        Commands::Enqueue {
            thread,
            poem,
            mode,
            target_lang,
            model,
            db,
            redis,
        } => {
            enqueue(
                &thread,
                &poem,
                &mode,
                &target_lang,
                model.as_deref(),
                &db,
                redis.as_deref(),
            )
            .await
        }
        Commands::Status { thread, db } => status(&thread, &db).await,
    }
}

async fn run_worker(db: &str, redis: Option<&str>, offline: bool) -> Result<()> {
    if !offline {
        bail!(
            "no LLM provider is wired into this binary; run with --offline for a smoke run, \
             or embed the verso crate and supply an LlmProvider"
        );
    }

    let kv = build_kv(redis).await?;
    let store = build_store(db).await?;
    let config = EngineConfig::from_env();
    let stats = LlmStats::new();
    let caller = LlmCaller::new(offline_provider(), stats.clone());

    let recipes = Arc::new(RecipeCacheService::new(
        Arc::clone(&kv),
        Arc::clone(&store),
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
        Arc::clone(&store),
        Arc::clone(&recipes),
        pipeline,
        config.clone(),
    );
    let tick_runner = TickRunner::new(
        Arc::clone(&kv),
        Arc::clone(&store),
        processor,
        config.clone(),
    );
    let alignment = AlignmentService::new(caller, Arc::clone(&store));

    let worker = Worker::new(
        Arc::clone(&store),
        tick_runner,
        alignment,
        TranslationQueue::new(Arc::clone(&kv)),
        AlignmentQueue::new(Arc::clone(&kv)),
        WorkerOptions::default(),
        "offline".to_string(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await?;

    let snapshot = stats.snapshot();
    info!(
        total_calls = snapshot.total_calls,
        failed_calls = snapshot.failed_calls,
        total_tokens = snapshot.total_tokens(),
        "llm usage at shutdown"
    );
    Ok(())
}

async fn enqueue(
    thread: &str,
    poem_path: &PathBuf,
    mode: &str,
    target_lang: &str,
    model: Option<&str>,
    db: &str,
    redis: Option<&str>,
) -> Result<()> {
    let poem = std::fs::read_to_string(poem_path)
        .with_context(|| format!("reading poem file {}", poem_path.display()))?;
    if poem.trim().is_empty() {
        bail!("poem file is empty");
    }

    let kv = build_kv(redis).await?;
    let store = build_store(db).await?;
    let config = EngineConfig::from_env();

    let guide = GuideAnswers {
        translation_range_mode: mode.to_string(),
        target_language: TargetLanguage {
            lang: target_lang.to_string(),
            variety: None,
        },
        translation_model: model.map(str::to_string),
        ..Default::default()
    };
    let job = Job::from_poem(thread, &poem, guide.clone(), 2, config.max_chunks_per_tick);
    let total_chunks = job.total_chunks;

    let state = ThreadState {
        raw_poem: Some(poem),
        guide_answers: Some(guide),
        translation_job: Some(job),
        ..Default::default()
    };
    store.create(thread, state).await?;

    let queue = TranslationQueue::new(kv);
    queue.enqueue(thread).await?;

    println!("enqueued thread {thread}: {total_chunks} chunks");
    Ok(())
}

async fn status(thread: &str, db: &str) -> Result<()> {
    let store = build_store(db).await?;
    let Some(versioned) = store.load(thread).await? else {
        bail!("thread {thread} not found");
    };
    let Some(job) = versioned.state.translation_job else {
        bail!("thread {thread} has no translation job");
    };

    let stats = job.stats();
    println!("job {}: {}", stats.job_id, stats.status);
    println!(
        "chunks: {} total / {} pending / {} queued / {} processing / {} completed / {} failed",
        stats.total_chunks,
        stats.pending,
        stats.queued,
        stats.processing,
        stats.completed,
        stats.failed
    );
    println!(
        "lines: {}/{} translated ({:.1}%), {} failed",
        stats.lines_translated,
        stats.total_lines,
        stats.completion_percent(),
        stats.lines_failed
    );
    if let Some(error) = job.last_error {
        println!("last error: {error}");
    }
    Ok(())
}

async fn build_kv(redis: Option<&str>) -> Result<Arc<dyn KvStore>> {
    match redis {
        #[cfg(feature = "redis-kv")]
        Some(url) => {
            let kv = verso::kv::redis::RedisKv::connect(url).await?;
            Ok(Arc::new(kv))
        }
        #[cfg(not(feature = "redis-kv"))]
        Some(_) => bail!("built without the redis-kv feature"),
        None => Ok(Arc::new(MemoryKv::new())),
    }
}

async fn build_store(db: &str) -> Result<Arc<dyn ThreadStateStore>> {
    #[cfg(feature = "sqlite")]
    {
        let store = verso::state::sqlite::SqliteStateStore::open(db).await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        let _ = db;
        Ok(Arc::new(verso::state::MemoryStateStore::new()))
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Deterministic offline provider for smoke runs
///
/// Answers recipe, line, regen, and alignment prompts with fixed-shape JSON
/// derived from the request text. Output is not a translation; it exists to
/// drive the full pipeline without a provider.
fn offline_provider() -> Arc<dyn LlmProvider> {
    Arc::new(ScriptedProvider::with_handler(|request| {
        let text = if request.system.contains("artistic recipes") {
            r#"{"recipes": [
                {"label": "A", "directive": "keep the plain image"},
                {"label": "B", "directive": "shift one sense"},
                {"label": "C", "directive": "move the world",
                 "stance_plan": {"subject_form": "we"}}
            ]}"#
            .to_string()
        } else if request.system.contains("replace exactly one failed variant") {
            let line = extract_after(&request.user, "Source line:\n");
            serde_json::json!({
                "text": format!("Elsewhere, the same current: {line}"),
                "world_shift_summary": "moved to an unnamed shore"
            })
            .to_string()
        } else if request.system.contains("align words") {
            r#"{"alignments": []}"#.to_string()
        } else {
            let line = extract_after(&request.user, "Line to translate:\n");
            serde_json::json!({
                "variants": [
                    {"label": "A", "text": line, "anchor_realizations": {}},
                    {"label": "B", "text": format!("Through other glass: {line}"),
                     "anchor_realizations": {},
                     "image_shift_summary": "offline rendering, one shifted pane"},
                    {"label": "C", "text": format!("We carry it along: {line}"),
                     "anchor_realizations": {},
                     "world_shift_summary": "offline rendering, a shared walk",
                     "subject_form_used": "we"}
                ]
            })
            .to_string()
        };
        Ok(ScriptedProvider::text_response(&text))
    }))
}

fn extract_after(haystack: &str, marker: &str) -> String {
    haystack
        .split_once(marker)
        .map(|(_, rest)| rest.lines().next().unwrap_or_default())
        .unwrap_or_default()
        .to_string()
}
