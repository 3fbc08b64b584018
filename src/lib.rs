//! Verso: a multi-variant poetry translation engine
//!
//! # Overview
//!
//! Verso turns a source poem into three artistically distinct translations
//! per line, with quality gates and targeted regeneration. The engine is a
//! persistent, resumable, multi-queue job scheduler: jobs are split into
//! chunks (stanzas), chunks into lines, and a tick-based scheduler advances
//! each job under a per-job lock and a wall-clock deadline.
//!
//! # Architecture
//!
//! ```text
//! translation:queue ──► Worker ──► TickRunner (per-job lock + heartbeat)
//!                                     │
//!                                     ├─ reconcile / pick chunks
//!                                     ├─ ChunkProcessor (lines, sequential)
//!                                     │    └─ LinePipeline:
//!                                     │         generate → gate → regen → validate
//!                                     ├─ auto-retry pass
//!                                     └─ completion + release
//!
//! alignment:queue ──► Worker ──► AlignmentService (bounded fan-out)
//! ```
//!
//! Thread state lives in a single JSON document per job with optimistic
//! concurrency on a version field; the KV store carries queues, rate
//! windows, and single-holder locks with token-checked release.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use verso::prelude::*;
//!
//! # async fn example() -> verso::Result<()> {
//! let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
//! let store: Arc<dyn ThreadStateStore> = Arc::new(MemoryStateStore::new());
//! let config = EngineConfig::from_env();
//!
//! let queue = TranslationQueue::new(Arc::clone(&kv));
//! queue.enqueue("thread-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod anchors;
pub mod autoretry;
pub mod chunkproc;
pub mod config;
pub mod error;
pub mod gate;
pub mod generate;
pub mod instrumentation;
pub mod job;
pub mod kv;
pub mod llm;
pub mod logging;
pub mod queues;
pub mod recipe;
pub mod regen;
pub mod state;
pub mod tick;
pub mod worker;

pub use error::{EngineError, Result};

/// The commonly wired-together surface
pub mod prelude {
    pub use crate::align::AlignmentService;
    pub use crate::chunkproc::{ChunkProcessor, LinePipeline};
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::generate::LineGenerator;
    pub use crate::instrumentation::LlmStats;
    pub use crate::job::{Job, JobStatus};
    pub use crate::kv::{KvStore, MemoryKv};
    pub use crate::llm::{LlmCaller, LlmProvider, LlmRequest, LlmResponse};
    pub use crate::queues::{AlignmentQueue, TranslationQueue};
    pub use crate::recipe::{Mode, RecipeCacheService};
    pub use crate::regen::Regenerator;
    pub use crate::state::{MemoryStateStore, ThreadStateStore};
    pub use crate::tick::TickRunner;
    pub use crate::worker::{Worker, WorkerOptions};
}
