//! Translation and alignment queues over the KV store
//!
//! Two independent FIFO lists. The translation queue carries thread IDs and
//! uses a per-thread active flag so a thread never appears twice; the flag
//! stays set from enqueue until the job completes. The alignment queue
//! carries JSON-encoded per-line jobs with a per-line active flag.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kv::KvStore;

/// Translation queue list key
pub const TRANSLATION_QUEUE_KEY: &str = "translation:queue";

/// Alignment queue list key
pub const ALIGNMENT_QUEUE_KEY: &str = "alignment:queue";

/// Active flags expire eventually so a crashed worker cannot wedge a thread
const ACTIVE_FLAG_TTL: Duration = Duration::from_secs(24 * 3600);

fn translation_active_key(thread_id: &str) -> String {
    format!("translation:active:{thread_id}")
}

fn alignment_active_key(thread_id: &str, line_index: usize) -> String {
    format!("alignment:active:{thread_id}:{line_index}")
}

/// One per-line alignment job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentJob {
    pub thread_id: String,
    pub stanza_index: usize,
    pub line_index: usize,
    pub line_text: String,
    pub variant_texts: Vec<String>,
    pub source_language: String,
    pub target_language: String,
}

/// The translation queue: thread IDs, deduplicated by an active flag
#[derive(Clone)]
pub struct TranslationQueue {
    kv: Arc<dyn KvStore>,
}

impl TranslationQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Enqueue a thread; returns false when it is already active
    pub async fn enqueue(&self, thread_id: &str) -> Result<bool> {
        let activated = self
            .kv
            .set_if_absent(&translation_active_key(thread_id), "1", ACTIVE_FLAG_TTL)
            .await?;
        if !activated {
            debug!(thread_id, "thread already active, not enqueued");
            return Ok(false);
        }
        self.kv.lpush(TRANSLATION_QUEUE_KEY, thread_id).await?;
        Ok(true)
    }

    /// Re-enqueue an already-active thread (after an incomplete tick)
    pub async fn reenqueue(&self, thread_id: &str) -> Result<()> {
        self.kv.lpush(TRANSLATION_QUEUE_KEY, thread_id).await
    }

    /// Pop the next thread ID
    pub async fn dequeue(&self) -> Result<Option<String>> {
        self.kv.rpop(TRANSLATION_QUEUE_KEY).await
    }

    /// Clear the active flag once the job is done
    pub async fn deactivate(&self, thread_id: &str) -> Result<()> {
        self.kv.del(&translation_active_key(thread_id)).await
    }
}

/// The alignment queue: JSON jobs, deduplicated per line
#[derive(Clone)]
pub struct AlignmentQueue {
    kv: Arc<dyn KvStore>,
}

impl AlignmentQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Enqueue a line's alignment job; returns false when already pending
    pub async fn enqueue(&self, job: &AlignmentJob) -> Result<bool> {
        let flag = alignment_active_key(&job.thread_id, job.line_index);
        if !self.kv.set_if_absent(&flag, "1", ACTIVE_FLAG_TTL).await? {
            return Ok(false);
        }
        let payload = serde_json::to_string(job)?;
        self.kv.lpush(ALIGNMENT_QUEUE_KEY, &payload).await?;
        Ok(true)
    }

    /// Pop the next alignment job, skipping unparseable payloads
    pub async fn dequeue(&self) -> Result<Option<AlignmentJob>> {
        loop {
            let Some(payload) = self.kv.rpop(ALIGNMENT_QUEUE_KEY).await? else {
                return Ok(None);
            };
            match serde_json::from_str(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => warn!(error = %e, "dropping unparseable alignment payload"),
            }
        }
    }

    /// Clear a line's active flag after processing, success or not
    pub async fn deactivate(&self, thread_id: &str, line_index: usize) -> Result<()> {
        self.kv.del(&alignment_active_key(thread_id, line_index)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn job(line_index: usize) -> AlignmentJob {
        AlignmentJob {
            thread_id: "t1".to_string(),
            stanza_index: 0,
            line_index,
            line_text: "河湾转冷".to_string(),
            variant_texts: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            source_language: "Chinese".to_string(),
            target_language: "English".to_string(),
        }
    }

    #[tokio::test]
    async fn test_translation_queue_dedup() {
        let queue = TranslationQueue::new(Arc::new(MemoryKv::new()));
        assert!(queue.enqueue("t1").await.unwrap());
        // Active flag blocks a second enqueue
        assert!(!queue.enqueue("t1").await.unwrap());

        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("t1"));
        assert_eq!(queue.dequeue().await.unwrap(), None);

        // Still active until deactivated
        assert!(!queue.enqueue("t1").await.unwrap());
        queue.deactivate("t1").await.unwrap();
        assert!(queue.enqueue("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_translation_queue_fifo_and_reenqueue() {
        let queue = TranslationQueue::new(Arc::new(MemoryKv::new()));
        queue.enqueue("t1").await.unwrap();
        queue.enqueue("t2").await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("t1"));

        // Re-enqueue appends to the tail
        queue.reenqueue("t1").await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("t2"));
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_alignment_queue_roundtrip() {
        let queue = AlignmentQueue::new(Arc::new(MemoryKv::new()));
        assert!(queue.enqueue(&job(3)).await.unwrap());
        // Same line is deduplicated
        assert!(!queue.enqueue(&job(3)).await.unwrap());
        // A different line is its own entry
        assert!(queue.enqueue(&job(4)).await.unwrap());

        assert_eq!(queue.dequeue().await.unwrap(), Some(job(3)));
        assert_eq!(queue.dequeue().await.unwrap(), Some(job(4)));
        assert_eq!(queue.dequeue().await.unwrap(), None);

        queue.deactivate("t1", 3).await.unwrap();
        assert!(queue.enqueue(&job(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_alignment_queue_skips_garbage() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = AlignmentQueue::new(Arc::clone(&kv));
        kv.lpush(ALIGNMENT_QUEUE_KEY, "not json").await.unwrap();
        queue.enqueue(&job(1)).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(job(1)));
    }
}
