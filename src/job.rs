//! Translation job document: chunks, lines, variants, and their invariants
//!
//! # Overview
//!
//! One job per thread. The job holds an ordered set of chunks (stanzas), each
//! chunk holds the lines translated so far, and each line holds its three
//! variants. The scheduler's `queue` and `active` lists index into the chunk
//! map and are rebuilt from chunk statuses during reconciliation, so a
//! crashed tick can never strand a chunk.
//!
//! # Invariants
//!
//! - `lines_processed <= total_lines` always; at rest it equals `lines.len()`
//! - Every incomplete chunk appears exactly once in `queue` or `active`;
//!   completed/failed chunks appear in neither; no duplicates
//! - The job is completed exactly when every chunk is terminal, every stored
//!   line is terminal, and both lists are empty

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::LineErrorKind;
use crate::recipe::{Archetype, SubjectForm, VariantLabel};
use crate::state::GuideAnswers;

/// Default per-chunk retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-line auto-retry budget
pub const MAX_LINE_RETRIES: u32 = 3;

/// Job execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Chunk execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStatus::Pending => write!(f, "pending"),
            ChunkStatus::Queued => write!(f, "queued"),
            ChunkStatus::Processing => write!(f, "processing"),
            ChunkStatus::Completed => write!(f, "completed"),
            ChunkStatus::Failed => write!(f, "failed"),
        }
    }
}

impl ChunkStatus {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

/// Per-line translation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Pending,
    Translated,
    Failed,
}

/// Per-line alignment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentStatus {
    Pending,
    Aligned,
    Failed,
}

/// One word-level alignment entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordAlignment {
    pub source: String,
    pub target: String,
}

/// Model-reported metadata for variants B and C
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_shift_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_shift_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_form_used: Option<SubjectForm>,
}

/// One of the three translations of a line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
    pub label: VariantLabel,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archetype: Option<Archetype>,
    #[serde(default)]
    pub anchor_realizations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_report: Option<SelfReport>,
    /// Word alignments, filled in by the alignment worker
    #[serde(default)]
    pub words: Vec<WordAlignment>,
}

/// Quality flags carried by an accepted line
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetadata {
    /// Gate or hard constraints could not be fully satisfied; best candidate kept
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_reason: Option<String>,
    #[serde(default)]
    pub regen_rounds: u32,
}

/// State of a single poem line within a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineState {
    /// Absolute line number in the poem
    pub line_number: usize,
    pub original_text: String,
    #[serde(default)]
    pub translations: Vec<VariantResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub translation_status: TranslationStatus,
    pub alignment_status: AlignmentStatus,
    #[serde(default)]
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metadata: Option<QualityMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<LineErrorKind>,
}

impl LineState {
    /// Failed retryably with auto-retry budget left
    ///
    /// Such a line keeps the job incomplete so later ticks can run the
    /// auto-retry pass over it; lines that failed fatally or spent their
    /// budget are terminal.
    pub fn is_retry_pending(&self) -> bool {
        self.translation_status == TranslationStatus::Failed
            && self.retry_count < MAX_LINE_RETRIES
            && self.error_code.is_some_and(|k| k.is_retryable())
    }

    /// A blank source line: stored as translated with empty translations
    pub fn blank(line_number: usize, original_text: String) -> Self {
        Self {
            line_number,
            original_text,
            translations: Vec::new(),
            model_used: None,
            translation_status: TranslationStatus::Translated,
            alignment_status: AlignmentStatus::Aligned,
            retry_count: 0,
            updated_at: Utc::now(),
            quality_metadata: None,
            error_code: None,
        }
    }
}

/// State of a single chunk (stanza)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkState {
    pub chunk_index: usize,
    pub status: ChunkStatus,
    /// Invariant: equals `lines.len()` at rest
    pub lines_processed: usize,
    pub total_lines: usize,
    /// Absolute line number of this chunk's first line
    pub start_line: usize,
    #[serde(default)]
    pub retries: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lines: Vec<LineState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkState {
    fn new(chunk_index: usize, start_line: usize, total_lines: usize, status: ChunkStatus) -> Self {
        Self {
            chunk_index,
            status,
            lines_processed: 0,
            total_lines,
            start_line,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            lines: Vec::new(),
            error: None,
        }
    }

    /// Not terminal and not yet fully processed
    pub fn is_incomplete(&self) -> bool {
        !self.status.is_terminal() && self.lines_processed < self.total_lines
    }

    /// Eligible for pickup: queued/pending and past any retry hold-off
    pub fn is_pickable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ChunkStatus::Pending | ChunkStatus::Queued)
            && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// The translation job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub max_concurrent: u32,
    pub max_chunks_per_tick: u32,
    /// Chunk indices awaiting work, in order
    #[serde(default)]
    pub queue: Vec<usize>,
    /// Chunk indices claimed by the in-flight tick
    #[serde(default)]
    pub active: Vec<usize>,
    pub chunks: BTreeMap<usize, ChunkState>,
    pub raw_poem: String,
    pub guide_preferences: GuideAnswers,
    pub total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Split a poem into stanzas at blank-line runs
///
/// Returns `(start_line, lines)` per stanza, where `start_line` is the
/// absolute index of the stanza's first line in the poem. Blank lines inside
/// a stanza do not exist by construction; a poem with no blank lines is one
/// stanza.
pub fn split_stanzas(poem: &str) -> Vec<(usize, Vec<String>)> {
    let mut stanzas = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_start = 0usize;

    for (index, raw_line) in poem.lines().enumerate() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push((current_start, std::mem::take(&mut current)));
            }
        } else {
            if current.is_empty() {
                current_start = index;
            }
            current.push(line.to_string());
        }
    }
    if !current.is_empty() {
        stanzas.push((current_start, current));
    }
    stanzas
}

impl Job {
    /// Create a job from a poem: enumerate chunks, seed the queue
    ///
    /// The queue holds every chunk index; the first chunk starts `queued` and
    /// the rest `pending` until slots open.
    pub fn from_poem(
        id: &str,
        raw_poem: &str,
        guide_preferences: GuideAnswers,
        max_concurrent: u32,
        max_chunks_per_tick: u32,
    ) -> Self {
        let now = Utc::now();
        let stanzas = split_stanzas(raw_poem);

        let mut chunks = BTreeMap::new();
        for (chunk_index, (start_line, lines)) in stanzas.iter().enumerate() {
            let status = if chunk_index == 0 {
                ChunkStatus::Queued
            } else {
                ChunkStatus::Pending
            };
            chunks.insert(
                chunk_index,
                ChunkState::new(chunk_index, *start_line, lines.len(), status),
            );
        }

        let total_chunks = chunks.len();
        Self {
            id: id.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            max_concurrent,
            max_chunks_per_tick,
            queue: (0..total_chunks).collect(),
            active: Vec::new(),
            chunks,
            raw_poem: raw_poem.to_string(),
            guide_preferences,
            total_chunks,
            last_error: None,
        }
    }

    /// The source lines of a chunk as `(absolute_line_number, text)` pairs
    pub fn chunk_source_lines(&self, chunk_index: usize) -> Vec<(usize, String)> {
        split_stanzas(&self.raw_poem)
            .into_iter()
            .nth(chunk_index)
            .map(|(start, lines)| {
                lines
                    .into_iter()
                    .enumerate()
                    .map(|(offset, text)| (start + offset, text))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reconcile chunk state with the queue/active lists
    ///
    /// Run at the start of every tick, under the job lock:
    /// - clamps `lines_processed` to `lines.len()`
    /// - returns chunks stranded in `processing` by an interrupted tick to
    ///   `queued`
    /// - rebuilds `queue` (pending/queued chunks in index order) and empties
    ///   `active`
    pub fn reconcile(&mut self) {
        for chunk in self.chunks.values_mut() {
            chunk.lines_processed = chunk.lines.len().min(chunk.total_lines);

            // Zero-line chunks complete the moment they are looked at
            if chunk.total_lines == 0 && !chunk.status.is_terminal() {
                chunk.status = ChunkStatus::Completed;
                chunk.completed_at = Some(Utc::now());
                continue;
            }

            // A processing chunk with no active tick was interrupted; resume it
            if chunk.status == ChunkStatus::Processing {
                chunk.status = ChunkStatus::Queued;
            }
        }

        self.queue = self
            .chunks
            .values()
            .filter(|c| matches!(c.status, ChunkStatus::Pending | ChunkStatus::Queued))
            .map(|c| c.chunk_index)
            .collect();
        self.active.clear();

        // Both lists empty with incomplete chunks left means statuses went
        // inconsistent (e.g. a terminal status was lost); reseed the queue.
        if self.queue.is_empty() && self.active.is_empty() {
            let incomplete: Vec<usize> = self
                .chunks
                .values()
                .filter(|c| c.is_incomplete())
                .map(|c| c.chunk_index)
                .collect();
            for index in &incomplete {
                if let Some(chunk) = self.chunks.get_mut(index) {
                    chunk.status = ChunkStatus::Queued;
                }
            }
            self.queue = incomplete;
        }

        self.updated_at = Utc::now();
    }

    /// Check the structural invariants, returning every violation found
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for chunk in self.chunks.values() {
            if chunk.lines_processed > chunk.total_lines {
                violations.push(format!(
                    "chunk {}: lines_processed {} > total_lines {}",
                    chunk.chunk_index, chunk.lines_processed, chunk.total_lines
                ));
            }
            if chunk.lines_processed != chunk.lines.len() {
                violations.push(format!(
                    "chunk {}: lines_processed {} != lines.len() {}",
                    chunk.chunk_index,
                    chunk.lines_processed,
                    chunk.lines.len()
                ));
            }

            let in_queue = self.queue.iter().filter(|&&i| i == chunk.chunk_index).count();
            let in_active = self
                .active
                .iter()
                .filter(|&&i| i == chunk.chunk_index)
                .count();

            if chunk.status.is_terminal() {
                if in_queue + in_active > 0 {
                    violations.push(format!(
                        "chunk {}: terminal but present in queue/active",
                        chunk.chunk_index
                    ));
                }
            } else if chunk.is_incomplete() && in_queue + in_active != 1 {
                violations.push(format!(
                    "chunk {}: incomplete but appears {} times across queue/active",
                    chunk.chunk_index,
                    in_queue + in_active
                ));
            }
        }

        for (name, list) in [("queue", &self.queue), ("active", &self.active)] {
            let mut seen = std::collections::BTreeSet::new();
            for index in list {
                if !self.chunks.contains_key(index) {
                    violations.push(format!("{name}: unknown chunk index {index}"));
                }
                if !seen.insert(*index) {
                    violations.push(format!("{name}: duplicate chunk index {index}"));
                }
            }
        }
        for index in &self.queue {
            if self.active.contains(index) {
                violations.push(format!("chunk {index}: present in both queue and active"));
            }
        }

        violations
    }

    /// Pick up to `limit` chunks for this tick
    ///
    /// Walks the queue in order, promotes pending chunks, skips chunks held
    /// back by `next_retry_at`, transitions the picked chunks to processing,
    /// and moves them from `queue` to `active`. Returns the picked indices.
    pub fn pick_work(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        let slots = (self.max_concurrent as usize).saturating_sub(self.active.len());
        let limit = slots.min(self.max_chunks_per_tick as usize);

        let mut picked = Vec::new();
        for &index in self.queue.iter() {
            if picked.len() >= limit {
                break;
            }
            if let Some(chunk) = self.chunks.get(&index) {
                if chunk.is_pickable(now) {
                    picked.push(index);
                }
            }
        }

        for &index in &picked {
            if let Some(chunk) = self.chunks.get_mut(&index) {
                chunk.status = ChunkStatus::Processing;
                chunk.next_retry_at = None;
                if chunk.started_at.is_none() {
                    chunk.started_at = Some(now);
                }
            }
            self.queue.retain(|&i| i != index);
            self.active.push(index);
        }

        if !picked.is_empty() {
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
            self.status = JobStatus::Processing;
            self.updated_at = now;
        }
        picked
    }

    /// True when every chunk is terminal, every stored line is terminal
    /// (translated, or failed with no auto-retry budget left), and both
    /// scheduling lists are empty
    pub fn is_complete(&self) -> bool {
        self.queue.is_empty()
            && self.active.is_empty()
            && self.chunks.values().all(|c| c.status.is_terminal())
            && self.chunks.values().flat_map(|c| c.lines.iter()).all(|l| {
                matches!(
                    l.translation_status,
                    TranslationStatus::Translated | TranslationStatus::Failed
                ) && !l.is_retry_pending()
            })
    }

    /// Recompute `status` from chunk terminal states
    pub fn recompute_status(&mut self) {
        if self.is_complete() {
            self.status = JobStatus::Completed;
            if self.completed_at.is_none() {
                self.completed_at = Some(Utc::now());
            }
        } else if self.started_at.is_some() {
            self.status = JobStatus::Processing;
        }
        self.updated_at = Utc::now();
    }

    /// Clear failed lines back to pending and re-queue their chunks
    ///
    /// The manual-retry surface: failed lines are removed from their chunks
    /// so the processor regenerates them, and the owning chunks return to the
    /// queue.
    pub fn reset_failed_lines(&mut self) -> usize {
        let mut cleared = 0;
        for chunk in self.chunks.values_mut() {
            let before = chunk.lines.len();
            chunk
                .lines
                .retain(|l| l.translation_status != TranslationStatus::Failed);
            let removed = before - chunk.lines.len();
            if removed > 0 {
                cleared += removed;
                chunk.lines_processed = chunk.lines.len();
                chunk.status = ChunkStatus::Queued;
                chunk.completed_at = None;
                chunk.error = None;
                chunk.retries = 0;
                chunk.next_retry_at = None;
                if !self.queue.contains(&chunk.chunk_index)
                    && !self.active.contains(&chunk.chunk_index)
                {
                    self.queue.push(chunk.chunk_index);
                }
            }
        }
        if cleared > 0 {
            self.recompute_status();
        }
        cleared
    }

    /// Summary statistics for status reporting
    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats {
            job_id: self.id.clone(),
            status: self.status,
            total_chunks: self.total_chunks,
            ..Default::default()
        };
        for chunk in self.chunks.values() {
            match chunk.status {
                ChunkStatus::Pending => stats.pending += 1,
                ChunkStatus::Queued => stats.queued += 1,
                ChunkStatus::Processing => stats.processing += 1,
                ChunkStatus::Completed => stats.completed += 1,
                ChunkStatus::Failed => stats.failed += 1,
            }
            stats.total_lines += chunk.total_lines;
            for line in &chunk.lines {
                match line.translation_status {
                    TranslationStatus::Translated => stats.lines_translated += 1,
                    TranslationStatus::Failed => stats.lines_failed += 1,
                    TranslationStatus::Pending => {}
                }
            }
        }
        stats
    }
}

/// Statistics for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: String,
    pub status: JobStatus,
    pub total_chunks: usize,
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_lines: usize,
    pub lines_translated: usize,
    pub lines_failed: usize,
}

impl Default for JobStats {
    fn default() -> Self {
        Self {
            job_id: String::new(),
            status: JobStatus::Pending,
            total_chunks: 0,
            pending: 0,
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            total_lines: 0,
            lines_translated: 0,
            lines_failed: 0,
        }
    }
}

impl JobStats {
    /// Share of lines translated, as a percentage
    pub fn completion_percent(&self) -> f64 {
        if self.total_lines == 0 {
            0.0
        } else {
            (self.lines_translated as f64 / self.total_lines as f64) * 100.0
        }
    }

    /// Whether any chunk or line has failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.lines_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POEM: &str = "line one\nline two\n\nline three\nline four\nline five\n\nline six";

    fn job() -> Job {
        Job::from_poem("t1", POEM, GuideAnswers::default(), 2, 2)
    }

    #[test]
    fn test_split_stanzas() {
        let stanzas = split_stanzas(POEM);
        assert_eq!(stanzas.len(), 3);
        assert_eq!(stanzas[0], (0, vec!["line one".to_string(), "line two".to_string()]));
        assert_eq!(stanzas[1].0, 3);
        assert_eq!(stanzas[1].1.len(), 3);
        assert_eq!(stanzas[2], (7, vec!["line six".to_string()]));
    }

    #[test]
    fn test_split_stanzas_edges() {
        assert!(split_stanzas("").is_empty());
        assert!(split_stanzas("\n\n\n").is_empty());
        let single = split_stanzas("only line");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].0, 0);
    }

    #[test]
    fn test_from_poem_seeds_queue() {
        let job = job();
        assert_eq!(job.total_chunks, 3);
        assert_eq!(job.queue, vec![0, 1, 2]);
        assert!(job.active.is_empty());
        assert_eq!(job.chunks[&0].status, ChunkStatus::Queued);
        assert_eq!(job.chunks[&1].status, ChunkStatus::Pending);
        assert_eq!(job.chunks[&2].status, ChunkStatus::Pending);
        assert!(job.check_invariants().is_empty());
    }

    #[test]
    fn test_chunk_source_lines_absolute_numbers() {
        let job = job();
        let lines = job.chunk_source_lines(1);
        assert_eq!(
            lines,
            vec![
                (3, "line three".to_string()),
                (4, "line four".to_string()),
                (5, "line five".to_string()),
            ]
        );
        assert!(job.chunk_source_lines(9).is_empty());
    }

    #[test]
    fn test_pick_work_respects_limits() {
        let mut job = job();
        let picked = job.pick_work(Utc::now());
        // max_concurrent=2, max_chunks_per_tick=2
        assert_eq!(picked, vec![0, 1]);
        assert_eq!(job.active, vec![0, 1]);
        assert_eq!(job.queue, vec![2]);
        assert_eq!(job.chunks[&0].status, ChunkStatus::Processing);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.check_invariants().is_empty());
    }

    #[test]
    fn test_pick_work_skips_retry_holdoff() {
        let mut job = job();
        job.chunks.get_mut(&0).unwrap().next_retry_at =
            Some(Utc::now() + chrono::Duration::seconds(60));
        let picked = job.pick_work(Utc::now());
        assert_eq!(picked, vec![1, 2]);
    }

    #[test]
    fn test_reconcile_resumes_interrupted_chunks() {
        let mut job = job();
        job.pick_work(Utc::now());
        // Simulate a crashed tick: chunk 0 left processing, lists stale
        job.chunks.get_mut(&0).unwrap().status = ChunkStatus::Processing;
        job.active.clear();
        job.queue.clear();

        job.reconcile();
        assert_eq!(job.chunks[&0].status, ChunkStatus::Queued);
        assert!(job.queue.contains(&0));
        assert!(job.active.is_empty());
        assert!(job.check_invariants().is_empty());
    }

    #[test]
    fn test_reconcile_clamps_lines_processed() {
        let mut job = job();
        let chunk = job.chunks.get_mut(&2).unwrap();
        chunk.lines_processed = 99;
        job.reconcile();
        assert_eq!(job.chunks[&2].lines_processed, 0);
    }

    #[test]
    fn test_zero_line_chunk_completes_on_reconcile() {
        let mut job = job();
        let chunk = job.chunks.get_mut(&2).unwrap();
        chunk.total_lines = 0;
        job.reconcile();
        assert_eq!(job.chunks[&2].status, ChunkStatus::Completed);
        assert!(!job.queue.contains(&2));
    }

    #[test]
    fn test_invariant_violations_detected() {
        let mut job1 = job();
        job1.queue.push(0); // duplicate
        let violations = job1.check_invariants();
        assert!(violations.iter().any(|v| v.contains("duplicate")));

        let mut job2 = job();
        job2.queue.push(42); // unknown index
        assert!(job2
            .check_invariants()
            .iter()
            .any(|v| v.contains("unknown chunk index")));
    }

    #[test]
    fn test_completion_predicate() {
        let mut job = job();
        assert!(!job.is_complete());

        for chunk in job.chunks.values_mut() {
            let sources: Vec<(usize, String)> = (0..chunk.total_lines)
                .map(|i| (chunk.start_line + i, format!("line {i}")))
                .collect();
            for (number, text) in sources {
                chunk.lines.push(LineState::blank(number, text));
            }
            chunk.lines_processed = chunk.lines.len();
            chunk.status = ChunkStatus::Completed;
        }
        job.queue.clear();
        job.active.clear();

        assert!(job.is_complete());
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_retry_pending_line_blocks_completion() {
        let mut job = job();
        for chunk in job.chunks.values_mut() {
            for i in 0..chunk.total_lines {
                chunk
                    .lines
                    .push(LineState::blank(chunk.start_line + i, format!("line {i}")));
            }
            chunk.lines_processed = chunk.lines.len();
            chunk.status = ChunkStatus::Completed;
        }
        job.queue.clear();
        job.active.clear();
        assert!(job.is_complete());

        // A retryably-failed line with budget left holds the job open
        let line = &mut job.chunks.get_mut(&0).unwrap().lines[0];
        line.translation_status = TranslationStatus::Failed;
        line.error_code = Some(LineErrorKind::Timeout);
        line.retry_count = 1;
        assert!(line.is_retry_pending());
        assert!(!job.is_complete());

        // Budget spent: the failure is terminal and the job can settle
        job.chunks.get_mut(&0).unwrap().lines[0].retry_count = MAX_LINE_RETRIES;
        assert!(job.is_complete());
    }

    #[test]
    fn test_reset_failed_lines() {
        let mut job = job();
        let chunk = job.chunks.get_mut(&0).unwrap();
        chunk.status = ChunkStatus::Completed;
        chunk.lines.push(LineState::blank(0, "line one".to_string()));
        let mut failed = LineState::blank(1, "line two".to_string());
        failed.translation_status = TranslationStatus::Failed;
        chunk.lines.push(failed);
        chunk.lines_processed = 2;
        job.queue.retain(|&i| i != 0);

        let cleared = job.reset_failed_lines();
        assert_eq!(cleared, 1);
        assert_eq!(job.chunks[&0].status, ChunkStatus::Queued);
        assert_eq!(job.chunks[&0].lines_processed, 1);
        assert!(job.queue.contains(&0));
    }

    #[test]
    fn test_stats() {
        let mut job = job();
        let chunk = job.chunks.get_mut(&0).unwrap();
        chunk.lines.push(LineState::blank(0, "line one".to_string()));
        chunk.lines_processed = 1;

        let stats = job.stats();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_lines, 6);
        assert_eq!(stats.lines_translated, 1);
        assert!(!stats.has_failures());
        assert!(stats.completion_percent() > 16.0 && stats.completion_percent() < 17.0);
    }
}
