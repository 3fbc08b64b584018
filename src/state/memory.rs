//! In-memory thread-state backend
//!
//! Versioned documents in a mutex-guarded map. The CAS check and the write
//! happen under one lock acquisition, so version conflicts behave exactly
//! like the persistent backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{PatchOutcome, ThreadState, ThreadStateStore, VersionedState};
use crate::error::{EngineError, Result};

/// In-memory thread-state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    threads: Mutex<HashMap<String, (u64, ThreadState)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStateStore for MemoryStateStore {
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedState>> {
        let threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        Ok(threads.get(thread_id).map(|(version, state)| VersionedState {
            state: state.clone(),
            version: *version,
        }))
    }

    async fn create(&self, thread_id: &str, state: ThreadState) -> Result<u64> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        if threads.contains_key(thread_id) {
            return Err(EngineError::Store(format!(
                "thread {thread_id} already exists"
            )));
        }
        threads.insert(thread_id.to_string(), (1, state));
        Ok(1)
    }

    async fn patch(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: ThreadState,
    ) -> Result<PatchOutcome> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = threads.get_mut(thread_id) else {
            return Err(EngineError::ThreadNotFound(thread_id.to_string()));
        };
        if entry.0 != expected_version {
            return Ok(PatchOutcome::Conflict);
        }
        entry.0 += 1;
        entry.1 = state;
        Ok(PatchOutcome::Applied(entry.0))
    }
}
