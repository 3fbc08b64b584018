//! Key/value store interface: counters, queues, and single-holder locks
//!
//! # Overview
//!
//! The engine treats its KV store as a small external collaborator with redis
//! semantics: atomic counters, TTL expiry, list push/pop, and the two
//! conditional operations the locking discipline is built on —
//! `set_if_absent` (SET NX PX) and `del_if_equals` (conditional delete).
//!
//! # Locking discipline
//!
//! The acquirer generates a fresh unique token, publishes it with
//! `set_if_absent` plus a TTL, and releases only with a conditional delete
//! that matches the token. A holder can therefore never delete a lock that
//! expired and was re-acquired by someone else. While work proceeds, a
//! heartbeat task re-extends the TTL.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

pub mod memory;

#[cfg(feature = "redis-kv")]
pub mod redis;

pub use memory::MemoryKv;

/// Core trait for the KV collaborator
///
/// Implementations must make `incr`, `set_if_absent`, and `del_if_equals`
/// atomic with respect to concurrent callers.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment a counter, creating it at 1
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set or refresh a key's TTL; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Read a key's value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key unconditionally
    async fn del(&self, key: &str) -> Result<()>;

    /// Push a value onto the head of a list
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Pop a value off the tail of a list
    async fn rpop(&self, key: &str) -> Result<Option<String>>;

    /// Set `key = value` with a TTL only if the key is absent
    ///
    /// Returns true when the write happened (the caller now holds the key).
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `expected`
    ///
    /// Returns true when the delete happened.
    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool>;
}

/// A held single-holder lock
///
/// Dropping the guard without calling `release` leaves the key to expire via
/// its TTL; the heartbeat task (if started) stops when the guard is released
/// or dropped.
pub struct LockGuard {
    kv: Arc<dyn KvStore>,
    key: String,
    token: String,
    ttl: Duration,
    heartbeat: Option<HeartbeatHandle>,
}

struct HeartbeatHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LockGuard {
    /// Try to acquire `key` once with a fresh token
    pub async fn acquire(
        kv: Arc<dyn KvStore>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if kv.set_if_absent(key, &token, ttl).await? {
            debug!(key, "lock acquired");
            Ok(Some(LockGuard {
                kv,
                key: key.to_string(),
                token,
                ttl,
                heartbeat: None,
            }))
        } else {
            Ok(None)
        }
    }

    /// Acquire with bounded retries, exponential backoff, and jitter
    ///
    /// Gives up after `max_attempts` tries or when the accumulated wait would
    /// exceed `max_wait`, whichever comes first.
    pub async fn acquire_with_retry(
        kv: Arc<dyn KvStore>,
        key: &str,
        ttl: Duration,
        max_attempts: u32,
        base_delay: Duration,
        max_wait: Duration,
    ) -> Result<Option<LockGuard>> {
        let mut waited = Duration::ZERO;
        for attempt in 0..max_attempts {
            if let Some(guard) = Self::acquire(Arc::clone(&kv), key, ttl).await? {
                return Ok(Some(guard));
            }
            if attempt + 1 == max_attempts {
                break;
            }

            let backoff = base_delay.saturating_mul(2u32.saturating_pow(attempt));
            let jitter_ms = rand::rng().random_range(0..=backoff.as_millis().max(1) as u64 / 4);
            let delay = backoff + Duration::from_millis(jitter_ms);

            if waited + delay > max_wait {
                break;
            }
            waited += delay;
            debug!(key, attempt, delay_ms = delay.as_millis() as u64, "lock busy, backing off");
            tokio::time::sleep(delay).await;
        }
        Ok(None)
    }

    /// The token this holder published
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The lock key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Spawn a heartbeat task that re-extends the TTL every `interval`
    ///
    /// Idempotent: a second call replaces the previous heartbeat.
    pub fn start_heartbeat(&mut self, interval: Duration) {
        self.stop_heartbeat_task();

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let kv = Arc::clone(&self.kv);
        let key = self.key.clone();
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match kv.expire(&key, ttl).await {
                            Ok(true) => debug!(key, "lock heartbeat extended TTL"),
                            Ok(false) => {
                                warn!(key, "lock heartbeat found key gone, stopping");
                                break;
                            }
                            Err(e) => warn!(key, error = %e, "lock heartbeat failed"),
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        self.heartbeat = Some(HeartbeatHandle { stop_tx, task });
    }

    fn stop_heartbeat_task(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            let _ = hb.stop_tx.send(());
            hb.task.abort();
        }
    }

    /// Stop the heartbeat and release the lock if this holder still owns it
    ///
    /// Returns true when the conditional delete happened; false means the
    /// lock expired and may now belong to another holder.
    pub async fn release(mut self) -> Result<bool> {
        self.stop_heartbeat_task();
        let released = self.kv.del_if_equals(&self.key, &self.token).await?;
        if released {
            debug!(key = %self.key, "lock released");
        } else {
            warn!(key = %self.key, "lock token no longer current at release");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_heartbeat_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let guard = LockGuard::acquire(Arc::clone(&kv), "tick:t1", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        // Second holder is rejected while the lock is held
        let second = LockGuard::acquire(Arc::clone(&kv), "tick:t1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(second.is_none());

        assert!(guard.release().await.unwrap());

        // A fresh acquire gets a different token
        let guard2 = LockGuard::acquire(Arc::clone(&kv), "tick:t1", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("re-acquire after release");
        assert!(guard2.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_tokens_are_unique_across_acquisitions() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let g1 = LockGuard::acquire(Arc::clone(&kv), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        let tok1 = g1.token().to_string();
        g1.release().await.unwrap();

        let g2 = LockGuard::acquire(Arc::clone(&kv), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(tok1, g2.token());
        g2.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_token_checked() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let guard = LockGuard::acquire(Arc::clone(&kv), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        // Simulate expiry plus takeover by another holder
        kv.del("k").await.unwrap();
        kv.set_if_absent("k", "other-token", Duration::from_secs(5))
            .await
            .unwrap();

        // Release must not delete the other holder's lock
        assert!(!guard.release().await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("other-token"));
    }

    #[tokio::test]
    async fn test_acquire_with_retry_waits_out_holder() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let guard = LockGuard::acquire(Arc::clone(&kv), "k", Duration::from_millis(40))
            .await
            .unwrap()
            .unwrap();
        // Holder's TTL lapses while the second acquirer is backing off
        drop(guard);

        let retried = LockGuard::acquire_with_retry(
            Arc::clone(&kv),
            "k",
            Duration::from_secs(5),
            6,
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(retried.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_extends_ttl() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut guard = LockGuard::acquire(Arc::clone(&kv), "k", Duration::from_millis(80))
            .await
            .unwrap()
            .unwrap();
        guard.start_heartbeat(Duration::from_millis(25));

        // Without the heartbeat the key would be gone well before 200ms
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(kv.get("k").await.unwrap().is_some());
        assert!(guard.release().await.unwrap());
        assert!(kv.get("k").await.unwrap().is_none());
    }
}
