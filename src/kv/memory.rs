//! In-memory KV backend
//!
//! Single-process implementation with TTL expiry, used by tests and
//! single-node deployments. Expiry is enforced lazily on access, with a full
//! sweep every 256 operations so abandoned keys do not accumulate.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::KvStore;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory KV store with TTL expiry
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    op_count: Mutex<u64>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily purge the touched key; every 256 ops, sweep the whole map
    fn housekeeping(&self, map: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }

        let mut count = self.op_count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        if *count % 256 == 0 {
            map.retain(|_, e| !e.is_expired(now));
        }
    }

    fn with_map<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.housekeeping(&mut map, key);
        f(&mut map)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr(&self, key: &str) -> Result<i64> {
        self.with_map(key, |map| match map.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::Scalar(s) => {
                    let n: i64 = s
                        .parse()
                        .map_err(|_| EngineError::Store(format!("INCR on non-integer key {key}")))?;
                    let next = n + 1;
                    *s = next.to_string();
                    Ok(next)
                }
                Value::List(_) => Err(EngineError::Store(format!("INCR on list key {key}"))),
            },
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Scalar("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.with_map(key, |map| match map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_map(key, |map| match map.get(key) {
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(EngineError::Store(format!("GET on list key {key}"))),
            None => Ok(None),
        })
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_map(key, |map| {
            map.remove(key);
            Ok(())
        })
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.with_map(key, |map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(())
                }
                Value::Scalar(_) => Err(EngineError::Store(format!("LPUSH on scalar key {key}"))),
            }
        })
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.with_map(key, |map| {
            let Some(entry) = map.get_mut(key) else {
                return Ok(None);
            };
            match &mut entry.value {
                Value::List(list) => {
                    let popped = list.pop_back();
                    if list.is_empty() {
                        map.remove(key);
                    }
                    Ok(popped)
                }
                Value::Scalar(_) => Err(EngineError::Store(format!("RPOP on scalar key {key}"))),
            }
        })
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.with_map(key, |map| {
            if map.contains_key(key) {
                return Ok(false);
            }
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Scalar(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.with_map(key, |map| match map.get(key) {
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) if s == expected => {
                map.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        })
    }
}
