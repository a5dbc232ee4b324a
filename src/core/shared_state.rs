//! Run-scoped named slots shared by every node of a run, nested bodies included.
//!
//! Each slot sits behind its own mutex, so concurrent writers to one name are
//! serialized while writers to different names never contend. Mutating calls
//! take the caller's cancellation token and re-check it while holding the slot
//! lock, which keeps a cancelled branch from writing after it lost a race.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

type Slots<T> = DashMap<String, Arc<Mutex<T>>>;

#[derive(Debug, Default)]
pub struct SharedState {
    variables: Slots<Option<Value>>,
    accumulators: Slots<Vec<Value>>,
    counters: Slots<i64>,
    cache: Slots<Option<CacheEntry>>,
}

/// Point-in-time copy of every namespace, returned with the run result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub variables: BTreeMap<String, Value>,
    pub accumulators: BTreeMap<String, Vec<Value>>,
    pub counters: BTreeMap<String, i64>,
    pub cache: BTreeMap<String, Value>,
}

fn slot<T: Default>(map: &Slots<T>, name: &str) -> Arc<Mutex<T>> {
    if let Some(existing) = map.get(name) {
        return Arc::clone(existing.value());
    }
    Arc::clone(map.entry(name.to_string()).or_default().value())
}

fn ensure_live(token: &CancellationToken) -> Result<(), NodeError> {
    if token.is_cancelled() {
        Err(NodeError::Cancelled)
    } else {
        Ok(())
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- variables ---

    pub fn variable_get(&self, name: &str) -> Option<Value> {
        self.variables.get(name).and_then(|s| s.lock().clone())
    }

    pub fn variable_set(
        &self,
        name: &str,
        value: Value,
        token: &CancellationToken,
    ) -> Result<Option<Value>, NodeError> {
        let slot = slot(&self.variables, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        Ok(guard.replace(value))
    }

    pub fn variable_delete(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<Option<Value>, NodeError> {
        let slot = slot(&self.variables, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        Ok(guard.take())
    }

    // --- accumulators ---

    /// Append and return the new length.
    pub fn accumulator_append(
        &self,
        name: &str,
        value: Value,
        token: &CancellationToken,
    ) -> Result<usize, NodeError> {
        let slot = slot(&self.accumulators, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        guard.push(value);
        Ok(guard.len())
    }

    pub fn accumulator_get(&self, name: &str) -> Vec<Value> {
        self.accumulators
            .get(name)
            .map(|s| s.lock().clone())
            .unwrap_or_default()
    }

    /// Clear the accumulator and return what it held.
    pub fn accumulator_reset(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, NodeError> {
        let slot = slot(&self.accumulators, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        Ok(std::mem::take(&mut *guard))
    }

    // --- counters ---

    /// Add `delta` atomically and return the new value.
    pub fn counter_add(
        &self,
        name: &str,
        delta: i64,
        token: &CancellationToken,
    ) -> Result<i64, NodeError> {
        let slot = slot(&self.counters, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        *guard = guard.saturating_add(delta);
        Ok(*guard)
    }

    pub fn counter_get(&self, name: &str) -> i64 {
        self.counters.get(name).map(|s| *s.lock()).unwrap_or(0)
    }

    pub fn counter_reset(
        &self,
        name: &str,
        value: i64,
        token: &CancellationToken,
    ) -> Result<i64, NodeError> {
        let slot = slot(&self.counters, name);
        let mut guard = slot.lock();
        ensure_live(token)?;
        *guard = value;
        Ok(value)
    }

    // --- cache ---

    /// Live entry for `key`; expired entries are evicted on read.
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        let slot = Arc::clone(self.cache.get(key)?.value());
        let mut guard = slot.lock();
        let now = Instant::now();
        match guard.as_ref() {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    pub fn cache_set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<(), NodeError> {
        let slot = slot(&self.cache, key);
        let mut guard = slot.lock();
        ensure_live(token)?;
        *guard = Some(CacheEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        });
        Ok(())
    }

    /// Returns whether a live entry was removed.
    pub fn cache_invalidate(&self, key: &str, token: &CancellationToken) -> Result<bool, NodeError> {
        let Some(slot) = self.cache.get(key).map(|s| Arc::clone(s.value())) else {
            ensure_live(token)?;
            return Ok(false);
        };
        let mut guard = slot.lock();
        ensure_live(token)?;
        let now = Instant::now();
        Ok(guard.take().is_some_and(|e| e.is_live(now)))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let now = Instant::now();
        let mut snap = StateSnapshot::default();
        for entry in self.variables.iter() {
            if let Some(v) = entry.value().lock().clone() {
                snap.variables.insert(entry.key().clone(), v);
            }
        }
        for entry in self.accumulators.iter() {
            snap.accumulators
                .insert(entry.key().clone(), entry.value().lock().clone());
        }
        for entry in self.counters.iter() {
            snap.counters.insert(entry.key().clone(), *entry.value().lock());
        }
        for entry in self.cache.iter() {
            if let Some(e) = entry.value().lock().as_ref() {
                if e.is_live(now) {
                    snap.cache.insert(entry.key().clone(), e.value.clone());
                }
            }
        }
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variables() {
        let state = SharedState::new();
        let token = CancellationToken::new();
        assert_eq!(state.variable_get("x"), None);
        assert_eq!(state.variable_set("x", json!(1), &token).unwrap(), None);
        assert_eq!(state.variable_set("x", json!(2), &token).unwrap(), Some(json!(1)));
        assert_eq!(state.variable_get("x"), Some(json!(2)));
        assert_eq!(state.variable_delete("x", &token).unwrap(), Some(json!(2)));
        assert_eq!(state.variable_get("x"), None);
    }

    #[test]
    fn test_cancelled_token_blocks_writes() {
        let state = SharedState::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            state.counter_add("c", 1, &token),
            Err(NodeError::Cancelled)
        ));
        assert!(state.accumulator_append("a", json!(1), &token).is_err());
        assert!(state.cache_set("k", json!(1), None, &token).is_err());
        assert_eq!(state.counter_get("c"), 0);
        assert!(state.accumulator_get("a").is_empty());
        assert_eq!(state.cache_get("k"), None);
    }

    #[test]
    fn test_accumulator() {
        let state = SharedState::new();
        let token = CancellationToken::new();
        assert_eq!(state.accumulator_append("log", json!("a"), &token).unwrap(), 1);
        assert_eq!(state.accumulator_append("log", json!("b"), &token).unwrap(), 2);
        assert_eq!(state.accumulator_reset("log", &token).unwrap(), vec![json!("a"), json!("b")]);
        assert!(state.accumulator_get("log").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl() {
        let state = SharedState::new();
        let token = CancellationToken::new();
        state
            .cache_set("k", json!("v"), Some(Duration::from_millis(100)), &token)
            .unwrap();
        assert_eq!(state.cache_get("k"), Some(json!("v")));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(state.cache_get("k"), None);
        assert!(!state.cache_invalidate("k", &token).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_counter_increments_are_atomic() {
        let state = Arc::new(SharedState::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                for _ in 0..100 {
                    state.counter_add("hits", 1, &token).unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(state.counter_get("hits"), 1600);
    }

    #[test]
    fn test_snapshot() {
        let state = SharedState::new();
        let token = CancellationToken::new();
        state.variable_set("v", json!(true), &token).unwrap();
        state.counter_add("c", 3, &token).unwrap();
        state.cache_set("k", json!(1), None, &token).unwrap();
        let snap = state.snapshot();
        assert_eq!(snap.variables["v"], json!(true));
        assert_eq!(snap.counters["c"], 3);
        assert_eq!(snap.cache["k"], json!(1));
    }
}
