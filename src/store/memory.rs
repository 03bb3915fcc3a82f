//! In-process counter store.
//!
//! Mirrors the Redis semantics the gateway relies on (INCR, EXPIREAT, ZADD,
//! LPUSH, LTRIM) closely enough for single-instance deployments and tests.

use super::CounterStore;
use crate::clock::Clock;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    available: AtomicBool,
}

#[derive(Default)]
struct State {
    counters: HashMap<String, Counter>,
    sorted: HashMap<String, HashMap<String, u64>>,
    lists: HashMap<String, VecDeque<String>>,
}

struct Counter {
    value: i64,
    expires_at: Option<u64>,
}

impl Counter {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail, as if the store were unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current value of a live counter.
    pub fn counter(&self, key: &str) -> Option<i64> {
        let now = self.clock.unix_secs();
        let state = self.state.lock().ok()?;
        state
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value)
    }

    pub fn expiry(&self, key: &str) -> Option<u64> {
        let state = self.state.lock().ok()?;
        state.counters.get(key).and_then(|c| c.expires_at)
    }

    /// Members of a sorted collection in ascending score order.
    pub fn sorted(&self, collection: &str) -> Vec<(String, u64)> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut entries: Vec<(String, u64)> = state
            .sorted
            .get(collection)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    /// Contents of a list, head first.
    pub fn list(&self, key: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn trim(list: &mut VecDeque<String>, start: isize, stop: isize) {
    let len = list.len() as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        list.clear();
        return;
    }

    list.truncate((stop + 1) as usize);
    list.drain(..start as usize);
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.unix_secs();
        let mut state = self.state()?;

        if state.counters.get(key).is_some_and(|c| c.is_expired(now)) {
            state.counters.remove(key);
        }

        let counter = state.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        counter.value += 1;
        Ok(counter.value)
    }

    async fn expire_at(&self, key: &str, unix_secs: u64) -> Result<(), StoreError> {
        let now = self.clock.unix_secs();
        let mut state = self.state()?;

        // Like EXPIREAT: a timestamp in the past deletes the key.
        if unix_secs <= now {
            state.counters.remove(key);
        } else if let Some(counter) = state.counters.get_mut(key) {
            counter.expires_at = Some(unix_secs);
        }
        Ok(())
    }

    async fn sorted_add(&self, collection: &str, score: u64, member: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .sorted
            .entry(collection.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn list_push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_trim(&self, list: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(entries) = state.lists.get_mut(list) {
            trim(entries, start, stop);
            if entries.is_empty() {
                state.lists.remove(list);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }
}
