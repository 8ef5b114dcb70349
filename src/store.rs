use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use crate::error::{Error, Result};

type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

//Writes between two sweeps of expired keys
const SWEEP_INTERVAL: usize = 1024;

/// The primitives a time series needs from an ordered key-value store.
///
/// They mirror Redis' `INCR`, `ZADD`, `ZCOUNT` and `EXPIRE`. Implementations are
/// shared between tasks, so every method takes `&self`.
///
/// # Methods
/// - `incr`: Atomically increment the integer at `key`, starting from 0.
/// - `zadd`: Add `member` to the sorted set at `key`, or update its score.
/// - `zcount`: Count members of the sorted set whose score is in `[min, max]`.
/// - `expire`: Set or refresh the time-to-live of `key`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Increments the integer stored at `key` and returns the new value.
    ///
    /// Concurrent callers on the same key must never observe the same value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Adds `member` with `score` to the sorted set at `key`.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    /// Counts members of the sorted set at `key` with `min <= score <= max`.
    /// A missing key counts as an empty set.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Deletes `key` after `seconds` without another refresh.
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    #[inline]
    async fn incr(&self, key: &str) -> Result<i64> {
        (**self).incr(key).await
    }

    #[inline]
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        (**self).zadd(key, score, member).await
    }

    #[inline]
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        (**self).zcount(key, min, max).await
    }

    #[inline]
    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        (**self).expire(key, seconds).await
    }
}

enum Value {
    Int(i64),
    SortedSet(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    #[inline]
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// An in-process `Store` with Redis-like semantics.
///
/// Keys are kept in a `DashMap` and expire lazily: an entry past its deadline is
/// dropped when it is next touched. Bucket keys are rarely touched again once
/// their time has passed, so every `SWEEP_INTERVAL` writes the whole map is
/// swept as well. Deadlines use `tokio::time::Instant`, so a paused tokio clock
/// controls expiry.
///
/// Cloning a `MemStore` yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemStore {
    entries: Arc<DashMap<String, Entry>>,
    writes: Arc<AtomicUsize>,
}

impl MemStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have not expired.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `key` exists and has not expired.
    pub fn contains_key(&self, key: &str) -> bool {
        self.evict(key);
        self.entries.contains_key(key)
    }

    /// Current value of the counter at `key`.
    pub fn counter(&self, key: &str) -> Option<i64> {
        self.evict(key);
        let entry = self.entries.get(key)?;
        match entry.value {
            Value::Int(n) => Some(n),
            Value::SortedSet(_) => None,
        }
    }

    /// Members of the sorted set at `key`, ordered by score then member name.
    pub fn members(&self, key: &str) -> Vec<(String, f64)> {
        self.evict(key);
        let mut members = match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::SortedSet(set) => set
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect::<Vec<_>>(),
                Value::Int(_) => Vec::new(),
            },
            None => Vec::new(),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    /// Remaining time-to-live of `key`, `None` if it is missing or never expires.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.evict(key);
        let entry = self.entries.get(key)?;
        match entry.expires_at {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }
    }

    /// Drops every expired key and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    // Removes `key` if it has expired. No guard on the map may be held here.
    #[inline]
    fn evict(&self, key: &str) -> Instant {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        now
    }

    fn maybe_sweep(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("memstore purged {} expired keys", purged);
            }
        }
    }

    // Runs `f` on the live entry at `key`, creating it with `init` when it is
    // missing or expired. The shard lock is held for the whole call.
    #[inline]
    fn with_entry<T, F>(&self, key: &str, init: fn() -> Value, f: F) -> Result<T>
    where
        F: FnOnce(&mut Entry) -> Result<T>,
    {
        let now = Instant::now();
        let res = {
            let mut entry = self
                .entries
                .entry(key.to_owned())
                .or_insert_with(|| Entry::new(init()));
            if entry.is_expired(now) {
                *entry = Entry::new(init());
            }
            f(entry.value_mut())
        };
        self.maybe_sweep();
        res
    }
}

#[async_trait]
impl Store for MemStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        self.with_entry(
            key,
            || Value::Int(0),
            |entry| match &mut entry.value {
                Value::Int(n) => {
                    *n = n.checked_add(1).ok_or(Error::NotInteger)?;
                    Ok(*n)
                }
                Value::SortedSet(_) => Err(Error::WrongType),
            },
        )
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        if score.is_nan() {
            return Err(Error::from("score is not a valid float"));
        }
        self.with_entry(
            key,
            || Value::SortedSet(HashMap::new()),
            |entry| match &mut entry.value {
                Value::SortedSet(set) => {
                    set.insert(member.to_owned(), score);
                    Ok(())
                }
                Value::Int(_) => Err(Error::WrongType),
            },
        )
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.evict(key);
        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::SortedSet(set) => Ok(set
                    .values()
                    .filter(|score| min <= **score && **score <= max)
                    .count() as u64),
                Value::Int(_) => Err(Error::WrongType),
            },
            None => Ok(0),
        }
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let now = self.evict(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = now.checked_add(Duration::from_secs(seconds));
        }
        Ok(())
    }
}
