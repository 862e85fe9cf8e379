//! In-process [`KvBackend`] for development and tests.
//!
//! Mirrors the Redis semantics the session store relies on: `SET` clears any
//! TTL, `EXPIREAT` on a missing key reports `false`, an expiry in the past
//! deletes the key, and a batch runs under a single lock acquisition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;

use super::{BatchOp, BatchReply, KvBackend};
use crate::error::Error;

/// Batched commands between sweeps of expired keys.
const SWEEP_EVERY: u64 = 256;

#[derive(Debug)]
struct Entry {
    value: String,
    expire_at: Option<i64>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    clock_offset: i64,
    operations: u64,
    since_sweep: u64,
}

impl Inner {
    fn now(&self) -> i64 {
        OffsetDateTime::now_utc()
            .unix_timestamp()
            .saturating_add(self.clock_offset)
    }

    /// Drop every expired key, including ones nobody reads again.
    fn sweep(&mut self) {
        let now = self.now();
        self.entries
            .retain(|_, e| e.expire_at.is_none_or(|at| at > now));
        self.since_sweep = 0;
    }

    /// Drop `key` if its expiry has passed; returns the live entry, if any.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now();
        if self
            .entries
            .get(key)
            .and_then(|e| e.expire_at)
            .is_some_and(|at| at <= now)
        {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn apply(&mut self, op: &BatchOp) -> BatchReply {
        self.operations += 1;
        match op {
            BatchOp::Set { key, value } => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        expire_at: None,
                    },
                );
                BatchReply::Ok
            }
            BatchOp::ExpireAt { key, at } => {
                let now = self.now();
                let Some(entry) = self.live(key) else {
                    return BatchReply::Applied(false);
                };
                entry.expire_at = Some(*at);
                if *at <= now {
                    self.entries.remove(key);
                }
                BatchReply::Applied(true)
            }
            BatchOp::Del { key } => {
                let removed = self.live(key).is_some();
                self.entries.remove(key);
                BatchReply::Removed(u64::from(removed))
            }
        }
    }
}

/// Shared in-memory key-value map. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move this backend's clock forward, expiring keys as Redis would.
    pub fn advance(&self, by: Duration) {
        let secs = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        let mut inner = self.lock();
        inner.clock_offset = inner.clock_offset.saturating_add(secs);
    }

    /// Number of commands executed so far, batched or not.
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.lock().operations
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut inner = self.lock();
        inner.sweep();
        inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a live value without counting it as an operation.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().live(key).map(|e| e.value.clone())
    }

    /// Absolute expiry of a live key, if it has one.
    #[must_use]
    pub fn expiry_of(&self, key: &str) -> Option<i64> {
        self.lock().live(key).and_then(|e| e.expire_at)
    }
}

impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut inner = self.lock();
        inner.operations += 1;
        Ok(inner.live(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<bool, Error> {
        let reply = self.lock().apply(&BatchOp::set(key, value));
        Ok(reply == BatchReply::Ok)
    }

    async fn expire_at(&self, key: &str, at: i64) -> Result<bool, Error> {
        let reply = self.lock().apply(&BatchOp::expire_at(key, at));
        Ok(reply == BatchReply::Applied(true))
    }

    async fn del(&self, key: &str) -> Result<u64, Error> {
        match self.lock().apply(&BatchOp::del(key)) {
            BatchReply::Removed(n) => Ok(n),
            _ => Ok(0),
        }
    }

    async fn batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchReply>, Error> {
        let mut inner = self.lock();
        let replies: Vec<BatchReply> = ops.iter().map(|op| inner.apply(op)).collect();
        inner.since_sweep += ops.len() as u64;
        if inner.since_sweep >= SWEEP_EVERY {
            inner.sweep();
        }
        Ok(replies)
    }

    fn now(&self) -> i64 {
        self.lock().now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let backend = MemoryBackend::new();
        assert!(backend.set("k", "v").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expire_at_on_missing_key_is_false() {
        let backend = MemoryBackend::new();
        assert!(!backend.expire_at("missing", backend.now() + 10).await.unwrap());
    }

    #[tokio::test]
    async fn expire_at_in_the_past_deletes() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        assert!(backend.expire_at("k", backend.now() - 1).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_clears_previous_expiry() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        backend.expire_at("k", backend.now() + 10).await.unwrap();
        backend.set("k", "v2").await.unwrap();
        assert_eq!(backend.expiry_of("k"), None);
    }

    #[tokio::test]
    async fn advance_expires_keys() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        backend.expire_at("k", backend.now() + 60).await.unwrap();

        backend.advance(Duration::from_secs(59));
        assert!(backend.peek("k").is_some());
        backend.advance(Duration::from_secs(1));
        assert!(backend.peek("k").is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn del_counts_only_live_keys() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        backend.expire_at("k", backend.now() + 1).await.unwrap();
        backend.advance(Duration::from_secs(5));
        assert_eq!(backend.del("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_replies_in_command_order() {
        let backend = MemoryBackend::new();
        let at = backend.now() + 100;
        let replies = backend
            .batch(&[
                BatchOp::set("a", "1"),
                BatchOp::expire_at("a", at),
                BatchOp::expire_at("b", at),
                BatchOp::del("a"),
                BatchOp::del("a"),
            ])
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![
                BatchReply::Ok,
                BatchReply::Applied(true),
                BatchReply::Applied(false),
                BatchReply::Removed(1),
                BatchReply::Removed(0),
            ]
        );
    }

    #[tokio::test]
    async fn operations_are_counted() {
        let backend = MemoryBackend::new();
        backend.get("k").await.unwrap();
        backend
            .batch(&[BatchOp::set("k", "v"), BatchOp::del("k")])
            .await
            .unwrap();
        let _ = backend.peek("k");
        assert_eq!(backend.operations(), 3);
    }

    #[tokio::test]
    async fn clones_share_data() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        backend.set("k", "v").await.unwrap();
        assert_eq!(other.peek("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn batches_sweep_keys_nobody_reads_again() {
        let backend = MemoryBackend::new();
        let at = backend.now() + 10;
        backend
            .batch(&[BatchOp::set("ticket:old", "session:gone"), BatchOp::expire_at("ticket:old", at)])
            .await
            .unwrap();
        backend.advance(Duration::from_secs(11));

        for _ in 0..SWEEP_EVERY {
            backend.batch(&[BatchOp::set("k", "v")]).await.unwrap();
        }
        assert!(!backend.lock().entries.contains_key("ticket:old"));
        assert!(backend.lock().entries.contains_key("k"));
    }

    #[tokio::test]
    async fn advancing_past_the_end_of_time_saturates() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").await.unwrap();
        backend.expire_at("k", backend.now() + 60).await.unwrap();

        backend.advance(Duration::MAX);
        backend.advance(Duration::MAX);
        assert_eq!(backend.now(), i64::MAX);
        assert!(backend.peek("k").is_none());
    }
}
