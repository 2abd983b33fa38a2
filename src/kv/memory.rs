//! In-process key-value store (single node, tests and development).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{KeyValueStore, KvError, Result};

#[derive(Debug, Clone)]
struct Slot {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Minimum time between two full sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A `DashMap`-backed store.
///
/// Expired keys are dropped when read, and writes sweep the whole map at most
/// once per [`SWEEP_INTERVAL`], so keys that are never read again do not pile
/// up. Uses tokio's clock so paused-time tests can advance past TTLs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Slot>>,
    last_sweep: Arc<Mutex<Option<Instant>>>,
}

fn expiry(now: Instant, ttl_secs: u64) -> Option<Instant> {
    // an expiry past the clock's range never fires
    now.checked_add(Duration::from_secs(ttl_secs))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        let slot = self.inner.get(key).map(|s| s.clone())?;
        if slot.is_live(now) {
            Some(slot)
        } else {
            self.inner.remove_if(key, |_, s| !s.is_live(now));
            None
        }
    }

    /// Drops every expired key and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.inner.len())
    }

    fn maybe_sweep(&self, now: Instant) {
        // a sweep already in progress elsewhere is enough
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if (*last).is_some_and(|at| now.saturating_duration_since(at) < SWEEP_INTERVAL) {
            return;
        }
        *last = Some(now);
        drop(last);
        let removed = self.sweep();
        if removed > 0 {
            debug!(removed, "Swept expired keys");
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .live(key)
            .map(|slot| String::from_utf8_lossy(&slot.value).into_owned()))
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.live(key).map(|slot| slot.value))
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        Ok(match self.live(key) {
            None => -2,
            Some(Slot { expires_at: None, .. }) => -1,
            Some(Slot {
                expires_at: Some(at),
                ..
            }) => at.saturating_duration_since(Instant::now()).as_secs() as i64,
        })
    }

    async fn set_many_with_ttl(&self, entries: &[(String, Bytes)], ttl_secs: u64) -> Result<()> {
        let now = Instant::now();
        self.maybe_sweep(now);
        let expires_at = expiry(now, ttl_secs);
        for (key, value) in entries {
            self.inner.insert(
                key.clone(),
                Slot {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        self.maybe_sweep(now);
        let mut slot = self.inner.entry(key.to_string()).or_insert_with(|| Slot {
            value: Bytes::from_static(b"0"),
            expires_at: None,
        });
        if !slot.is_live(now) {
            *slot = Slot {
                value: Bytes::from_static(b"0"),
                expires_at: None,
            };
        }
        let current: i64 = std::str::from_utf8(&slot.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| KvError::NotAnInteger(key.to_string()))?;
        let next = current + 1;
        slot.value = Bytes::from(next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let now = Instant::now();
        if let Some(mut slot) = self.inner.get_mut(key) {
            if slot.is_live(now) {
                slot.expires_at = expiry(now, ttl_secs);
            }
        }
        Ok(())
    }
}
