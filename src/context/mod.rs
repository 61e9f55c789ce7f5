//! Per-adapter cached provider context.
//!
//! Each adapter instance owns one [`ContextSlot`]. The slot holds a single
//! immutable snapshot that is replaced wholesale; concurrent cold-cache calls
//! may both probe and the last writer wins. No lock is held across an await.

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::BridgeError;

struct Entry<T> {
    fingerprint: String,
    value: Arc<T>,
    fetched_at: Instant,
    stale: bool,
}

/// Result of looking up the slot for one credential.
pub enum Cached<T> {
    Fresh(Arc<T>),
    /// Invalidated or past its TTL; still usable as a last resort.
    Stale(Arc<T>),
    Missing,
}

/// Single-slot cache of provider context keyed by credential fingerprint.
pub struct ContextSlot<T> {
    slot: RwLock<Option<Arc<Entry<T>>>>,
    ttl: Option<Duration>,
}

impl<T> Default for ContextSlot<T> {
    fn default() -> Self {
        Self {
            slot: RwLock::new(None),
            ttl: None,
        }
    }
}

impl<T> ContextSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `ttl` are treated as stale.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl: Some(ttl),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Arc<Entry<T>>>> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Arc<Entry<T>>>> {
        self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lookup(&self, fingerprint: &str) -> Cached<T> {
        let guard = self.read();
        match guard.as_ref() {
            Some(entry) if entry.fingerprint == fingerprint => {
                let expired = self
                    .ttl
                    .is_some_and(|ttl| entry.fetched_at.elapsed() >= ttl);
                if entry.stale || expired {
                    Cached::Stale(entry.value.clone())
                } else {
                    Cached::Fresh(entry.value.clone())
                }
            }
            _ => Cached::Missing,
        }
    }

    /// Replace the slot with a freshly fetched value.
    pub fn store(&self, fingerprint: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.write() = Some(Arc::new(Entry {
            fingerprint: fingerprint.to_string(),
            value: value.clone(),
            fetched_at: Instant::now(),
            stale: false,
        }));
        value
    }

    /// Mark the cached value stale so the next call refetches it.
    ///
    /// The old value is kept as a fallback for a failing refetch.
    pub fn invalidate(&self) {
        let mut guard = self.write();
        if let Some(entry) = guard.take() {
            *guard = Some(Arc::new(Entry {
                fingerprint: entry.fingerprint.clone(),
                value: entry.value.clone(),
                fetched_at: entry.fetched_at,
                stale: true,
            }));
        }
    }

    /// Derive a new snapshot from the cached one (e.g. a rotated continuation
    /// token). No-op unless the slot belongs to `fingerprint`.
    pub fn update(&self, fingerprint: &str, f: impl FnOnce(&T) -> T) -> bool {
        let mut guard = self.write();
        let Some(entry) = guard.as_ref() else {
            return false;
        };
        if entry.fingerprint != fingerprint {
            return false;
        }
        let next = Entry {
            fingerprint: entry.fingerprint.clone(),
            value: Arc::new(f(entry.value.as_ref())),
            fetched_at: entry.fetched_at,
            stale: entry.stale,
        };
        *guard = Some(Arc::new(next));
        true
    }

    /// Return the fresh cached value, or fetch and cache a new one.
    ///
    /// A failing fetch falls back to a stale value for the same credential
    /// when one exists.
    pub async fn get_or_fetch<F, Fut>(&self, fingerprint: &str, fetch: F) -> Result<Arc<T>, BridgeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let stale = match self.lookup(fingerprint) {
            Cached::Fresh(value) => return Ok(value),
            Cached::Stale(value) => Some(value),
            Cached::Missing => None,
        };

        debug!(has_stale = stale.is_some(), "Fetching provider context");
        match fetch().await {
            Ok(value) => Ok(self.store(fingerprint, value)),
            Err(err) => match stale {
                Some(value) => {
                    warn!(error = %err, "Context refresh failed; reusing stale context");
                    Ok(value)
                }
                None => Err(err),
            },
        }
    }
}
