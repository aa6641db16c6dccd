//! Expiring key/value backends shared by sessions and one-time tokens

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Storage used by [`crate::session::SessionStore`] and
/// [`crate::one_time::OneTimeTokenService`].
///
/// `put` must write value and expiry together, and `take` must read and
/// delete in one step so a key can be observed by at most one caller.
/// `replace` only writes over a live key, so a refresh can never resurrect
/// a deleted one.
pub trait KvBackend: Send + Sync {
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, BackendError>>;

    /// Overwrite value and expiry of an existing live key (`SET XX`).
    /// Returns `false` and writes nothing when the key is absent.
    fn replace<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, BackendError>>;

    /// Remove a key, returning whether a live value existed
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, BackendError>>;

    /// Atomic get-and-delete
    fn take<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, BackendError>>;

    /// Number of live keys starting with `prefix`
    fn count_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<usize, BackendError>>;

    /// Short storage label for stats output
    fn kind(&self) -> &'static str;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Single-process backend
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_live(now) {
                true
            } else {
                removed += 1;
                false
            }
        });
        removed
    }

    /// Purge periodically until the backend is dropped
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(backend) = weak.upgrade() else {
                    break;
                };
                let removed = backend.purge_expired();
                if removed > 0 {
                    tracing::debug!("Purged {} expired entries", removed);
                }
            }
        })
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
            // Expired, remove it
            drop(entry);
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        None
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Box::pin(futures::future::ready(Ok(())))
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, BackendError>> {
        Box::pin(futures::future::ready(Ok(self.read(key))))
    }

    fn replace<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, BackendError>> {
        let now = Instant::now();
        let replaced = match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.value = value;
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        };
        Box::pin(futures::future::ready(Ok(replaced)))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, BackendError>> {
        let now = Instant::now();
        let existed = self
            .entries
            .remove(key)
            .map(|(_, entry)| entry.is_live(now))
            .unwrap_or(false);
        Box::pin(futures::future::ready(Ok(existed)))
    }

    fn take<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, BackendError>> {
        let now = Instant::now();
        let value = self
            .entries
            .remove(key)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.value);
        Box::pin(futures::future::ready(Ok(value)))
    }

    fn count_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<usize, BackendError>> {
        let now = Instant::now();
        let count = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .count();
        Box::pin(futures::future::ready(Ok(count)))
    }

    fn kind(&self) -> &'static str {
        "in-memory"
    }
}
