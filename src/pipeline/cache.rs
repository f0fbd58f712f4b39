//! Verdict cache: fingerprint-keyed memo with a time-to-live.
//!
//! Entries older than the TTL are never returned, whether or not the
//! background sweep has purged them yet. Concurrent misses on the same
//! fingerprint share a single resolution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::debug;

use crate::pipeline::types::{Fingerprint, Verdict};

/// How often the sweep task purges expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry {
    verdict: Verdict,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Resolutions currently running, keyed by the fingerprint they fill.
    in_flight: HashMap<Fingerprint, Arc<OnceCell<Verdict>>>,
}

impl CacheState {
    /// Live entry for `fingerprint`. An expired entry is dropped on the way.
    fn live(&mut self, fingerprint: &Fingerprint, ttl: Duration) -> Option<Verdict> {
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < ttl => {
                return Some(entry.verdict.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(fingerprint);
        }
        None
    }

    fn insert(&mut self, fingerprint: Fingerprint, verdict: Verdict) {
        self.entries.insert(
            fingerprint,
            CacheEntry {
                verdict,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// Shared verdict cache. All access is serialized through one mutex.
pub struct VerdictCache {
    state: Mutex<CacheState>,
    ttl: Duration,
}

impl VerdictCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheState::default()),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry. Expired entries are dropped on the way.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Verdict> {
        self.state.lock().await.live(fingerprint, self.ttl)
    }

    /// Insert or replace an entry, restarting its TTL.
    pub async fn put(&self, fingerprint: Fingerprint, verdict: Verdict) {
        self.state.lock().await.insert(fingerprint, verdict);
    }

    /// Return the live entry, or run `resolve` to produce one.
    ///
    /// Callers that miss on a fingerprint while another caller is already
    /// resolving it wait for that result instead of resolving again. The
    /// result is stored unless it is `Unknown` and `store_unknown` is off.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        store_unknown: bool,
        resolve: F,
    ) -> Verdict
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Verdict>,
    {
        let cell = {
            let mut state = self.state.lock().await;
            if let Some(verdict) = state.live(fingerprint, self.ttl) {
                return verdict;
            }
            Arc::clone(state.in_flight.entry(fingerprint.clone()).or_default())
        };

        cell.get_or_init(move || async move {
            let verdict = resolve().await;
            let mut state = self.state.lock().await;
            state.in_flight.remove(fingerprint);
            if store_unknown || !verdict.is_unknown() {
                state.insert(fingerprint.clone(), verdict.clone());
            }
            verdict
        })
        .await
        .clone()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - state.entries.len()
    }

    /// Entries currently stored, expired or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

/// Spawn a background task that purges expired entries every 60s.
pub fn spawn_sweep_task(cache: Arc<VerdictCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired verdicts");
            }
        }
    })
}
