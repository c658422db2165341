use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::{debug, trace};

use crate::error::AppResult;
use crate::location::Location;
use crate::storage::FileDetails;

/// A rendered index document with the details it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub details: FileDetails,
    pub content: Bytes,
}

type CacheKey = (String, Location);

/// Cache generation observed when a document started being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Cache of generated index documents, keyed by repository and location.
///
/// Every invalidation bumps a generation counter. A document generated while the
/// counter moved is returned to its caller but never cached, and generators can
/// check the same counter before persisting what they produced.
pub struct MetadataCache {
    entries: Cache<CacheKey, Arc<CachedIndex>>,
    generation: AtomicU64,
    /// Orders inserts against invalidations
    writes: Mutex<()>,
}

impl MetadataCache {
    /// Cache holding at most `max_entries` documents, least recently used dropped first.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries.max(1) as u64)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            generation: AtomicU64::new(0),
            writes: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(repository: &str, location: &Location) -> CacheKey {
        (repository.to_string(), location.clone())
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::SeqCst))
    }

    /// Whether nothing was invalidated since `generation` was observed.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation() == generation
    }

    /// Cached document for `location`, if any.
    pub fn get(&self, repository: &str, location: &Location) -> Option<Arc<CachedIndex>> {
        self.entries.get(&Self::key(repository, location))
    }

    /// Return the cached document or generate, cache and return a new one.
    ///
    /// `generate` receives the generation it started at.
    pub async fn resolve<F, Fut>(
        &self,
        repository: &str,
        location: &Location,
        generate: F,
    ) -> AppResult<Arc<CachedIndex>>
    where
        F: FnOnce(Generation) -> Fut,
        Fut: Future<Output = AppResult<CachedIndex>>,
    {
        let key = Self::key(repository, location);
        let started_at = self.generation();
        if let Some(value) = self.entries.get(&key) {
            trace!(repository = %repository, location = %location, "Index cache hit");
            return Ok(value);
        }

        let value = Arc::new(generate(started_at).await?);

        let _writes = self.lock();
        if self.is_current(started_at) {
            self.entries.insert(key, Arc::clone(&value));
        } else {
            debug!(
                repository = %repository,
                location = %location,
                "Index invalidated during generation, not caching"
            );
        }
        Ok(value)
    }

    /// Drop the cached document at exactly `location`.
    pub fn invalidate(&self, repository: &str, location: &Location) {
        let _writes = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate(&Self::key(repository, location));
        trace!(repository = %repository, location = %location, "Index invalidated");
    }

    /// Drop every cached document.
    pub fn purge(&self) {
        let _writes = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate_all();
        debug!("Index cache purged");
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
