//! # Mirror Resolution
//!
//! On a local miss a repository may consult its mirrors, in declared order, until one
//! of them serves the path. Concurrent misses for the same `(repository, path)` are
//! coalesced: the first caller starts a fetch, every later caller awaits the same
//! result, and the in-flight entry disappears as soon as the fetch finishes.
//!
//! The fetch itself runs as a spawned task, so a caller that gives up after the
//! fetch timeout neither cancels it nor delays the other waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::checksum;
use crate::config::MirrorSettings;
use crate::error::{AppError, AppResult};
use crate::failure::FailureSink;
use crate::location::Location;
use crate::metadata::is_index_file;
use crate::repository::Repository;
use crate::storage::FileDetails;

/// Artifact served by a mirror.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub details: FileDetails,
    pub content: Bytes,
    /// Whether the bytes were also written to the local repository
    pub stored: bool,
}

#[derive(Debug, Clone)]
enum FetchFailure {
    /// No mirror may be asked for the path
    Unmatched(String),
    /// Every mirror that may be asked was asked, and none served the path
    Exhausted(String),
    Aborted(String),
}

impl From<FetchFailure> for AppError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Unmatched(message) => AppError::NotFound(message),
            FetchFailure::Exhausted(message) => AppError::UpstreamUnavailable(message),
            FetchFailure::Aborted(message) => AppError::Internal(anyhow::anyhow!(message)),
        }
    }
}

type FetchKey = (String, Location);
type SharedFetch = Shared<BoxFuture<'static, Result<FetchedArtifact, FetchFailure>>>;
type InFlight = Arc<Mutex<HashMap<FetchKey, SharedFetch>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<FetchKey, SharedFetch>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Coalescing mirror traversal.
pub struct MirrorResolver {
    in_flight: InFlight,
    sink: Arc<dyn FailureSink>,
}

impl MirrorResolver {
    pub fn new(sink: Arc<dyn FailureSink>) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Fetch `location` from the mirrors of `repository`.
    ///
    /// Only call this after a confirmed local miss.
    ///
    /// # Errors
    ///
    /// `NotFound` when the allow patterns exclude every mirror, `UpstreamUnavailable`
    /// when every mirror that was asked failed or the shared fetch did not finish
    /// within the fetch timeout.
    pub async fn resolve(
        &self,
        repository: Arc<Repository>,
        location: &Location,
        limits: &MirrorSettings,
    ) -> AppResult<FetchedArtifact> {
        let key = (repository.name().to_string(), location.clone());

        let fetch = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(
                        repository = %key.0,
                        location = %location,
                        "Joining in-flight mirror fetch"
                    );
                    existing.clone()
                }
                None => {
                    let fetch = self.start_fetch(
                        repository,
                        key.clone(),
                        limits.max_artifact_size_bytes(),
                    );
                    in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        match tokio::time::timeout(limits.fetch_timeout(), fetch).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "Mirrors did not answer for {location} within {}s",
                limits.fetch_timeout_secs
            ))),
        }
    }

    /// Spawn the traversal; called with the in-flight table locked, so the task
    /// cannot remove its entry before it is inserted.
    fn start_fetch(
        &self,
        repository: Arc<Repository>,
        key: FetchKey,
        max_size: u64,
    ) -> SharedFetch {
        let in_flight = Arc::clone(&self.in_flight);
        let sink = Arc::clone(&self.sink);

        let task = tokio::spawn(async move {
            let result = traverse(&repository, &key.1, sink.as_ref(), max_size).await;
            lock(&in_flight).remove(&key);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(FetchFailure::Aborted(format!("Mirror fetch aborted: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

/// Ask each mirror in order; the first one that serves the path wins.
async fn traverse(
    repository: &Repository,
    location: &Location,
    sink: &dyn FailureSink,
    max_size: u64,
) -> Result<FetchedArtifact, FetchFailure> {
    let mut asked = 0;
    for mirror in repository.mirrors() {
        if !mirror.allows(location) {
            debug!(
                mirror = %mirror.base_url(),
                location = %location,
                "Mirror skipped by allow pattern"
            );
            continue;
        }
        asked += 1;

        match mirror.fetch(location, max_size).await {
            Ok(content) => {
                // Index documents are generated from local contents, never kept.
                let details = if mirror.stores_locally() && !is_index_file(location) {
                    store_locally(repository, location, &content, sink).await
                } else {
                    None
                };
                let stored = details.is_some();
                let details = details.unwrap_or_else(|| {
                    FileDetails::file(location, content.len() as u64, Utc::now())
                });
                return Ok(FetchedArtifact {
                    details,
                    content,
                    stored,
                });
            }
            Err(e) if e.is_miss() => {
                debug!(
                    mirror = %mirror.base_url(),
                    location = %location,
                    "Mirror does not have artifact"
                );
            }
            Err(e) => {
                warn!(
                    mirror = %mirror.base_url(),
                    location = %location,
                    error = %e,
                    "Mirror failed"
                );
                let context = format!(
                    "mirror {} for {}",
                    mirror.base_url(),
                    repository.storage_path(location)
                );
                sink.report(&context, &e.to_string());
            }
        }
    }

    if asked == 0 {
        return Err(FetchFailure::Unmatched(format!(
            "No mirror of '{}' may serve {location}",
            repository.name()
        )));
    }
    Err(FetchFailure::Exhausted(format!(
        "No mirror of '{}' could provide {location}",
        repository.name()
    )))
}

/// Write a mirrored artifact and its checksums into the local repository.
///
/// Returns the stored details, or `None` when the artifact was not stored. A failed
/// write is reported and everything written for the artifact so far is removed, so
/// the artifact is either stored with all its checksums or not at all.
async fn store_locally(
    repository: &Repository,
    location: &Location,
    content: &Bytes,
    sink: &dyn FailureSink,
) -> Option<FileDetails> {
    let context = format!("store mirrored {}", repository.storage_path(location));

    if let Err(e) = repository.can_hold(content.len() as u64).await {
        debug!(location = %location, error = %e, "Not storing mirrored artifact");
        return None;
    }

    let details = match repository.put(location, content.clone()).await {
        Ok(details) => details,
        Err(e) => {
            sink.report(&context, &e.report_context());
            return None;
        }
    };
    let mut written = vec![location.clone()];
    for (companion, digest) in checksum::companions(location, content) {
        if let Err(e) = repository.put(&companion, digest).await {
            sink.report(&context, &e.report_context());
            discard(repository, &written, sink).await;
            return None;
        }
        written.push(companion);
    }

    info!(
        repository = %repository.name(),
        location = %location,
        size = content.len(),
        "Stored mirrored artifact"
    );
    Some(details)
}

async fn discard(repository: &Repository, written: &[Location], sink: &dyn FailureSink) {
    for target in written {
        match repository.remove(target).await {
            Ok(()) | Err(AppError::NotFound(_)) => {}
            Err(e) => sink.report(
                &format!("discard mirrored {}", repository.storage_path(target)),
                &e.report_context(),
            ),
        }
    }
    warn!(
        repository = %repository.name(),
        location = ?written.first(),
        "Partially stored mirrored artifact discarded"
    );
}
