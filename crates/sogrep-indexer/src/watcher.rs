//! Repository watcher.
//!
//! Watches every discovered links database and turns bursts of write
//! notifications into single rebuild requests. Collected writes are
//! flushed on a fixed cadence, so a steady stream of writes still yields
//! one request per interval.

use crate::IndexerError;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default interval between debounce flushes.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_secs(10);

const EVENT_QUEUE_CAPACITY: usize = 1000;

/// Options for the repository watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// How often collected writes are flushed into a rebuild request
    pub debounce_interval: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
        }
    }
}

/// Request to rebuild the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
    /// Databases written since the previous request, sorted and unique
    pub changed: Vec<PathBuf>,
}

/// Notification forwarded from the watcher backend.
#[derive(Debug)]
pub enum WatchEvent {
    /// A watched file was written
    Write(PathBuf),
    /// The backend reported an error
    Error(String),
}

/// Collects write notifications between flushes.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Vec<PathBuf>,
}

impl Debouncer {
    /// Create an idle debouncer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write notification.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.push(path);
    }

    /// Take the collected writes as one request, if there are any.
    pub fn flush(&mut self) -> Option<RebuildRequest> {
        if self.pending.is_empty() {
            return None;
        }

        let mut changed = std::mem::take(&mut self.pending);
        changed.sort();
        changed.dedup();

        Some(RebuildRequest { changed })
    }

    /// Get the number of pending notifications.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;

/// Watches links databases for writes.
pub struct RepositoryWatcher {
    options: WatcherOptions,
    handle: WatchHandle,
    events: mpsc::Receiver<WatchEvent>,
}

impl RepositoryWatcher {
    /// Create a watcher over the given databases.
    ///
    /// Failing to create the backend or to watch any path is an error.
    pub fn new(paths: &[PathBuf], options: WatcherOptions) -> Result<Self, IndexerError> {
        let (tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => match write_path(&event) {
                    Some(path) => WatchEvent::Write(path),
                    None => {
                        debug!(kind = ?event.kind, paths = ?event.paths, "Ignoring notification");
                        return;
                    }
                },
                Err(e) => WatchEvent::Error(e.to_string()),
            };

            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Watch event queue full, dropping event"),
                Err(TrySendError::Closed(_)) => {}
            }
        })?;

        for path in paths {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
        }

        info!(databases = paths.len(), "Started watching links databases");

        Ok(Self {
            options,
            handle: WatchHandle {
                watcher: Arc::new(Mutex::new(Some(watcher))),
                watched: Arc::new(Mutex::new(paths.to_vec())),
            },
            events,
        })
    }

    /// Handle for updating the watched set while the watcher runs.
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Run until shutdown, sending rebuild requests to `requests`.
    ///
    /// The backend is released before returning.
    pub async fn run(
        self,
        requests: mpsc::Sender<RebuildRequest>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), IndexerError> {
        let result = debounce(
            self.events,
            requests,
            self.options.debounce_interval,
            shutdown,
        )
        .await;

        self.handle.release();
        info!("Stopped watching links databases");

        result
    }
}

/// Shared access to the watcher backend.
#[derive(Clone)]
pub struct WatchHandle {
    watcher: SharedWatcher,
    watched: Arc<Mutex<Vec<PathBuf>>>,
}

impl WatchHandle {
    /// Replace the watched set with `paths`.
    ///
    /// Re-adding a path picks up a file that was replaced on disk.
    /// Paths that cannot be watched are logged and skipped.
    pub fn rewatch(&self, paths: &[PathBuf]) {
        let mut guard = self.watcher.lock();
        let Some(watcher) = guard.as_mut() else {
            return;
        };

        let mut watched = self.watched.lock();
        for path in watched.drain(..) {
            if let Err(e) = watcher.unwatch(&path) {
                debug!(path = ?path, error = %e, "Failed to unwatch");
            }
        }

        for path in paths {
            match watcher.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => watched.push(path.clone()),
                Err(e) => warn!(path = ?path, error = %e, "Failed to watch links database"),
            }
        }

        debug!(databases = watched.len(), "Refreshed watched databases");
    }

    /// Paths currently watched.
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.lock().clone()
    }

    /// Drop the backend. Later calls to [`WatchHandle::rewatch`] do nothing.
    pub fn release(&self) {
        self.watcher.lock().take();
        self.watched.lock().clear();
    }
}

/// Debounce loop: collect writes, flush them on a fixed cadence.
///
/// Requests go through a bounded queue; when a request is already
/// queued the new one is coalesced into it. Returns on shutdown or when
/// the event channel closes, and fails when the request queue has no
/// receiver left.
pub async fn debounce(
    mut events: mpsc::Receiver<WatchEvent>,
    requests: mpsc::Sender<RebuildRequest>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), IndexerError> {
    let mut debouncer = Debouncer::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Debounce loop shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(WatchEvent::Write(path)) => {
                    debug!(path = ?path, "Links database written");
                    debouncer.record(path);
                }
                Some(WatchEvent::Error(e)) => warn!(error = %e, "Watcher error"),
                None => break,
            },
            _ = ticker.tick() => {
                let Some(request) = debouncer.flush() else {
                    continue;
                };

                debug!(changed = ?request.changed, "Collected write events");
                match requests.try_send(request) {
                    Ok(()) => info!("Rebuild requested"),
                    Err(TrySendError::Full(_)) => debug!("Rebuild already queued, coalescing"),
                    Err(TrySendError::Closed(_)) => {
                        warn!("Rebuild queue closed, stopping watcher");
                        return Err(IndexerError::Watcher("rebuild queue closed".to_string()));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Path of a content write, or `None` for any other notification.
///
/// Renames, removals, metadata changes and reads are ignored.
pub fn write_path(event: &Event) -> Option<PathBuf> {
    match event.kind {
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            event.paths.first().cloned()
        }
        _ => None,
    }
}
