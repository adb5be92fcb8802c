//! Service lifecycle management.
//!
//! Startup builds the first index synchronously, then the HTTP listener,
//! the repository watcher and the rebuild worker run as separate tasks.
//! The first task error or a shutdown signal stops all of them.

use parking_lot::Mutex;
use sogrep_core::ServiceConfig;
use sogrep_http::LookupServer;
use sogrep_indexer::{
    IndexBuilder, RebuildRequest, RepositoryWatcher, SnapshotStore, WatchHandle, WatcherOptions,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::handler::SnapshotIndex;
use crate::signals;
use crate::ServiceError;

/// Lifecycle state of a [`Service`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

type SharedState = Arc<Mutex<ServiceState>>;

/// The soname lookup service
pub struct Service {
    config: ServiceConfig,
    builder: IndexBuilder,
    store: Arc<SnapshotStore>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
    state: SharedState,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Requests shutdown of a running [`Service`]
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown_tx: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the service to stop. Calling this before `serve` makes `serve`
    /// return right after startup.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl Service {
    /// Create a new service instance
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);

        Self {
            builder: IndexBuilder::new(config.repository_dir.clone()),
            config,
            store: Arc::new(SnapshotStore::new()),
            shutdown_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ServiceState::Starting)),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Store holding the published index
    pub fn store(&self) -> Arc<SnapshotStore> {
        self.store.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Address the listener is bound to, once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            requested: self.shutdown_requested.clone(),
        }
    }

    /// Run the service until shutdown.
    ///
    /// Returns the first error that stopped the service, or `Ok(())` when
    /// it stopped on request.
    pub async fn serve(&self) -> Result<(), ServiceError> {
        let result = self.run().await;
        set_state(&self.state, ServiceState::Stopped);

        match &result {
            Ok(()) => info!("Service stopped"),
            Err(e) => error!(error = %e, "Service stopped with error"),
        }
        result
    }

    async fn run(&self) -> Result<(), ServiceError> {
        let coordinator_rx = self.shutdown_tx.subscribe();
        set_state(&self.state, ServiceState::Starting);

        info!(
            root = %self.config.repository_dir.display(),
            listen = %self.config.listen_address,
            "Service starting"
        );

        let start = Instant::now();
        let databases = self.builder.discover().map_err(ServiceError::Startup)?;
        let snapshot = self.builder.build_from(&databases).await;
        let generation = self.store.publish(snapshot);
        info!(
            generation,
            duration_ms = start.elapsed().as_millis() as u64,
            "Initial index published"
        );

        let server = LookupServer::bind(
            &self.config.listen_address,
            Arc::new(SnapshotIndex::new(self.store.clone())),
        )?;
        *self.local_addr.lock() = server.local_addr();
        let listener = server.shutdown_handle();

        let watcher = RepositoryWatcher::new(
            &databases,
            WatcherOptions {
                debounce_interval: self.config.debounce_interval(),
            },
        )
        .map_err(ServiceError::Watcher)?;
        let watch = watcher.handle();

        let (error_tx, mut error_rx) = mpsc::channel::<ServiceError>(4);
        let (request_tx, request_rx) = mpsc::channel::<RebuildRequest>(1);
        let mut tasks = JoinSet::new();

        let listener_errors = error_tx.clone();
        tasks.spawn(async move {
            if let Err(e) = server.run().await {
                let _ = listener_errors.send(ServiceError::Listener(e)).await;
            }
        });

        let watcher_errors = error_tx;
        let watcher_shutdown = self.shutdown_tx.subscribe();
        tasks.spawn(async move {
            if let Err(e) = watcher.run(request_tx, watcher_shutdown).await {
                let _ = watcher_errors.send(ServiceError::Watcher(e)).await;
            }
        });

        tasks.spawn(rebuild_worker(
            self.builder.clone(),
            self.store.clone(),
            watch,
            request_rx,
            self.shutdown_tx.subscribe(),
            self.state.clone(),
        ));

        set_state(&self.state, ServiceState::Running);

        let first_error = if self.shutdown_requested.load(Ordering::SeqCst) {
            None
        } else {
            tokio::select! {
                error = error_rx.recv() => error,
                _ = signals::wait_for_shutdown(coordinator_rx) => None,
            }
        };

        set_state(&self.state, ServiceState::ShuttingDown);
        let _ = self.shutdown_tx.send(());
        listener.shutdown();

        let grace = self.config.shutdown_timeout();
        let mut task_failure = None;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Service task failed");
                    task_failure.get_or_insert(ServiceError::Task(e.to_string()));
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                remaining = tasks.len(),
                "Shutdown grace period elapsed, aborting remaining tasks"
            );
            tasks.abort_all();
        }

        match first_error.or(task_failure) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn set_state(state: &SharedState, next: ServiceState) {
    let mut current = state.lock();
    if *current != next {
        info!(from = ?*current, to = ?next, "Service state changed");
        *current = next;
    }
}

/// Serve rebuild requests one at a time until shutdown.
async fn rebuild_worker(
    builder: IndexBuilder,
    store: Arc<SnapshotStore>,
    watch: WatchHandle,
    mut requests: mpsc::Receiver<RebuildRequest>,
    mut shutdown: broadcast::Receiver<()>,
    state: SharedState,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.recv() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        info!(changed = request.changed.len(), "Rebuilding index");

        let databases = match builder.discover() {
            Ok(databases) => databases,
            Err(e) => {
                error!(error = %e, "Rebuild discovery failed, keeping current index");
                continue;
            }
        };

        let snapshot = tokio::select! {
            _ = shutdown.recv() => {
                debug!("Abandoning rebuild in flight");
                break;
            }
            snapshot = builder.build_from(&databases) => snapshot,
        };

        if *state.lock() != ServiceState::Running {
            debug!("Discarding rebuilt index, service is shutting down");
            break;
        }

        watch.rewatch(&databases);
        let generation = store.publish(snapshot);
        info!(generation, "Rebuilt index published");
    }

    debug!("Rebuild worker stopped");
}
