//! Informer — keeps an [`ObjectCache`] current from the store's watch feed.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use capscale_state::{StateError, StateStore, WatchEvent};

use crate::cache::ObjectCache;

/// Errors raised while starting the informer.
#[derive(Debug, thiserror::Error)]
pub enum InformerError {
    #[error("initial cache sync failed: {0}")]
    InitialSync(#[from] StateError),
}

pub type InformerResult<T> = Result<T, InformerError>;

/// Background task feeding the object cache.
pub struct Informer {
    cache: ObjectCache,
    handle: JoinHandle<()>,
}

impl Informer {
    /// Subscribe to the store, load the initial state and start following
    /// changes.
    ///
    /// The subscription is taken before the initial list so no change
    /// committed in between is lost; events already reflected by the list
    /// are discarded by the resource-version check. Returns only once the
    /// cache is synced. Must be called within a tokio runtime.
    pub fn start(store: StateStore, shutdown: watch::Receiver<bool>) -> InformerResult<Self> {
        let events = store.watch();
        let cache = ObjectCache::unsynced();
        cache.resync(&store)?;
        let counts = cache.counts();
        info!(
            nodes = counts.nodes,
            machines = counts.machines,
            machine_sets = counts.machine_sets,
            machine_deployments = counts.machine_deployments,
            "informer synced"
        );

        let handle = tokio::spawn(run_event_loop(store, cache.clone(), events, shutdown));
        Ok(Self { cache, handle })
    }

    /// Handle to the synced cache.
    pub fn cache(&self) -> ObjectCache {
        self.cache.clone()
    }

    /// Wait for the event loop to exit (after shutdown or store close).
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "informer task failed");
        }
    }
}

async fn run_event_loop(
    store: StateStore,
    cache: ObjectCache,
    mut events: broadcast::Receiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    debug!(
                        kind = %event.object().kind(),
                        key = %event.object().metadata().key(),
                        "watch event"
                    );
                    cache.apply_event(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch lagged, relisting");
                    if let Err(e) = cache.resync(&store) {
                        error!(error = %e, "relist failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("watch closed, informer stopping");
                    break;
                }
            },
            _ = shutdown.changed() => {
                info!("informer shutting down");
                break;
            }
        }
    }
}
