// ABOUTME: Client registry - one shared, lazily started client per (root, server) pair
// ABOUTME: Deduplicates concurrent startups, tracks holders, and replaces dead clients on reuse

//! Client Registry
//!
//! The `ClientRegistry` owns every pooled client and is the only thing callers
//! talk to. It provides:
//! - One client per `(workspace root, server id)` key
//! - Startup sharing: callers racing on a key join one in-flight startup
//! - Reference counting so idle eviction never touches a held client
//! - Stale replacement when a client is found dead on reuse
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ClientRegistry                         │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ entries: Mutex<HashMap<PoolKey, ManagedEntry>>         │  │
//! │  │   /repo::rust-analyzer -> ready (refs 2)               │  │
//! │  │   /repo::tsserver      -> initializing (Shared future) │  │
//! │  │   /tmp/x::gopls        -> ready (refs 0, idle 4m)      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌─────────────────┐  │
//! │  │ Idle sweeper │  │ RegistryMetrics │  │  ClientFactory  │  │
//! │  │ (tokio task) │  │   (counters)    │  │ (builds clients)│  │
//! │  └──────────────┘  └─────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The entry map sits behind a synchronous mutex that is never held across
//! an `.await`. Every lookup-then-mutate sequence happens inside one critical
//! section, and a new entry is inserted together with its startup handle
//! before anyone suspends, so a late caller always finds the handle and joins
//! it instead of spawning a second process.
//!
//! # Usage
//!
//! ```ignore
//! let registry = ClientRegistry::new(ProcessClientFactory::new(&config), config);
//!
//! let client = registry.get_client("/repo", &server).await?;
//! // ... use client ...
//! registry.release_client("/repo", &server.id);
//!
//! registry.stop_all().await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::{ClientError, ClientFactory, PoolClient};
use super::config::{PoolConfig, ServerSpec};
use super::entry::{ClientInfo, ManagedEntry, PoolKey, StartupHandle};
use super::metrics::RegistryMetrics;

// === Registry Errors ===

/// Errors returned to callers acquiring a client
#[derive(Debug, Error)]
pub enum PoolError {
    /// Spawn or handshake failed; every caller joined on the startup sees it
    #[error("Client startup failed: {0}")]
    Startup(#[from] ClientError),

    /// Startup finished but the entry was torn down in the meantime
    #[error("Client for {0} was evicted before it became ready")]
    Evicted(PoolKey),
}

/// Result type for registry operations
pub type PoolResult<T> = Result<T, PoolError>;

// === Shared State ===

type EntryMap<C> = HashMap<PoolKey, ManagedEntry<C>>;

pub(crate) struct RegistryInner<F: ClientFactory> {
    factory: F,
    pub(crate) config: PoolConfig,
    entries: Mutex<EntryMap<F::Client>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    pub(crate) metrics: RegistryMetrics,
}

/// Outcome of the locked lookup at the start of an acquisition
enum Checkout<C> {
    /// Live client, already counted as held by this caller
    Ready(Arc<C>),
    /// Startup in flight; `created` is true when this caller started it
    Pending {
        client: Arc<C>,
        startup: StartupHandle,
        created: bool,
        stale: Option<Arc<C>>,
    },
}

impl<F: ClientFactory> RegistryInner<F> {
    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, EntryMap<F::Client>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locked lookup-or-create for one acquisition attempt
    fn checkout(self: &Arc<Self>, key: &PoolKey, root: &Path, server: &ServerSpec) -> Checkout<F::Client> {
        let mut entries = self.lock_entries();

        let (client, startup, alive) = match entries.get(key) {
            None => {
                let (client, startup) = self.begin_startup(&mut entries, key, root, server, 1);
                return Checkout::Pending {
                    client,
                    startup,
                    created: true,
                    stale: None,
                };
            }
            Some(entry) => (
                Arc::clone(&entry.client),
                entry.startup.clone(),
                entry.startup.is_none() && entry.client.is_alive(),
            ),
        };

        if let Some(startup) = startup {
            return Checkout::Pending {
                client,
                startup,
                created: false,
                stale: None,
            };
        }

        if alive {
            if let Some(entry) = entries.get_mut(key) {
                entry.acquire();
                self.metrics.record_reuse();
                return Checkout::Ready(client);
            }
        }

        // Dead client: drop it from the map and insert its replacement in the
        // same critical section so nobody can slip in a second startup.
        warn!(key = %key, "Pooled client is no longer alive, replacing it");
        self.metrics.record_stale();
        let stale = entries.remove(key).map(|e| e.client);
        let (client, startup) = self.begin_startup(&mut entries, key, root, server, 1);
        Checkout::Pending {
            client,
            startup,
            created: true,
            stale,
        }
    }

    /// Create a client, register it as initializing and kick off its startup
    ///
    /// Must be called with the entry lock held.
    fn begin_startup(
        self: &Arc<Self>,
        entries: &mut EntryMap<F::Client>,
        key: &PoolKey,
        root: &Path,
        server: &ServerSpec,
        ref_count: usize,
    ) -> (Arc<F::Client>, StartupHandle) {
        info!(key = %key, command = %server.command, "Starting new client");

        let client = Arc::new(self.factory.create(root, server));
        let startup = Self::run_startup(Arc::downgrade(self), key.clone(), Arc::clone(&client))
            .boxed()
            .shared();

        entries.insert(
            key.clone(),
            ManagedEntry::new(Arc::clone(&client), ref_count, startup.clone()),
        );
        self.metrics.record_spawn();
        self.metrics.set_active_entries(entries.len());

        // Drive startup to completion even if every waiting caller goes away
        tokio::spawn(startup.clone());
        self.ensure_sweeper();

        (client, startup)
    }

    /// `start()` then `initialize()`, settling the entry before anyone sees the result
    async fn run_startup(
        inner: Weak<Self>,
        key: PoolKey,
        client: Arc<F::Client>,
    ) -> Result<(), ClientError> {
        let started = Instant::now();
        let result = async {
            client.start().await?;
            client.initialize().await
        }
        .await;

        if let Some(inner) = inner.upgrade() {
            inner.settle_startup(&key, &client, &result);
        }

        match &result {
            Ok(()) => {
                info!(key = %key, elapsed_ms = started.elapsed().as_millis(), "Client ready");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Client startup failed");
                stop_quietly(&key, client.as_ref()).await;
            }
        }

        result
    }

    /// Clear the in-flight marker, or drop the entry if startup failed
    ///
    /// Looks the entry up again by key: it may have been evicted or replaced
    /// while startup was suspended.
    fn settle_startup(&self, key: &PoolKey, client: &Arc<F::Client>, result: &Result<(), ClientError>) {
        let mut entries = self.lock_entries();

        if !entries.get(key).is_some_and(|e| e.holds(client)) {
            debug!(key = %key, "Entry replaced before startup settled");
            return;
        }

        match result {
            Ok(()) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.startup = None;
                }
            }
            Err(_) => {
                entries.remove(key);
                self.metrics.record_startup_failure();
                self.metrics.set_active_entries(entries.len());
            }
        }
    }

    /// Start the idle sweep task if it is not already running
    fn ensure_sweeper(self: &Arc<Self>) {
        let period = self.config.sweep_interval;
        if period.is_zero() {
            return;
        }

        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        debug!(period_ms = period.as_millis(), "Starting idle sweeper");
        *sweeper = Some(tokio::spawn(Self::sweep_loop(Arc::downgrade(self), period)));
    }

    async fn sweep_loop(inner: Weak<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.sweep_idle();
        }
    }

    pub(crate) fn cancel_sweeper(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Idle sweeper cancelled");
        }
    }

    pub(crate) fn has_sweeper(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Remove every entry from the map and stop the sweeper
    pub(crate) fn drain(&self) -> Vec<(PoolKey, Arc<F::Client>)> {
        let drained: Vec<_> = {
            let mut entries = self.lock_entries();
            entries.drain().map(|(key, entry)| (key, entry.client)).collect()
        };
        self.cancel_sweeper();

        self.metrics.record_evictions(drained.len());
        self.metrics.set_active_entries(0);
        drained
    }

    /// Remove and stop unreferenced entries idle past the threshold
    pub(crate) fn sweep_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let evicted: Vec<(PoolKey, Arc<F::Client>)> = {
            let mut entries = self.lock_entries();
            let keys: Vec<PoolKey> = entries
                .iter()
                .filter(|(_, e)| e.is_evictable(idle_timeout))
                .map(|(k, _)| k.clone())
                .collect();
            let evicted = keys
                .into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e.client)))
                .collect();
            self.metrics.set_active_entries(entries.len());
            evicted
        };

        let count = evicted.len();
        for (key, client) in evicted {
            info!(key = %key, "Evicting idle client");
            detach_stop(key, client);
        }

        if count > 0 {
            self.metrics.record_evictions(count);
        }
        count
    }
}

impl<F: ClientFactory> Drop for RegistryInner<F> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let entries = std::mem::take(self.entries.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (key, entry) in entries {
            debug!(key = %key, "Force-stopping client on registry drop");
            entry.client.force_stop();
        }
    }
}

/// Stop a client, logging instead of propagating failures
pub(crate) async fn stop_quietly<C: PoolClient>(key: &PoolKey, client: &C) -> bool {
    match client.stop().await {
        Ok(()) => {
            debug!(key = %key, "Client stopped");
            true
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Error stopping client");
            false
        }
    }
}

/// Issue a stop without waiting for it; falls back to `force_stop` off-runtime
fn detach_stop<C: PoolClient>(key: PoolKey, client: Arc<C>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                stop_quietly(&key, client.as_ref()).await;
            });
        }
        Err(_) => client.force_stop(),
    }
}

/// Hold counted for a creating caller before its startup finished
///
/// Returned to the entry on drop unless `keep` is called, so an acquisition
/// abandoned mid-startup (timeout, `select!`, aborted task) leaves the entry
/// unreferenced and evictable.
struct CreatorHold<'a, F: ClientFactory> {
    inner: &'a RegistryInner<F>,
    key: &'a PoolKey,
    client: Option<Arc<F::Client>>,
}

impl<'a, F: ClientFactory> CreatorHold<'a, F> {
    fn new(inner: &'a RegistryInner<F>, key: &'a PoolKey, client: &Arc<F::Client>) -> Self {
        Self {
            inner,
            key,
            client: Some(Arc::clone(client)),
        }
    }

    /// The caller received the client; the hold is now theirs
    fn keep(mut self) {
        self.client = None;
    }
}

impl<F: ClientFactory> Drop for CreatorHold<'_, F> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        let mut entries = self.inner.lock_entries();
        if let Some(entry) = entries.get_mut(self.key) {
            if entry.holds(&client) {
                entry.release();
                debug!(key = %self.key, "Acquisition abandoned, hold returned");
            }
        }
    }
}

// === Client Registry ===

/// Process-scoped pool of subprocess-backed clients
///
/// Cheap to clone; every clone shares the same entries. Construct one per
/// process and hand clones to the call sites that need clients.
pub struct ClientRegistry<F: ClientFactory> {
    pub(crate) inner: Arc<RegistryInner<F>>,
}

impl<F: ClientFactory> Clone for ClientRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ClientFactory> fmt::Debug for ClientRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.inner.config)
            .field("entry_count", &self.len())
            .finish()
    }
}

impl<F: ClientFactory> ClientRegistry<F> {
    /// Create an empty registry. Nothing is spawned until the first acquisition.
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                factory,
                config,
                entries: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
                metrics: RegistryMetrics::new(),
            }),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get registry metrics
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.inner.metrics
    }

    /// Get a ready client for `server` in `root`, creating it if needed
    ///
    /// The returned client counts as held until `release_client` is called
    /// for the same root and server id.
    ///
    /// # Errors
    ///
    /// - `PoolError::Startup` if spawning or the handshake failed. Every
    ///   caller that joined the same startup gets the same error, and the
    ///   failed entry is already gone from the pool.
    /// - `PoolError::Evicted` if the pool was shut down while waiting.
    pub async fn get_client(
        &self,
        root: impl AsRef<Path>,
        server: &ServerSpec,
    ) -> PoolResult<Arc<F::Client>> {
        let root = root.as_ref();
        let key = PoolKey::new(root, &server.id);

        loop {
            let (client, startup, created, stale) = match self.inner.checkout(&key, root, server) {
                Checkout::Ready(client) => {
                    debug!(key = %key, "Reusing pooled client");
                    return Ok(client);
                }
                Checkout::Pending {
                    client,
                    startup,
                    created,
                    stale,
                } => (client, startup, created, stale),
            };

            // Cancellation from here on must hand the creator's hold back
            let hold = created.then(|| CreatorHold::new(&self.inner, &key, &client));

            if let Some(stale) = stale {
                stop_quietly(&key, stale.as_ref()).await;
            }

            if !created {
                debug!(key = %key, "Joining in-flight client startup");
                self.inner.metrics.record_join();
            }

            startup.await?;

            let ready = {
                let mut entries = self.inner.lock_entries();
                match entries.get_mut(&key) {
                    // The creator's hold was counted when the entry was inserted
                    Some(entry) if entry.holds(&client) && created => Some(true),
                    Some(entry) if entry.holds(&client) => {
                        let alive = client.is_alive();
                        if alive {
                            entry.acquire();
                        }
                        Some(alive)
                    }
                    _ => None,
                }
            };

            match ready {
                Some(true) => {
                    if let Some(hold) = hold {
                        hold.keep();
                    }
                    return Ok(client);
                }
                None => {
                    drop(hold);
                    return Err(PoolError::Evicted(key));
                }
                // Died right after startup; the next checkout replaces it
                Some(false) => {}
            }
        }
    }

    /// Start a client for `server` in `root` without holding it
    ///
    /// No-op if the key already has an entry. Returns true if a new startup
    /// was kicked off. Startup failures are logged and the entry discarded.
    pub fn warmup_client(&self, root: impl AsRef<Path>, server: &ServerSpec) -> bool {
        let root = root.as_ref();
        let key = PoolKey::new(root, &server.id);

        let mut entries = self.inner.lock_entries();
        if entries.contains_key(&key) {
            return false;
        }

        debug!(key = %key, "Warming up client");
        self.inner.begin_startup(&mut entries, &key, root, server, 0);
        true
    }

    /// Drop one hold on the client for `root` and `server_id`
    ///
    /// Never stops the client; eviction is left to the sweeps.
    pub fn release_client(&self, root: impl AsRef<Path>, server_id: &str) {
        let key = PoolKey::new(root, server_id);
        if let Some(entry) = self.inner.lock_entries().get_mut(&key) {
            entry.release();
            debug!(key = %key, ref_count = entry.ref_count, "Released client");
        }
    }

    /// Whether the client for `root` and `server_id` is still starting up
    pub fn is_server_initializing(&self, root: impl AsRef<Path>, server_id: &str) -> bool {
        let key = PoolKey::new(root, server_id);
        self.inner
            .lock_entries()
            .get(&key)
            .is_some_and(ManagedEntry::is_initializing)
    }

    /// Snapshot of every entry, sorted by key
    pub fn client_info(&self) -> Vec<ClientInfo> {
        let mut info: Vec<ClientInfo> = self
            .inner
            .lock_entries()
            .iter()
            .map(ClientInfo::from)
            .collect();
        info.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        info
    }

    /// Number of entries, including ones still starting up
    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    /// Whether the pool holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `root` and `server_id`
    pub fn contains(&self, root: impl AsRef<Path>, server_id: &str) -> bool {
        self.inner
            .lock_entries()
            .contains_key(&PoolKey::new(root, server_id))
    }

    /// Whether the idle sweep task is currently scheduled
    pub fn is_sweeping(&self) -> bool {
        self.inner.has_sweeper()
    }
}
