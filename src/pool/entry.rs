// ABOUTME: Pool keys and the bookkeeping record stored per pooled client

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;

use super::client::ClientError;

/// Shared handle on an in-flight `start()` + `initialize()` sequence
pub(crate) type StartupHandle = Shared<BoxFuture<'static, Result<(), ClientError>>>;

// === Pool Key ===

/// Identifies one logical client slot: a workspace root plus a server id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PoolKey {
    root: PathBuf,
    server_id: String,
}

impl PoolKey {
    pub fn new(root: impl AsRef<Path>, server_id: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            server_id: server_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.root.display(), self.server_id)
    }
}

// === Managed Entry ===

/// A pooled client plus the bookkeeping the registry needs to share and evict it
pub(crate) struct ManagedEntry<C> {
    pub(crate) client: Arc<C>,
    pub(crate) last_used: Instant,
    pub(crate) ref_count: usize,
    /// Present while startup is in flight
    pub(crate) startup: Option<StartupHandle>,
}

impl<C> ManagedEntry<C> {
    pub(crate) fn new(client: Arc<C>, ref_count: usize, startup: StartupHandle) -> Self {
        Self {
            client,
            last_used: Instant::now(),
            ref_count,
            startup: Some(startup),
        }
    }

    pub(crate) fn is_initializing(&self) -> bool {
        self.startup.is_some()
    }

    /// Record one more holder
    pub(crate) fn acquire(&mut self) {
        self.ref_count += 1;
        self.last_used = Instant::now();
    }

    /// Drop one holder; never goes below zero
    pub(crate) fn release(&mut self) {
        if self.ref_count > 0 {
            self.ref_count -= 1;
            self.last_used = Instant::now();
        }
    }

    /// Unreferenced, settled, and unused for longer than `idle_timeout`
    pub(crate) fn is_evictable(&self, idle_timeout: Duration) -> bool {
        self.ref_count == 0 && !self.is_initializing() && self.last_used.elapsed() > idle_timeout
    }

    /// Whether this entry still holds exactly `client`
    pub(crate) fn holds(&self, client: &Arc<C>) -> bool {
        Arc::ptr_eq(&self.client, client)
    }
}

// === Client Info ===

/// Point-in-time view of one pool entry
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub key: PoolKey,
    pub ref_count: usize,
    pub initializing: bool,
    pub idle_secs: u64,
}

impl<C> From<(&PoolKey, &ManagedEntry<C>)> for ClientInfo {
    fn from((key, entry): (&PoolKey, &ManagedEntry<C>)) -> Self {
        Self {
            key: key.clone(),
            ref_count: entry.ref_count,
            initializing: entry.is_initializing(),
            idle_secs: entry.last_used.elapsed().as_secs(),
        }
    }
}
