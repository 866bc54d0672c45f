// ABOUTME: Eviction passes over the client registry
//
// - Idle sweep: unreferenced clients unused past idle_timeout (also run by the
//   background sweeper on every sweep_interval tick)
// - Temp-dir cleanup: unreferenced clients rooted in transient directories,
//   regardless of idle age
//
// Neither pass ever touches an entry that is held or still starting up.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info};

use super::client::ClientFactory;
use super::entry::PoolKey;
use super::registry::{stop_quietly, ClientRegistry};

impl<F: ClientFactory> ClientRegistry<F> {
    /// Run one idle sweep now
    ///
    /// Evicted clients are removed from the pool immediately; their stops are
    /// issued in the background and failures only logged. Returns the number
    /// of evicted entries.
    pub fn sweep_idle(&self) -> usize {
        self.inner.sweep_idle()
    }

    /// Stop and remove unreferenced clients whose root is a temp directory
    ///
    /// Entries are dropped from the pool even if their stop fails. Returns
    /// the number of evicted entries.
    pub async fn cleanup_temp_directory_clients(&self) -> usize {
        // Filesystem checks happen outside the lock
        let candidates: Vec<PoolKey> = self
            .inner
            .lock_entries()
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && !e.is_initializing())
            .map(|(k, _)| k.clone())
            .collect();

        let temp_keys: Vec<PoolKey> = candidates
            .into_iter()
            .filter(|k| self.inner.config.is_temp_path(k.root()))
            .collect();

        if temp_keys.is_empty() {
            return 0;
        }

        let evicted: Vec<(PoolKey, Arc<F::Client>)> = {
            let mut entries = self.inner.lock_entries();
            // Re-check: someone may have acquired it since the snapshot
            let still_free: Vec<PoolKey> = temp_keys
                .into_iter()
                .filter(|k| {
                    entries
                        .get(k)
                        .is_some_and(|e| e.ref_count == 0 && !e.is_initializing())
                })
                .collect();
            let evicted = still_free
                .into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e.client)))
                .collect();
            self.inner.metrics.set_active_entries(entries.len());
            evicted
        };

        let count = evicted.len();
        if count == 0 {
            return 0;
        }

        info!(count, "Evicting temp-directory clients");
        self.inner.metrics.record_evictions(count);

        let stops = evicted.iter().map(|(key, client)| {
            debug!(key = %key, "Stopping temp-directory client");
            stop_quietly(key, client.as_ref())
        });
        join_all(stops).await;

        count
    }
}
