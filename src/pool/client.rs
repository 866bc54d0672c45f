// ABOUTME: Capability contract between the registry and the clients it pools
//
// The registry never speaks the server protocol itself. It only needs to
// start a client, run its initialize handshake, ask whether it is alive and
// stop it. Anything implementing PoolClient can be pooled.

use std::future::Future;
use std::path::Path;

use thiserror::Error;

use super::config::ServerSpec;

/// Errors reported by a pooled client
///
/// `Clone` so a single startup outcome can be handed to every caller joined
/// on the same in-flight startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Binary missing or the OS refused to spawn it
    #[error("Failed to spawn server: {0}")]
    Spawn(String),

    /// Initialize exchange failed, timed out or was answered with an error
    #[error("Initialize handshake failed: {0}")]
    Handshake(String),

    /// Stopping the client failed
    #[error("Failed to stop server: {0}")]
    Teardown(String),
}

/// A long-lived, subprocess-backed connection that the registry can pool
///
/// Methods take `&self`; implementations keep their mutable state behind
/// interior locks so one instance can be shared as `Arc<Self>` between the
/// registry and every caller holding it.
pub trait PoolClient: Send + Sync + 'static {
    /// Spawn the underlying process
    fn start(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Run the protocol handshake; called once, after a successful `start`
    fn initialize(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Whether the process/connection is still usable. Must not block.
    fn is_alive(&self) -> bool;

    /// Stop the process. Must succeed on a never-started or stopped client.
    fn stop(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Best-effort synchronous kill, for when no further async work can run
    fn force_stop(&self);
}

/// Builds fresh, not yet started clients for a workspace root and server
pub trait ClientFactory: Send + Sync + 'static {
    /// Client type produced by this factory
    type Client: PoolClient;

    /// Create a client for `server` rooted at `root`. Must not spawn anything.
    fn create(&self, root: &Path, server: &ServerSpec) -> Self::Client;
}
