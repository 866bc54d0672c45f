// ABOUTME: Process-backed client pool keyed by workspace root and server id
//
// Provides:
// - ClientRegistry: acquire/release with coalesced startup and ref counting
// - Idle sweeper and temp-directory eviction
// - Graceful (signal-driven) and immediate teardown paths
// - ProcessClient: a stdio server speaking the initialize handshake

pub mod client;
pub mod config;
pub mod entry;
pub mod eviction;
pub mod metrics;
pub mod process;
pub mod process_client;
pub mod registry;
pub mod shutdown;

pub use client::{ClientError, ClientFactory, PoolClient};
pub use config::{ConfigError, PoolConfig, ServerSpec};
pub use entry::{ClientInfo, PoolKey};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use process::{ProcessError, ProcessState, ServerProcess};
pub use process_client::{ProcessClient, ProcessClientFactory};
pub use registry::{ClientRegistry, PoolError, PoolResult};
pub use shutdown::ShutdownReport;
