// ABOUTME: Library crate for client-pool exposing the registry and process client

#![allow(missing_docs)]

pub mod pool;

pub use pool::{
    ClientError, ClientFactory, ClientRegistry, PoolClient, PoolConfig, PoolError, PoolKey,
    PoolResult, ProcessClient, ProcessClientFactory, ServerSpec, ShutdownReport,
};
