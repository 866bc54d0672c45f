// ABOUTME: Eviction tests - idle sweep, background sweeper and temp-directory cleanup

use std::sync::Arc;
use std::time::Duration;

use client_pool::PoolConfig;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::fixtures::{registry, registry_with, server, FakeFactory};

fn idle_config(idle_timeout: Duration, sweep_interval: Duration) -> PoolConfig {
    PoolConfig {
        idle_timeout,
        sweep_interval,
        ..PoolConfig::default()
    }
}

#[tokio::test]
async fn test_idle_sweep_then_reacquire_spawns_again() {
    let factory = FakeFactory::new();
    let registry = registry_with(&factory, idle_config(Duration::from_millis(20), Duration::ZERO));
    let ra = server("ra");

    let first = registry.get_client("/repo", &ra).await.unwrap();
    registry.release_client("/repo", "ra");
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(registry.sweep_idle(), 1);
    assert!(registry.is_empty());

    let second = registry.get_client("/repo", &ra).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.spawns(), 2);

    // The evicted client is stopped in the background
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_idle_sweep_respects_ref_count() {
    let factory = FakeFactory::new();
    let registry = registry_with(&factory, idle_config(Duration::from_millis(10), Duration::ZERO));

    registry.get_client("/held", &server("ra")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(registry.sweep_idle(), 0);
    assert!(registry.contains("/held", "ra"));
}

#[tokio::test]
async fn test_idle_sweep_keeps_recently_used() {
    let factory = FakeFactory::new();
    let registry = registry_with(&factory, idle_config(Duration::from_secs(300), Duration::ZERO));

    registry.get_client("/repo", &server("ra")).await.unwrap();
    registry.release_client("/repo", "ra");

    assert_eq!(registry.sweep_idle(), 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_idle_sweep_skips_initializing_entries() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(200));
    let registry = registry_with(&factory, idle_config(Duration::ZERO, Duration::ZERO));

    registry.warmup_client("/repo", &server("ra"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(registry.sweep_idle(), 0);
    assert!(registry.is_server_initializing("/repo", "ra"));
}

#[tokio::test]
async fn test_background_sweeper_evicts_idle_clients() {
    let factory = FakeFactory::new();
    let registry = registry_with(
        &factory,
        idle_config(Duration::from_millis(10), Duration::from_millis(20)),
    );

    registry.get_client("/repo", &server("ra")).await.unwrap();
    assert!(registry.is_sweeping());
    registry.release_client("/repo", "ra");

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(registry.is_empty());
    assert_eq!(registry.metrics().snapshot().evictions, 1);
}

#[tokio::test]
async fn test_temp_cleanup_only_touches_free_temp_entries() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);
    let held_temp = TempDir::new().unwrap();
    let free_temp = TempDir::new().unwrap();

    registry.get_client(held_temp.path(), &server("ra")).await.unwrap();
    registry.get_client(free_temp.path(), &server("ra")).await.unwrap();
    registry.release_client(free_temp.path(), "ra");
    registry.get_client("/definitely/not/temp", &server("ra")).await.unwrap();
    registry.release_client("/definitely/not/temp", "ra");

    assert_eq!(registry.cleanup_temp_directory_clients().await, 1);

    assert!(registry.contains(held_temp.path(), "ra"));
    assert!(!registry.contains(free_temp.path(), "ra"));
    assert!(registry.contains("/definitely/not/temp", "ra"));
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_temp_cleanup_on_empty_pool() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);
    assert_eq!(registry.cleanup_temp_directory_clients().await, 0);
}
