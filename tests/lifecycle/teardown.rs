// ABOUTME: Teardown tests - stop_all, graceful shutdown reports and immediate shutdown

use std::time::Duration;

use client_pool::PoolError;
use pretty_assertions::assert_eq;

use crate::fixtures::{registry, registry_with, server, FakeFactory};

#[tokio::test]
async fn test_stop_all_empties_pool_and_cancels_sweeper() {
    let factory = FakeFactory::new();
    let registry = registry_with(&factory, client_pool::PoolConfig::default());

    registry.get_client("/a", &server("ra")).await.unwrap();
    registry.get_client("/b", &server("ra")).await.unwrap();
    registry.get_client("/a", &server("ts")).await.unwrap();
    registry.release_client("/a", "ts");
    assert!(registry.is_sweeping());

    registry.stop_all().await;

    assert!(registry.is_empty());
    assert!(!registry.is_sweeping());
    assert_eq!(factory.stops(), 3);

    // The registry stays usable
    registry.get_client("/a", &server("ra")).await.unwrap();
    assert_eq!(factory.spawns(), 4);
    assert!(registry.is_sweeping());
}

#[tokio::test]
async fn test_stop_all_continues_past_failures() {
    let factory = FakeFactory::new();
    factory.fail_stop_for("broken");
    let registry = registry(&factory);

    registry.get_client("/a", &server("broken")).await.unwrap();
    registry.get_client("/a", &server("ra")).await.unwrap();

    registry.stop_all().await;

    assert!(registry.is_empty());
    assert_eq!(factory.stops(), 2);
}

#[tokio::test]
async fn test_stop_all_during_startup_evicts_waiting_caller() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(100));
    let registry = registry(&factory);

    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.get_client("/repo", &server("ra")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.is_server_initializing("/repo", "ra"));

    registry.stop_all().await;

    match waiter.await.unwrap() {
        Err(PoolError::Evicted(key)) => assert_eq!(key.server_id(), "ra"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected eviction"),
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_graceful_shutdown_reports_every_client() {
    let factory = FakeFactory::new();
    factory.fail_stop_for("broken");
    let registry = registry(&factory);

    registry.get_client("/a", &server("ra")).await.unwrap();
    registry.get_client("/b", &server("ra")).await.unwrap();
    registry.get_client("/a", &server("broken")).await.unwrap();

    let report = registry.shutdown_gracefully().await;

    assert_eq!(report.total(), 3);
    assert_eq!(report.stopped, 2);
    assert!(!report.is_clean());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.server_id(), "broken");
    assert!(report.failed[0].1.contains("refused to stop"));

    assert!(registry.is_empty());
    assert!(!registry.is_sweeping());
    assert_eq!(factory.stops(), 3);
}

#[tokio::test]
async fn test_graceful_shutdown_on_empty_pool() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);

    let report = registry.shutdown_gracefully().await;
    assert_eq!(report.total(), 0);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_shutdown_now_force_stops_everything() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);

    registry.get_client("/a", &server("ra")).await.unwrap();
    registry.get_client("/b", &server("ra")).await.unwrap();
    registry.release_client("/b", "ra");

    registry.shutdown_now();

    assert!(registry.is_empty());
    assert_eq!(factory.force_stops(), 2);
    assert_eq!(factory.stops(), 0);
}

#[test]
fn test_shutdown_now_outside_runtime() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        registry.get_client("/a", &server("ra")).await.unwrap();
    });
    drop(runtime);

    registry.shutdown_now();
    assert!(registry.is_empty());
    assert_eq!(factory.force_stops(), 1);
}
