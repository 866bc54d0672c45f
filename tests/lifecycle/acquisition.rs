// ABOUTME: Acquisition tests - coalesced startup, key isolation, ref counting,
// stale replacement, handshake failure and cancelled acquisitions

use std::sync::Arc;
use std::time::Duration;

use client_pool::{ClientError, PoolClient, PoolConfig, PoolError};
use pretty_assertions::assert_eq;

use crate::fixtures::{registry, registry_with, server, FakeFactory};

#[tokio::test]
async fn test_racing_callers_share_one_client() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(50));
    let registry = registry(&factory);
    let ra = server("rust-analyzer");

    let (a, b) = tokio::join!(
        registry.get_client("/repo", &ra),
        registry.get_client("/repo", &ra)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(factory.spawns(), 1);
    assert_eq!(factory.handshakes(), 1);

    let info = registry.client_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].ref_count, 2);
    assert!(!info[0].initializing);

    let metrics = registry.metrics().snapshot();
    assert_eq!(metrics.spawns, 1);
    assert_eq!(metrics.joins, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_coalesce_on_one_startup() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(30));
    let registry = registry(&factory);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_client("/repo", &server("ts")).await })
        })
        .collect();

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap().unwrap());
    }

    assert_eq!(factory.spawns(), 1);
    assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    assert_eq!(registry.client_info()[0].ref_count, 8);
}

#[tokio::test]
async fn test_sequential_acquire_reuses_client() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);
    let ra = server("rust-analyzer");

    let first = registry.get_client("/repo", &ra).await.unwrap();
    registry.release_client("/repo", "rust-analyzer");
    let second = registry.get_client("/repo", &ra).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.spawns(), 1);
    assert_eq!(registry.metrics().snapshot().reuses, 1);
}

#[tokio::test]
async fn test_keys_are_isolated() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);

    let a = registry.get_client("/repo-a", &server("ra")).await.unwrap();
    let b = registry.get_client("/repo-b", &server("ra")).await.unwrap();
    let c = registry.get_client("/repo-a", &server("ts")).await.unwrap();

    assert_eq!(factory.spawns(), 3);
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(b.root, std::path::PathBuf::from("/repo-b"));
    assert_eq!(c.server_id, "ts");
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn test_release_floors_at_zero() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);

    registry.get_client("/repo", &server("ra")).await.unwrap();
    registry.release_client("/repo", "ra");
    registry.release_client("/repo", "ra");
    registry.release_client("/repo", "ra");

    assert_eq!(registry.client_info()[0].ref_count, 0);

    // Releasing an unknown key is a no-op
    registry.release_client("/elsewhere", "ra");
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_dead_client_is_replaced() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);
    let ra = server("ra");

    let first = registry.get_client("/repo", &ra).await.unwrap();
    first.crash();

    let second = registry.get_client("/repo", &ra).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.serial, 2);
    assert_eq!(factory.spawns(), 2);
    // The stale client was stopped on the way out
    assert_eq!(factory.stops(), 1);
    assert_eq!(registry.metrics().snapshot().stale_replacements, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_handshake_failure_reaches_every_joined_caller() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(30));
    factory.set_fail_handshake(true);
    let registry = registry(&factory);
    let ra = server("ra");

    let (a, b) = tokio::join!(
        registry.get_client("/repo", &ra),
        registry.get_client("/repo", &ra)
    );

    for result in [a, b] {
        match result {
            Err(PoolError::Startup(ClientError::Handshake(msg))) => {
                assert_eq!(msg, "server rejected initialize");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected handshake failure"),
        }
    }

    assert_eq!(factory.spawns(), 1);
    // Failed entry is gone before the callers saw the error
    assert!(registry.is_empty());
    assert!(!registry.is_server_initializing("/repo", "ra"));
    assert_eq!(registry.metrics().snapshot().startup_failures, 1);

    // A later call starts fresh and succeeds
    factory.set_fail_handshake(false);
    let client = tokio::time::timeout(Duration::from_secs(2), registry.get_client("/repo", &ra))
        .await
        .expect("get_client hung after a failed startup")
        .unwrap();

    assert_eq!(client.serial, 2);
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_warmup_then_get_joins_startup() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(50));
    let registry = registry(&factory);
    let ra = server("ra");

    assert!(registry.warmup_client("/repo", &ra));
    assert!(!registry.warmup_client("/repo", &ra));
    assert!(registry.is_server_initializing("/repo", "ra"));
    assert_eq!(registry.client_info()[0].ref_count, 0);

    registry.get_client("/repo", &ra).await.unwrap();

    assert_eq!(factory.spawns(), 1);
    assert!(!registry.is_server_initializing("/repo", "ra"));
    assert_eq!(registry.client_info()[0].ref_count, 1);
}

#[tokio::test]
async fn test_warmup_failure_discards_entry() {
    let factory = FakeFactory::new();
    factory.set_fail_handshake(true);
    let registry = registry(&factory);

    assert!(registry.warmup_client("/repo", &server("ra")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(registry.is_empty());
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_is_server_initializing_unknown_key() {
    let factory = FakeFactory::new();
    let registry = registry(&factory);
    assert!(!registry.is_server_initializing("/repo", "ra"));
}

#[tokio::test]
async fn test_cancelled_creator_returns_its_hold() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(50));
    let registry = registry_with(
        &factory,
        PoolConfig {
            idle_timeout: Duration::ZERO,
            sweep_interval: Duration::ZERO,
            ..PoolConfig::default()
        },
    );

    let attempt =
        tokio::time::timeout(Duration::from_millis(10), registry.get_client("/repo", &server("ra")))
            .await;
    assert!(attempt.is_err());

    // Startup still completes in the background
    tokio::time::sleep(Duration::from_millis(100)).await;
    let info = registry.client_info();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].ref_count, 0);
    assert!(!info[0].initializing);

    assert_eq!(registry.sweep_idle(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_cancelled_joiner_leaves_creator_hold() {
    let factory = FakeFactory::new();
    factory.set_handshake_delay(Duration::from_millis(50));
    let registry = registry(&factory);
    let ra = server("ra");

    let creator = {
        let registry = registry.clone();
        let ra = ra.clone();
        tokio::spawn(async move { registry.get_client("/repo", &ra).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let joined = tokio::time::timeout(Duration::from_millis(10), registry.get_client("/repo", &ra)).await;
    assert!(joined.is_err());

    creator.await.unwrap().unwrap();
    assert_eq!(registry.client_info()[0].ref_count, 1);
}
