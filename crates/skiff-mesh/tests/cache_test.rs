//! Snapshot cache publish, watch and backup behaviour

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::routed_xds;
use skiff_mesh::cache::{SnapshotCache, WatchEvent};
use skiff_mesh::snapshot::XdsSnapshot;
use skiff_mesh::xds::ResourceType;

const NODE: &str = "skiff-system~gateway-proxy";

#[tokio::test]
async fn test_watcher_wakes_once_with_latest() {
    let cache = SnapshotCache::new();
    let mut watch = cache.watch(NODE);

    let a = routed_xds("a_default");
    let b = routed_xds("b_default");
    assert!(cache.set_snapshot(NODE, a).unwrap());
    assert!(cache.set_snapshot(NODE, b.clone()).unwrap());

    let published = watch.changed().await.unwrap().unwrap();
    assert_eq!(published.snapshot.as_ref(), &b);
    assert_eq!(published.generation, 2);

    let second = tokio::time::timeout(Duration::from_millis(50), watch.changed()).await;
    assert!(second.is_err(), "watcher must not wake again without a publish");
}

#[tokio::test]
async fn test_equal_publish_does_not_wake() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, routed_xds("a_default")).unwrap();

    let mut watch = cache.watch(NODE);
    assert!(!cache.set_snapshot(NODE, routed_xds("a_default")).unwrap());

    let woke = tokio::time::timeout(Duration::from_millis(50), watch.changed()).await;
    assert!(woke.is_err());
    assert_eq!(watch.current().unwrap().generation, 1);
}

#[tokio::test]
async fn test_readers_see_whole_snapshots() {
    let cache = Arc::new(SnapshotCache::new());
    let a = routed_xds("a_default");
    let b = routed_xds("b_default");
    cache.set_snapshot(NODE, a.clone()).unwrap();

    let reader = {
        let cache = cache.clone();
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move {
            for _ in 0..200 {
                let current = cache.get_snapshot(NODE).unwrap();
                assert!(current.as_ref() == &a || current.as_ref() == &b);
                tokio::task::yield_now().await;
            }
        })
    };
    for i in 0..100 {
        let next = if i % 2 == 0 { b.clone() } else { a.clone() };
        cache.set_snapshot(NODE, next).unwrap();
        tokio::task::yield_now().await;
    }

    reader.await.unwrap();
}

#[tokio::test]
async fn test_fetch_returns_on_version_change() {
    let cache = Arc::new(SnapshotCache::new());
    let a = routed_xds("a_default");
    let known = a.version(ResourceType::Cluster).to_string();
    cache.set_snapshot(NODE, a).unwrap();

    let fetch = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .fetch_resources(
                    NODE,
                    ResourceType::Cluster,
                    Some(known.as_str()),
                    std::future::pending(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = routed_xds("b_default");
    cache.set_snapshot(NODE, b.clone()).unwrap();

    let resources = fetch.await.unwrap().unwrap().unwrap();
    assert_eq!(resources.version, b.version(ResourceType::Cluster));
    assert!(resources.items.contains_key("b_default"));
}

#[tokio::test]
async fn test_fetch_without_known_version_is_immediate() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, routed_xds("a_default")).unwrap();

    let resources = cache
        .fetch_resources(NODE, ResourceType::Listener, None, std::future::pending())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resources.items.len(), 1);
}

#[tokio::test]
async fn test_fetch_cancelled() {
    let cache = SnapshotCache::new();
    let result = cache
        .fetch_resources(
            NODE,
            ResourceType::Route,
            None,
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_watch_cancelled() {
    let cache = SnapshotCache::new();
    let mut watch = cache.watch(NODE);
    let event = watch
        .changed_or_cancelled(tokio::time::sleep(Duration::from_millis(10)))
        .await
        .unwrap();
    assert!(matches!(event, WatchEvent::Cancelled));
}

#[tokio::test]
async fn test_clear_wakes_with_none() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, routed_xds("a_default")).unwrap();
    let mut watch = cache.watch(NODE);

    cache.clear_snapshot(NODE).unwrap();
    assert!(watch.changed().await.unwrap().is_none());
    assert!(cache.get_snapshot(NODE).is_err());
    assert!(cache.node_ids().is_empty());
}

#[test]
fn test_backup_rehydrates_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.json");
    let snapshot = routed_xds("petstore_default");

    {
        let cache = SnapshotCache::from_backup(&path).unwrap();
        cache.set_snapshot(NODE, snapshot.clone()).unwrap();
        cache
            .set_snapshot("skiff-system~other", XdsSnapshot::empty())
            .unwrap();
    }

    let restarted = SnapshotCache::from_backup(&path).unwrap();
    assert_eq!(restarted.get_snapshot(NODE).unwrap().as_ref(), &snapshot);
    assert_eq!(
        restarted.node_ids(),
        vec!["skiff-system~gateway-proxy", "skiff-system~other"]
    );
    assert!(restarted.stats().backup_enabled);
}

#[test]
fn test_backup_drops_cleared_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.json");

    {
        let cache = SnapshotCache::from_backup(&path).unwrap();
        cache.set_snapshot(NODE, routed_xds("a_default")).unwrap();
        cache.clear_snapshot(NODE).unwrap();
    }

    let restarted = SnapshotCache::from_backup(&path).unwrap();
    assert!(restarted.get_snapshot(NODE).is_err());
}

#[test]
fn test_concurrent_publishes_all_survive_restart() {
    const NODES: usize = 8;

    for round in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");
        let cache = Arc::new(SnapshotCache::from_backup(&path).unwrap());
        let barrier = Arc::new(std::sync::Barrier::new(NODES));

        let publishers: Vec<_> = (0..NODES)
            .map(|i| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let snapshot = routed_xds(&format!("c{}_default", i));
                    barrier.wait();
                    cache.set_snapshot(&format!("node{}", i), snapshot).unwrap();
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }
        assert_eq!(cache.node_ids().len(), NODES);

        let restarted = SnapshotCache::from_backup(&path).unwrap();
        assert_eq!(restarted.node_ids().len(), NODES, "round {}", round);
        for i in 0..NODES {
            assert_eq!(
                restarted.get_snapshot(&format!("node{}", i)).unwrap().as_ref(),
                cache.get_snapshot(&format!("node{}", i)).unwrap().as_ref()
            );
        }
    }
}
