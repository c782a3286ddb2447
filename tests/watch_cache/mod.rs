//! End-to-end cache behaviour: updates, nested creation, forced deletion,
//! close, and a partition followed by reconnection.

use bytes::Bytes;
use treewatch::CacheEvent;
use treewatch::CacheLifecycle;
use treewatch::InMemoryEnsemble;
use treewatch::StartMode;

use crate::common::client;
use crate::common::paths;
use crate::common::Recorder;
use crate::enable_logger;

#[tokio::test]
async fn test_node_cache_sees_exactly_one_update() {
    enable_logger();
    let ensemble = InMemoryEnsemble::new();
    let client = client(&ensemble);
    client.nodes().create("/app/flag", "off").await.unwrap();

    let cache = client.node_cache("/app/flag").unwrap();
    let recorder = Recorder::default();
    cache.listenable().add(recorder.listener());
    cache.start().await.unwrap();

    client.nodes().update("/app/flag", "payloadX").await.unwrap();

    let events = recorder.wait_for(1).await;
    assert!(matches!(&events[0], CacheEvent::Updated(r) if r.data == Bytes::from_static(b"payloadX")));
    assert_eq!(cache.current_data().unwrap().data, Bytes::from_static(b"payloadX"));
    recorder.settle().await;
    assert_eq!(recorder.events().len(), 1);
}

#[tokio::test]
async fn test_tree_cache_tracks_nested_creation_and_forced_deletion() {
    let ensemble = InMemoryEnsemble::new();
    let client = client(&ensemble);
    client.nodes().create("/R", "").await.unwrap();

    let cache = client
        .tree_cache("/R")
        .unwrap()
        .with_start_mode(StartMode::BuildInitialCache);
    let recorder = Recorder::default();
    cache.listenable().add(recorder.listener());
    cache.start().await.unwrap();

    client.nodes().create("/R/a", "1").await.unwrap();
    recorder.wait_for(1).await;
    client.nodes().create("/R/a/b", "2").await.unwrap();
    let events = recorder
        .wait_until(|events| events.iter().any(|e| e.path() == Some("/R/a/b")))
        .await;
    assert_eq!(paths(&events), vec!["/R/a", "/R/a/b"]);
    assert!(events.iter().all(|e| matches!(e, CacheEvent::Added(_))));
    assert!(cache.get("/R/a").is_some());
    assert!(cache.get("/R/a/b").is_some());

    client.nodes().force_delete("/R/a").await.unwrap();
    let events = recorder
        .wait_until(|events| events.iter().filter(|e| matches!(e, CacheEvent::Removed(_))).count() == 2)
        .await;
    let removed: Vec<&str> = events
        .iter()
        .filter(|e| matches!(e, CacheEvent::Removed(_)))
        .filter_map(|e| e.path())
        .collect();
    assert_eq!(removed, vec!["/R/a/b", "/R/a"]);
    assert!(cache.children_of("/R").unwrap().is_empty());
}

#[tokio::test]
async fn test_closed_caches_stay_silent() {
    let ensemble = InMemoryEnsemble::new();
    let client = client(&ensemble);
    client.nodes().create("/w/x", "1").await.unwrap();

    let node = client.node_cache("/w").unwrap();
    let children = client.children_cache("/w").unwrap();
    let tree = client.tree_cache("/w").unwrap();
    let recorder = Recorder::default();
    node.listenable().add(recorder.listener());
    children.listenable().add(recorder.listener());
    tree.listenable().add(recorder.listener());
    node.start().await.unwrap();
    children.start().await.unwrap();
    tree.start().await.unwrap();
    recorder.wait_until(|events| events.contains(&CacheEvent::Initialized)).await;

    node.close().await.unwrap();
    children.close().await.unwrap();
    tree.close().await.unwrap();
    let before = recorder.events().len();

    client.nodes().update("/w", "changed").await.unwrap();
    client.nodes().create("/w/y", "2").await.unwrap();
    client.nodes().update("/w/x", "changed").await.unwrap();

    recorder.settle().await;
    assert_eq!(recorder.events().len(), before);
    assert_eq!(tree.state(), CacheLifecycle::Closed);
    assert_eq!(ensemble.active_sessions(), 0);
}

#[tokio::test]
async fn test_children_cache_reflects_changes_made_while_suspended() {
    let ensemble = InMemoryEnsemble::new();
    let client = client(&ensemble);
    for child in ["/members/a", "/members/b", "/members/c"] {
        client.nodes().create(child, "up").await.unwrap();
    }

    let cache = client.children_cache("/members").unwrap();
    let recorder = Recorder::default();
    cache.listenable().add(recorder.listener());
    cache.start().await.unwrap();

    ensemble.suspend_sessions();
    recorder.wait_for(1).await;
    client.nodes().delete("/members/b").await.unwrap();
    client.nodes().create("/members/d", "up").await.unwrap();
    ensemble.resume_sessions();

    let events = recorder
        .wait_until(|events| events.contains(&CacheEvent::ConnectionReconnected))
        .await;

    assert_eq!(events.first(), Some(&CacheEvent::ConnectionSuspended));
    assert_eq!(events.last(), Some(&CacheEvent::ConnectionReconnected));
    assert_eq!(cache.children().into_keys().collect::<Vec<_>>(), vec!["a", "c", "d"]);
    assert!(cache.get("b").is_none());
    assert!(cache.is_synchronized());
}
