use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use super::*;
use crate::coordination::Connector;
use crate::ensemble::InMemoryEnsemble;
use crate::test_utils::enable_logger;
use crate::test_utils::eventually;
use crate::test_utils::new_session;
use crate::test_utils::EventLog;
use crate::test_utils::FlakyConnector;
use crate::test_utils::Writer;

async fn started_cache(
    connector: Arc<dyn Connector>,
    path: &str,
    mode: StartMode,
) -> (ChildListCache, EventLog) {
    let cache = ChildListCache::new(new_session(connector), path)
        .unwrap()
        .with_start_mode(mode);
    let log = EventLog::default();
    cache.listenable().add(log.listener());
    cache.start().await.unwrap();
    (cache, log)
}

fn names(cache: &ChildListCache) -> Vec<String> {
    cache.children().into_keys().collect()
}

#[tokio::test]
async fn test_initial_snapshot_holds_direct_children_only() {
    enable_logger();
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "parent").await;
    writer.create("/p/b", "2").await;
    writer.create("/p/a", "1").await;
    writer.create("/p/a/deep", "x").await;

    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::BuildInitialCache).await;

    assert_eq!(names(&cache), vec!["a", "b"]);
    assert_eq!(cache.get("a").unwrap().data, Bytes::from_static(b"1"));
    assert!(cache.get("deep").is_none());
    let paths: Vec<String> = cache.current_data().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/p/a", "/p/b"]);
    log.settle().await;
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn test_post_initialized_event_follows_snapshot() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;

    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::PostInitializedEvent).await;

    assert_eq!(names(&cache), vec!["a"]);
    assert_eq!(log.wait_for(1).await, vec![CacheEvent::Initialized]);
}

#[tokio::test]
async fn test_normal_mode_populates_in_background() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    writer.create("/p/b", "2").await;

    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::Normal).await;

    let events = log.wait_for(2).await;
    let added: Vec<&str> = events.iter().filter_map(|e| e.path()).collect();
    assert_eq!(added, vec!["/p/a", "/p/b"]);
    assert!(events.iter().all(|e| matches!(e, CacheEvent::Added(_))));
    assert_eq!(names(&cache), vec!["a", "b"]);
}

#[tokio::test]
async fn test_child_changes_are_diffed() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::BuildInitialCache).await;

    writer.create("/p/b", "2").await;
    let events = log.wait_for(1).await;
    assert!(matches!(&events[0], CacheEvent::Added(r) if r.path == "/p/b"));

    writer.set("/p/a", "1b").await;
    let events = log.wait_for(2).await;
    assert!(matches!(&events[1], CacheEvent::Updated(r) if r.data == Bytes::from_static(b"1b")));

    writer.delete("/p/b").await;
    let events = log.wait_for(3).await;
    assert!(matches!(&events[2], CacheEvent::Removed(r) if r.path == "/p/b"));

    log.settle().await;
    assert_eq!(log.len(), 3);
    assert_eq!(names(&cache), vec!["a"]);
}

#[tokio::test]
async fn test_grandchildren_do_not_produce_events() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    let (_cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::BuildInitialCache).await;

    writer.create("/p/a/grandchild", "x").await;

    log.settle().await;
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn test_suspension_then_reconnect_reflects_remote_state() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    writer.create("/p/b", "2").await;
    let (cache, log) = started_cache(Arc::new(ensemble.clone()), "/p", StartMode::BuildInitialCache).await;

    ensemble.suspend_sessions();
    let events = log.wait_for(1).await;
    assert_eq!(events[0], CacheEvent::ConnectionSuspended);
    assert!(!cache.is_synchronized());

    // sessions opened after the partition are unaffected
    let other = Writer::connect(&ensemble).await;
    other.delete("/p/a").await;
    other.create("/p/c", "3").await;

    ensemble.resume_sessions();
    let events = log
        .wait_until(|events| events.contains(&CacheEvent::ConnectionReconnected))
        .await;

    assert_eq!(events.first(), Some(&CacheEvent::ConnectionSuspended));
    assert_eq!(events.last(), Some(&CacheEvent::ConnectionReconnected));
    assert!(events.iter().any(|e| matches!(e, CacheEvent::Removed(r) if r.path == "/p/a")));
    assert!(events.iter().any(|e| matches!(e, CacheEvent::Added(r) if r.path == "/p/c")));
    assert_eq!(names(&cache), vec!["b", "c"]);
    assert!(cache.is_synchronized());
}

#[tokio::test]
async fn test_parent_deleted_and_recreated() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::BuildInitialCache).await;

    writer.delete("/p/a").await;
    writer.delete("/p").await;
    log.wait_for(1).await;
    log.settle().await;
    assert!(cache.children().is_empty());

    writer.create("/p", "").await;
    writer.create("/p/z", "26").await;
    let events = log
        .wait_until(|events| events.iter().any(|e| e.path() == Some("/p/z")))
        .await;
    assert!(matches!(events.last(), Some(CacheEvent::Added(r)) if r.path == "/p/z"));
    assert_eq!(names(&cache), vec!["z"]);
}

#[tokio::test]
async fn test_clear_forgets_local_state() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    let (cache, log) = started_cache(Arc::new(ensemble), "/p", StartMode::BuildInitialCache).await;

    cache.clear();
    assert!(cache.children().is_empty());

    writer.create("/p/b", "2").await;
    let events = log.wait_for(2).await;
    let added: Vec<&str> = events.iter().filter_map(|e| e.path()).collect();
    assert_eq!(added, vec!["/p/a", "/p/b"]);
    assert_eq!(names(&cache), vec!["a", "b"]);
}

#[tokio::test]
async fn test_failed_rearm_is_reported() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    let connector = FlakyConnector::new(ensemble.clone());
    let fail_reads = connector.switch();
    let (cache, log) = started_cache(Arc::new(connector), "/p", StartMode::BuildInitialCache).await;
    assert!(cache.is_synchronized());

    fail_reads.store(true, Ordering::SeqCst);
    writer.create("/p/a", "1").await;

    let events = log.wait_for(1).await;
    match &events[0] {
        CacheEvent::WatchRegistrationFailed { path, reason } => {
            assert_eq!(path, "/p");
            assert!(reason.contains("injected"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!cache.is_synchronized());
}

#[tokio::test]
async fn test_exhausted_resync_is_reported_then_repaired() {
    let ensemble = InMemoryEnsemble::new();
    let writer = Writer::connect(&ensemble).await;
    writer.create("/p", "").await;
    writer.create("/p/a", "1").await;
    let connector = FlakyConnector::new(ensemble.clone());
    let fail_reads = connector.switch();
    let (cache, log) = started_cache(Arc::new(connector), "/p", StartMode::BuildInitialCache).await;

    ensemble.suspend_sessions();
    log.wait_for(1).await;
    let other = Writer::connect(&ensemble).await;
    other.create("/p/b", "2").await;
    fail_reads.store(true, Ordering::SeqCst);
    ensemble.resume_sessions();

    let events = log
        .wait_until(|events| events.contains(&CacheEvent::ConnectionReconnected))
        .await;
    assert_eq!(events[0], CacheEvent::ConnectionSuspended);
    assert!(matches!(&events[1], CacheEvent::WatchRegistrationFailed { path, .. } if path == "/p"));
    assert_eq!(events[2], CacheEvent::ConnectionReconnected);
    assert!(!cache.is_synchronized());

    fail_reads.store(false, Ordering::SeqCst);
    log.wait_until(|events| events.iter().any(|e| e.path() == Some("/p/b")))
        .await;
    eventually(|| cache.is_synchronized()).await;

    assert_eq!(names(&cache), vec!["a", "b"]);
    let failures = log
        .events()
        .iter()
        .filter(|e| matches!(e, CacheEvent::WatchRegistrationFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}
