//! NodeStore behaviour against an in-process ensemble, through the public
//! `Client` entry point.

use bytes::Bytes;
use treewatch::Error;
use treewatch::InMemoryEnsemble;

use crate::common::client;
use crate::enable_logger;

#[tokio::test]
async fn test_absent_paths_report_false() {
    enable_logger();
    let ensemble = InMemoryEnsemble::new();
    let nodes = client(&ensemble).nodes();

    for path in ["/nope", "/nope/deeper", "/a/b/c"] {
        assert!(!nodes.exists(path).await.unwrap(), "{path} should be absent");
    }
}

#[tokio::test]
async fn test_create_then_exists_then_duplicate_create() {
    let ensemble = InMemoryEnsemble::new();
    let nodes = client(&ensemble).nodes();

    nodes.create("/services/api", "v1").await.unwrap();
    assert!(nodes.exists("/services/api").await.unwrap());
    assert!(nodes.exists("/services").await.unwrap());

    let err = nodes.create("/services/api", "v1").await.unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));
}

#[tokio::test]
async fn test_delete_refuses_non_empty_and_force_delete_clears_subtree() {
    let ensemble = InMemoryEnsemble::new();
    let nodes = client(&ensemble).nodes();
    nodes.create("/jobs/1/log", "a").await.unwrap();
    nodes.create("/jobs/2", "b").await.unwrap();

    let err = nodes.delete("/jobs").await.unwrap_err();
    assert!(matches!(err, Error::NodeNotEmpty(_)));

    nodes.force_delete("/jobs").await.unwrap();
    assert!(!nodes.exists("/jobs").await.unwrap());
    assert!(ensemble.descendants("/jobs").is_empty());

    let err = nodes.force_delete("/jobs").await.unwrap_err();
    assert!(matches!(err, Error::NodeMissing(_)));
}

#[tokio::test]
async fn test_update_is_last_write_wins() {
    let ensemble = InMemoryEnsemble::new();
    let nodes = client(&ensemble).nodes();
    nodes.create("/cfg", "payload1").await.unwrap();

    let stat = nodes.update("/cfg", "payload2").await.unwrap();

    assert_eq!(stat.version, 1);
    assert_eq!(nodes.get_data("/cfg").await.unwrap().data, Bytes::from_static(b"payload2"));
}

#[tokio::test]
async fn test_update_of_missing_node_is_an_error() {
    let ensemble = InMemoryEnsemble::new();
    let nodes = client(&ensemble).nodes();

    let err = nodes.update("/ghost", "x").await.unwrap_err();
    assert!(matches!(err, Error::NodeMissing(_)));
}

#[tokio::test]
async fn test_unreachable_ensemble_surfaces_connection_error() {
    let ensemble = InMemoryEnsemble::new();
    ensemble.refuse_connections(true);
    let nodes = client(&ensemble).nodes();

    let err = nodes.exists("/any").await.unwrap_err();

    match err {
        Error::Connection { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ensemble.active_sessions(), 0);
}
