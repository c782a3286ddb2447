use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::*;

#[test]
fn test_add_and_remove() {
    let container = ListenerContainer::default();
    let first = container.add(|_: &CacheEvent| {});
    let second = container.add(|_: &CacheEvent| {});

    assert_ne!(first, second);
    assert_eq!(container.len(), 2);
    assert!(container.remove(first));
    assert!(!container.remove(first));
    assert_eq!(container.len(), 1);

    container.clear();
    assert!(container.is_empty());
}

#[test]
fn test_dispatch_in_registration_order() {
    let container = ListenerContainer::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for tag in ["a", "b", "c"] {
        let seen = seen.clone();
        container.add(move |_: &CacheEvent| seen.lock().push(tag));
    }

    container.dispatch(&CacheEvent::Initialized, &AtomicBool::new(false));

    assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
}

#[test]
fn test_dispatch_stops_once_closed() {
    let container = ListenerContainer::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));

    let closer = closed.clone();
    let counter = calls.clone();
    container.add(move |_: &CacheEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        closer.store(true, Ordering::SeqCst);
    });
    let counter = calls.clone();
    container.add(move |_: &CacheEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    container.dispatch(&CacheEvent::ConnectionLost, &closed);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_removed_mid_dispatch_is_skipped() {
    let container = ListenerContainer::default();
    let victim_calls = Arc::new(AtomicUsize::new(0));
    let victim_id = Arc::new(Mutex::new(None));

    let handle = container.clone();
    let id_slot = victim_id.clone();
    container.add(move |_: &CacheEvent| {
        if let Some(id) = *id_slot.lock() {
            handle.remove(id);
        }
    });
    let counter = victim_calls.clone();
    let id = container.add(move |_: &CacheEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    *victim_id.lock() = Some(id);

    container.dispatch(&CacheEvent::Initialized, &AtomicBool::new(false));

    assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
    assert_eq!(container.len(), 1);
}

#[test]
fn test_panicking_listener_does_not_stop_others() {
    let container = ListenerContainer::default();
    let calls = Arc::new(AtomicUsize::new(0));

    container.add(|_: &CacheEvent| panic!("listener bug"));
    let counter = calls.clone();
    container.add(move |_: &CacheEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    container.dispatch(&CacheEvent::ConnectionSuspended, &AtomicBool::new(false));
    container.dispatch(&CacheEvent::ConnectionReconnected, &AtomicBool::new(false));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_adding_from_another_thread_during_dispatch() {
    let container = ListenerContainer::default();
    let adder = container.clone();
    container.add(move |_: &CacheEvent| {
        let adder = adder.clone();
        std::thread::spawn(move || {
            adder.add(|_: &CacheEvent| {});
        })
        .join()
        .unwrap();
    });

    container.dispatch(&CacheEvent::Initialized, &AtomicBool::new(false));

    assert_eq!(container.len(), 2);
}
