// tests/integration/registry_test.rs

//! Integration tests for the connection registry

use slipstream::connection::transport::close_code;
use slipstream::connection::{CloseReason, Connection, EnqueueError};
use slipstream::core::{Registry, Role};
use std::sync::Arc;

#[test]
fn test_register_and_lookup_student() {
    let registry = Registry::new();
    let (conn, _rx) = Connection::new("s-100", Role::Student, 8);

    assert!(registry.register(conn.clone()).is_none());
    let found = registry.lookup("s-100").expect("student should be registered");
    assert_eq!(found.id(), conn.id());
    assert!(registry.is_connected("s-100"));
    assert!(!registry.is_connected("s-200"));
}

#[test]
fn test_reconnect_evicts_previous_student_session() {
    let registry = Registry::new();
    let (first, _rx1) = Connection::new("s-100", Role::Student, 8);
    let (second, _rx2) = Connection::new("s-100", Role::Student, 8);

    registry.register(first.clone());
    let evicted = registry
        .register(second.clone())
        .expect("first session should be evicted");

    assert_eq!(evicted.id(), first.id());
    assert!(first.is_closed());
    assert_eq!(first.close_reason(), Some(CloseReason::replaced()));
    assert_eq!(
        first.close_reason().map(|r| r.code),
        Some(close_code::REPLACED)
    );
    // The eviction closed it; nothing can close it a second time.
    assert!(!first.close());

    assert!(!second.is_closed());
    assert_eq!(registry.lookup("s-100").map(|c| c.id()), Some(second.id()));
    assert_eq!(registry.counts().students, 1);
}

#[test]
fn test_stale_unregister_does_not_remove_successor() {
    let registry = Registry::new();
    let (first, _rx1) = Connection::new("s-100", Role::Student, 8);
    let (second, _rx2) = Connection::new("s-100", Role::Student, 8);

    registry.register(first.clone());
    registry.register(second.clone());

    // The evicted session's teardown runs after the successor registered.
    assert!(!registry.unregister(&first));
    assert_eq!(registry.lookup("s-100").map(|c| c.id()), Some(second.id()));
}

#[test]
fn test_unregister_twice_is_harmless() {
    let registry = Registry::new();
    let (conn, _rx) = Connection::new("a-1", Role::Admin, 8);
    registry.register(conn.clone());

    assert!(registry.unregister(&conn));
    assert!(!registry.unregister(&conn));
    assert!(registry.is_empty());
}

#[test]
fn test_admins_hold_many_sessions() {
    let registry = Registry::new();
    let sessions: Vec<_> = (0..3)
        .map(|_| Connection::new("a-1", Role::Admin, 8))
        .collect();
    for (conn, _) in &sessions {
        assert!(registry.register(conn.clone()).is_none());
    }

    assert_eq!(registry.counts().admins, 3);
    assert!(sessions.iter().all(|(conn, _)| !conn.is_closed()));
    // Admins are not addressable individually.
    assert!(registry.lookup("a-1").is_none());
}

#[test]
fn test_snapshot_is_a_point_in_time_copy() {
    let registry = Registry::new();
    let (a, _rx_a) = Connection::new("a-1", Role::Admin, 8);
    let (s, _rx_s) = Connection::new("s-1", Role::Student, 8);
    registry.register(a.clone());
    registry.register(s.clone());

    let admins = registry.snapshot(Role::Admin);
    let all = registry.snapshot_all();

    let (late, _rx_late) = Connection::new("a-2", Role::Admin, 8);
    registry.register(late);
    registry.unregister(&a);

    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id(), a.id());
    assert_eq!(all.len(), 2);
    assert_eq!(registry.snapshot(Role::Admin).len(), 1);
}

#[test]
fn test_close_all_closes_every_session_once() {
    let registry = Registry::new();
    let mut receivers = Vec::new();
    let mut conns = Vec::new();
    for i in 0..4 {
        let role = if i % 2 == 0 { Role::Student } else { Role::Admin };
        let (conn, rx) = Connection::new(format!("user-{i}"), role, 8);
        registry.register(conn.clone());
        conns.push(conn);
        receivers.push(rx);
    }

    assert_eq!(registry.close_all(CloseReason::shutdown()), 4);
    assert_eq!(registry.close_all(CloseReason::shutdown()), 0);
    for conn in &conns {
        assert_eq!(conn.close_reason(), Some(CloseReason::shutdown()));
        assert_eq!(
            conn.try_send(Arc::from("late")),
            Err(EnqueueError::Closed)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconnects_leave_one_session_per_student() {
    let registry = Arc::new(Registry::new());
    let mut handles = Vec::new();

    for task in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let mut kept = Vec::new();
            for round in 0..50 {
                let identity = format!("s-{}", (task + round) % 5);
                let (conn, rx) = Connection::new(identity, Role::Student, 4);
                registry.register(conn.clone());
                if round % 3 == 0 {
                    registry.unregister(&conn);
                }
                kept.push((conn, rx));
            }
            kept
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let counts = registry.counts();
    assert!(counts.students <= 5);
    for (conn, _) in &all {
        let current = registry.lookup(conn.identity());
        let is_current = current.as_ref().is_some_and(|c| c.id() == conn.id());
        // Every registered session is live; every displaced one was closed.
        if is_current {
            assert!(!conn.is_closed());
        }
    }
    for conn in registry.snapshot(Role::Student) {
        assert!(!conn.is_closed());
    }
}
