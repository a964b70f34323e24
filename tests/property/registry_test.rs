// tests/property/registry_test.rs

//! Property-based tests for registry invariants

use proptest::prelude::*;
use slipstream::connection::transport::close_code;
use slipstream::connection::Connection;
use slipstream::core::{Registry, Role};
use std::collections::HashMap;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_latest_student_session_wins(
        identities in prop::collection::vec(0usize..5, 1..=60)
    ) {
        let registry = Registry::new();
        let mut sessions = Vec::new();
        let mut latest = HashMap::new();

        for i in identities {
            let identity = format!("s-{i}");
            let (conn, rx) = Connection::new(identity.clone(), Role::Student, 4);
            registry.register(conn.clone());
            latest.insert(identity, conn.id());
            sessions.push((conn, rx));
        }

        prop_assert_eq!(registry.counts().students, latest.len());
        for (conn, _) in &sessions {
            let current = latest[conn.identity()];
            if conn.id() == current {
                prop_assert!(!conn.is_closed());
                prop_assert_eq!(registry.lookup(conn.identity()).map(|c| c.id()), Some(current));
            } else {
                prop_assert!(conn.is_closed());
                prop_assert_eq!(conn.close_reason().map(|r| r.code), Some(close_code::REPLACED));
                // Teardown of a displaced session leaves its successor in place.
                prop_assert!(!registry.unregister(conn));
            }
        }
        prop_assert_eq!(registry.counts().students, latest.len());
    }

    #[test]
    fn test_counts_track_register_and_unregister(
        ops in prop::collection::vec((any::<bool>(), any::<bool>()), 1..=80)
    ) {
        let registry = Registry::new();
        let mut live: Vec<(std::sync::Arc<Connection>, _)> = Vec::new();
        let mut next = 0usize;

        for (is_admin, remove) in ops {
            if remove && !live.is_empty() {
                let (conn, _rx) = live.remove(0);
                prop_assert!(registry.unregister(&conn));
                prop_assert!(!registry.unregister(&conn));
            } else {
                let role = if is_admin { Role::Admin } else { Role::Student };
                // Unique identities, so no student is ever evicted here.
                let (conn, rx) = Connection::new(format!("u-{next}"), role, 4);
                next += 1;
                registry.register(conn.clone());
                live.push((conn, rx));
            }
        }

        let admins = live.iter().filter(|(c, _)| c.role() == Role::Admin).count();
        let counts = registry.counts();
        prop_assert_eq!(counts.admins, admins);
        prop_assert_eq!(counts.students, live.len() - admins);
        prop_assert_eq!(registry.snapshot_all().len(), live.len());
    }
}
