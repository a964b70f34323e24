// tests/property/queue_test.rs

//! Property-based tests for the bounded outbound queue and fan-out

use crate::test_helpers::{TestContext, drain};
use proptest::prelude::*;
use slipstream::config::Config;
use slipstream::connection::Connection;
use slipstream::core::{Envelope, Role};
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_full_queue_keeps_oldest_messages(
        capacity in 1usize..=16,
        sends in 0usize..=40
    ) {
        let (conn, mut rx) = Connection::new("s-1", Role::Student, capacity);

        let accepted = (0..sends)
            .filter(|i| conn.send(Arc::from(i.to_string())))
            .count();
        prop_assert_eq!(accepted, sends.min(capacity));
        prop_assert_eq!(conn.queued(), sends.min(capacity));

        let mut received = Vec::new();
        while let Ok(text) = rx.try_recv() {
            received.push(text.to_string());
        }
        let expected: Vec<String> = (0..sends.min(capacity)).map(|i| i.to_string()).collect();
        prop_assert_eq!(received, expected);
    }

    #[test]
    fn test_role_broadcast_reaches_every_member(
        admins in 0usize..=12,
        students in 0usize..=12
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::with_config(Config::default());
            let mut admin_rx: Vec<_> = (0..admins)
                .map(|i| ctx.connect(&format!("a-{i}"), Role::Admin))
                .collect();
            let mut student_rx: Vec<_> = (0..students)
                .map(|i| ctx.connect(&format!("s-{i}"), Role::Student))
                .collect();

            let report = ctx
                .dispatcher()
                .broadcast_to_role(Role::Admin, &Envelope::heartbeat());
            assert_eq!(report.recipients, admins);
            assert_eq!(report.delivered, admins);

            for (_, rx) in &mut admin_rx {
                assert_eq!(drain(rx).len(), 1);
            }
            for (_, rx) in &mut student_rx {
                assert!(drain(rx).is_empty());
            }
        });
    }
}
