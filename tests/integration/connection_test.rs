// tests/integration/connection_test.rs

//! Integration tests for live sessions over the in-memory transport

use crate::integration::test_helpers::{TestContext, fast_session_config};
use bytes::Bytes;
use slipstream::connection::transport::close_code;
use slipstream::connection::{CloseReason, EnqueueError, Frame};
use slipstream::core::protocol::CONNECTED_MESSAGE;
use slipstream::core::{Envelope, NotifierError, Role};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_session_greets_with_connected() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-42", Role::Student);

    let greeting = session.next_envelope().await;
    assert_eq!(greeting["type"], "CONNECTED");
    assert_eq!(greeting["data"]["userId"], "s-42");
    assert_eq!(greeting["data"]["message"], CONNECTED_MESSAGE);
    assert!(greeting["data"]["time"].as_str().unwrap().ends_with('Z'));

    assert!(ctx.registry().is_connected("s-42"));
}

#[tokio::test]
async fn test_messages_arrive_in_enqueue_order() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("a-1", Role::Admin);
    session.next_envelope().await;

    for _ in 0..3 {
        ctx.dispatcher()
            .broadcast_to_role(Role::Admin, &Envelope::heartbeat());
    }
    ctx.dispatcher()
        .broadcast_to_role(Role::Admin, &Envelope::connected("marker", chrono::Utc::now()));

    for _ in 0..3 {
        assert_eq!(session.next_envelope().await["type"], "HEARTBEAT");
    }
    assert_eq!(session.next_envelope().await["data"]["userId"], "marker");
}

#[tokio::test]
async fn test_client_ping_gets_pong() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    assert!(session.peer.push(Frame::Ping(Bytes::from_static(b"probe"))));
    loop {
        match session.next_frame().await {
            Some(Frame::Pong(data)) => {
                assert_eq!(&data[..], b"probe");
                break;
            }
            Some(_) => continue,
            None => panic!("transport dropped before the pong"),
        }
    }
}

#[tokio::test]
async fn test_inbound_text_is_ignored() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    assert!(session.peer.push(Frame::Text("hello server".to_string())));
    assert!(session.peer.push(Frame::Binary(Bytes::from_static(&[1, 2, 3]))));
    assert!(
        ctx.dispatcher()
            .send_to_student("s-1", &Envelope::heartbeat())
    );

    assert_eq!(session.next_envelope().await["type"], "HEARTBEAT");
    assert!(!session.conn.is_closed());
}

#[tokio::test]
async fn test_client_close_frame_ends_session_normally() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-1", Role::Student);

    assert!(session.peer.push(Frame::Close(Some(CloseReason::normal()))));
    assert_eq!(session.expect_close().await, Some(CloseReason::normal()));

    let conn = session.conn.clone();
    assert_eq!(session.finished().await, Some(CloseReason::normal()));
    assert!(conn.is_closed());
    assert!(!ctx.registry().is_connected("s-1"));
}

#[tokio::test]
async fn test_client_protocol_error_close_tears_down() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    let client_reason = CloseReason::new(close_code::PROTOCOL_ERROR, "bad frame");
    assert!(session.peer.push(Frame::Close(Some(client_reason))));
    assert_eq!(session.expect_close().await, Some(CloseReason::normal()));

    let conn = session.conn.clone();
    session.finished().await;
    assert!(conn.is_closed());
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_read_error_unregisters_session() {
    let ctx = TestContext::new();
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    assert!(
        session
            .peer
            .push_error(NotifierError::Transport("connection reset by test".into()))
    );

    let conn = session.conn.clone();
    let mut peer_frames = Vec::new();
    let reason = {
        let handle = session.handle;
        let mut peer = session.peer;
        let reason = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session did not end")
            .expect("session task panicked");
        // The session has ended, so every frame it wrote is already buffered.
        while let Some(frame) = peer.try_next_frame() {
            peer_frames.push(frame);
        }
        reason
    };

    assert_eq!(reason.map(|r| r.code), Some(close_code::ABNORMAL));
    // An abnormal end sends no close frame.
    assert!(peer_frames.iter().all(|f| !f.is_close()));

    assert!(!ctx.registry().is_connected("s-1"));
    assert!(ctx.registry().is_empty());
    assert_eq!(conn.try_send(Arc::from("late")), Err(EnqueueError::Closed));
}

#[tokio::test]
async fn test_hang_up_unregisters_session() {
    let ctx = TestContext::new();
    let session = ctx.open_session("a-1", Role::Admin);
    session.peer.hang_up();

    let reason = session.finished().await;
    assert_eq!(reason.map(|r| r.code), Some(close_code::ABNORMAL));
    assert_eq!(ctx.registry().counts().admins, 0);
}

#[tokio::test]
async fn test_keepalive_sends_ping_then_heartbeat() {
    let ctx = TestContext::with_config(fast_session_config(
        Duration::from_millis(50),
        Duration::from_secs(5),
        Duration::from_secs(1),
    ));
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    loop {
        match session.next_frame().await {
            Some(Frame::Ping(_)) => break,
            Some(other) => panic!("unexpected frame before keepalive: {other:?}"),
            None => panic!("transport dropped before keepalive"),
        }
    }
    assert_eq!(session.next_envelope().await["type"], "HEARTBEAT");
}

#[tokio::test]
async fn test_silent_client_hits_read_deadline() {
    let ctx = TestContext::with_config(fast_session_config(
        Duration::from_secs(10),
        Duration::from_millis(150),
        Duration::from_secs(1),
    ));
    let mut session = ctx.open_session("s-1", Role::Student);

    assert_eq!(session.expect_close().await, Some(CloseReason::read_timeout()));
    assert_eq!(
        session.finished().await.map(|r| r.code),
        Some(close_code::POLICY_VIOLATION)
    );
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_pongs_extend_read_deadline() {
    let ctx = TestContext::with_config(fast_session_config(
        Duration::from_secs(10),
        Duration::from_millis(300),
        Duration::from_secs(1),
    ));
    let session = ctx.open_session("s-1", Role::Student);

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.peer.push(Frame::Pong(Bytes::new())));
    }
    assert!(!session.conn.is_closed());

    assert_eq!(
        session.finished().await.map(|r| r.code),
        Some(close_code::POLICY_VIOLATION)
    );
}

#[tokio::test]
async fn test_reconnect_closes_previous_session() {
    let ctx = TestContext::new();
    let mut first = ctx.open_session("s-7", Role::Student);
    first.next_envelope().await;

    let mut second = ctx.open_session("s-7", Role::Student);
    second.next_envelope().await;

    assert_eq!(first.expect_close().await, Some(CloseReason::replaced()));
    let first_reason = first.finished().await;
    assert_eq!(first_reason.map(|r| r.code), Some(close_code::REPLACED));

    // The evicted session's teardown left the successor in place.
    let current = ctx.registry().lookup("s-7").expect("successor registered");
    assert_eq!(current.id(), second.conn.id());

    assert!(
        ctx.dispatcher()
            .send_to_student("s-7", &Envelope::heartbeat())
    );
    assert_eq!(second.next_envelope().await["type"], "HEARTBEAT");
}

#[tokio::test]
async fn test_stalled_writer_times_out() {
    let ctx = TestContext::with_config(fast_session_config(
        Duration::from_secs(10),
        Duration::from_secs(20),
        Duration::from_millis(100),
    ));
    let mut session = ctx.open_session("s-1", Role::Student);
    session.next_envelope().await;

    session.peer.stall_writes();
    assert!(
        ctx.dispatcher()
            .send_to_student("s-1", &Envelope::heartbeat())
    );

    let reason = session.finished().await;
    assert_eq!(reason.map(|r| r.code), Some(close_code::ABNORMAL));
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_close_all_sends_going_away() {
    let ctx = TestContext::new();
    let mut student = ctx.open_session("s-1", Role::Student);
    let mut admin = ctx.open_session("a-1", Role::Admin);
    student.next_envelope().await;
    admin.next_envelope().await;

    assert_eq!(ctx.registry().close_all(CloseReason::shutdown()), 2);

    assert_eq!(student.expect_close().await, Some(CloseReason::shutdown()));
    assert_eq!(admin.expect_close().await, Some(CloseReason::shutdown()));
    student.finished().await;
    admin.finished().await;
    assert!(ctx.registry().is_empty());
}
