//! Behavioural properties of the relay core, exercised through the public
//! API only: fan-out, isolation, no resurrection, idempotent deregistration,
//! per-session order and the drop-oldest overflow policy.

use std::sync::Arc;
use std::time::Duration;

use tempdeck_bridge::application::{Relay, SessionHandle};
use tempdeck_bridge::domain::{Message, SessionState};

fn msg(i: usize) -> Message {
    Message::from(format!("m{i}"))
}

/// Collects everything currently queued for `handle`.
async fn drain(handle: &mut SessionHandle) -> Vec<Message> {
    let mut got = Vec::new();
    while let Ok(Some(m)) = tokio::time::timeout(Duration::from_millis(20), handle.recv()).await {
        got.push(m);
    }
    got
}

#[tokio::test]
async fn test_every_registered_session_receives_every_message() {
    // Arrange
    let relay = Relay::new(16);
    let mut sessions: Vec<_> = (0..5).map(|_| relay.register().unwrap()).collect();

    // Act
    for i in 0..3 {
        let report = relay.publish(msg(i));
        assert_eq!(report.delivered, 5);
    }

    // Assert
    for session in &mut sessions {
        assert_eq!(drain(session).await, vec![msg(0), msg(1), msg(2)]);
    }
}

#[tokio::test]
async fn test_session_registered_later_sees_only_later_messages() {
    let relay = Relay::new(16);
    let mut early = relay.register().unwrap();
    relay.publish(msg(0));

    let mut late = relay.register().unwrap();
    relay.publish(msg(1));

    assert_eq!(drain(&mut early).await, vec![msg(0), msg(1)]);
    assert_eq!(drain(&mut late).await, vec![msg(1)]);
}

#[tokio::test]
async fn test_stalled_session_does_not_block_publisher_or_others() {
    // Arrange: one session is never read, capacity is tiny
    let relay = Relay::new(2);
    let _stalled = relay.register().unwrap();
    let mut healthy = relay.register().unwrap();

    // Act: far more messages than the stalled queue can hold, each read
    // promptly by the healthy consumer
    let mut received = Vec::new();
    for i in 0..100 {
        relay.publish(msg(i));
        received.push(healthy.recv().await.unwrap());
    }

    // Assert
    assert_eq!(received, (0..100).map(msg).collect::<Vec<_>>());
    assert_eq!(healthy.dropped(), 0);
}

#[tokio::test]
async fn test_deregistered_session_is_never_delivered_to_again() {
    // Arrange
    let relay = Relay::new(8);
    let mut gone = relay.register().unwrap();
    let mut stays = relay.register().unwrap();
    relay.publish(msg(1));

    // Act
    assert!(relay.deregister(&gone.id()));
    let report = relay.publish(msg(2));

    // Assert
    assert_eq!(report.delivered, 1);
    assert_eq!(gone.recv().await, None, "queued messages are discarded on deregister");
    assert_eq!(gone.state(), SessionState::Closed);
    assert_eq!(drain(&mut stays).await, vec![msg(1), msg(2)]);
}

#[tokio::test]
async fn test_deregister_twice_equals_once() {
    let relay = Relay::new(8);
    let a = relay.register().unwrap();
    let _b = relay.register().unwrap();

    assert!(relay.deregister(&a.id()));
    assert!(!relay.deregister(&a.id()));

    assert_eq!(relay.session_count(), 1);
    assert_eq!(relay.publish(msg(0)).delivered, 1);
}

#[tokio::test]
async fn test_overflow_keeps_most_recent_capacity_messages_in_order() {
    // Arrange
    let capacity = 4;
    let relay = Relay::new(capacity);
    let mut paused = relay.register().unwrap();

    // Act: a burst of 10 while the consumer is paused
    let mut overflowed = 0;
    for i in 0..10 {
        overflowed += relay.publish(msg(i)).overflowed;
    }
    let got = drain(&mut paused).await;

    // Assert: exactly the newest `capacity`, oldest first
    assert_eq!(got, vec![msg(6), msg(7), msg(8), msg(9)]);
    assert_eq!(overflowed, 6);
    assert_eq!(paused.dropped(), 6);
    assert_eq!(relay.stats().dropped, 6);
}

#[tokio::test]
async fn test_consumer_resumes_after_overflow_without_seeing_dropped_messages() {
    let relay = Relay::new(2);
    let mut session = relay.register().unwrap();

    for i in 0..5 {
        relay.publish(msg(i));
    }
    let first = session.recv().await.unwrap();
    relay.publish(msg(5));
    let rest = drain(&mut session).await;

    assert_eq!(first, msg(3));
    assert_eq!(rest, vec![msg(4), msg(5)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_give_every_session_the_same_order() {
    // Arrange
    let relay = Relay::new(10_000);
    let mut a = relay.register().unwrap();
    let mut b = relay.register().unwrap();

    // Act: four threads publish interleaved
    let publishers: Vec<_> = (0..4)
        .map(|t| {
            let relay = relay.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..250 {
                    relay.publish(Message::from(format!("t{t}-{i}")));
                }
            })
        })
        .collect();
    for p in publishers {
        p.await.unwrap();
    }

    // Assert: both sessions saw all 1000 messages in one shared order, and
    // each publisher's own messages stay in its order
    let seen_a = drain(&mut a).await;
    let seen_b = drain(&mut b).await;
    assert_eq!(seen_a.len(), 1000);
    assert_eq!(seen_a, seen_b);
    for t in 0..4 {
        let prefix = format!("t{t}-");
        let own: Vec<_> = seen_a
            .iter()
            .filter_map(|m| m.as_text()?.strip_prefix(&prefix)?.parse::<usize>().ok())
            .collect();
        assert_eq!(own, (0..250).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_and_deregister_race_with_publish() {
    // Arrange: a publisher runs flat out while sessions churn
    let relay = Relay::new(4);
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let publisher = {
        let relay = relay.clone();
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || {
            let mut i = 0;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                relay.publish(msg(i));
                i += 1;
            }
        })
    };

    // Act
    for _ in 0..200 {
        let mut session = relay.register().unwrap();
        let id = session.id();
        let _ = tokio::time::timeout(Duration::from_millis(1), session.recv()).await;
        relay.deregister(&id);
        assert_eq!(session.recv().await, None);
    }
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    publisher.await.unwrap();

    // Assert: no session leaked into the registry
    assert_eq!(relay.session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_lets_consumers_drain_then_ends_them() {
    // Arrange
    let relay = Relay::new(8);
    let mut session = relay.register().unwrap();
    relay.publish(msg(0));
    relay.publish(msg(1));

    // Act
    relay.shutdown();

    // Assert
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(session.recv().await, Some(msg(0)));
    assert_eq!(session.recv().await, Some(msg(1)));
    assert_eq!(session.recv().await, None);
    assert_eq!(relay.session_count(), 0);
    assert!(relay.register().is_err());
}
