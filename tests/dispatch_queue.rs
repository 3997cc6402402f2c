//! Dispatch Queue Integration Tests
//!
//! Window admission, queue positions and lazy window reset.

use std::time::Duration;

use outreach::core::{Admission, DispatchQueue, RateLimitConfig};

fn hourly(max_per_window: u32) -> DispatchQueue<&'static str> {
    DispatchQueue::new(RateLimitConfig {
        max_per_window,
        window_duration: Duration::from_secs(3600),
    })
}

#[tokio::test(start_paused = true)]
async fn test_third_send_in_window_is_queued() {
    let queue = hourly(2);

    assert_eq!(queue.try_send("one"), Admission::Sent("one"));
    assert_eq!(queue.try_send("two"), Admission::Sent("two"));
    assert_eq!(queue.try_send("three"), Admission::Queued { position: 1 });

    tokio::time::advance(Duration::from_secs(3600)).await;

    assert_eq!(queue.try_send("four"), Admission::Sent("four"));
    let status = queue.status();
    assert_eq!(status.count, 1);
    assert_eq!(status.backlog, 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_holds_until_duration_elapses() {
    let queue = hourly(1);
    assert!(queue.try_send("one").is_sent());

    tokio::time::advance(Duration::from_secs(3599)).await;
    assert!(!queue.try_send("two").is_sent());
    assert_eq!(queue.status().resets_in_secs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_admits_fifo_up_to_capacity() {
    let queue = hourly(2);
    for item in ["a", "b", "c", "d", "e"] {
        queue.try_send(item);
    }

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(queue.drain(), vec!["c", "d"]);

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(queue.drain(), vec!["e"]);
    assert_eq!(queue.backlog_len(), 0);
    assert_eq!(queue.status().remaining, 1);
}
