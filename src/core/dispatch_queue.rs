//! Windowed admission control for outbound sends.
//!
//! A fixed window admits at most `max_per_window` sends per
//! `window_duration`. The window resets lazily: the first check after it has
//! elapsed starts a new window at that instant. Sends over the limit go to an
//! unbounded FIFO backlog. The backlog is only drained by an explicit
//! [`DispatchQueue::drain`], which admits queued items in order up to the
//! capacity left in the current window. The queue does no compliance
//! checking of its own.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

/// Rate limit settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_per_window: u32,
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 50,
            window_duration: Duration::from_secs(60 * 60),
        }
    }
}

/// Fixed rate-limit window
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub window_duration: Duration,
}

impl RateLimitWindow {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit: config.max_per_window,
            window_duration: config.window_duration,
        }
    }

    /// Start a new window if the current one has elapsed
    pub fn roll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= self.window_duration {
            self.window_start = now;
            self.count = 0;
            return true;
        }
        false
    }

    /// Count one send if the window has room
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    /// Time until the current window ends
    pub fn resets_in(&self, now: Instant) -> Duration {
        (self.window_start + self.window_duration).saturating_duration_since(now)
    }
}

/// Result of a send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// The caller may send the item now
    Sent(T),

    /// The item was appended to the backlog at this 1-based position
    Queued { position: usize },
}

impl<T> Admission<T> {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

/// Snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub backlog: usize,
    pub resets_in_secs: u64,
}

struct QueueState<T> {
    window: RateLimitWindow,
    backlog: VecDeque<T>,
}

/// Rate-limited dispatch queue, one per dispatching agent
pub struct DispatchQueue<T> {
    config: RateLimitConfig,
    state: Mutex<QueueState<T>>,
}

impl<T> DispatchQueue<T> {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = RateLimitWindow::new(&config);
        Self {
            config,
            state: Mutex::new(QueueState {
                window,
                backlog: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit the item if the window has room, otherwise queue it
    pub fn try_send(&self, item: T) -> Admission<T> {
        let mut state = self.lock();

        if state.window.try_acquire(Instant::now()) {
            debug!(count = state.window.count, limit = state.window.limit, "Send admitted");
            return Admission::Sent(item);
        }

        state.backlog.push_back(item);
        let position = state.backlog.len();
        info!(position, limit = state.window.limit, "Rate limit reached, send queued");
        Admission::Queued { position }
    }

    /// Append to the backlog without attempting admission
    pub fn queue(&self, item: T) -> usize {
        let mut state = self.lock();
        state.backlog.push_back(item);
        state.backlog.len()
    }

    /// Admit backlog items in FIFO order while the window has room
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut admitted = Vec::new();

        while !state.backlog.is_empty() && state.window.try_acquire(now) {
            if let Some(item) = state.backlog.pop_front() {
                admitted.push(item);
            }
        }

        if !admitted.is_empty() {
            info!(
                admitted = admitted.len(),
                backlog = state.backlog.len(),
                "Drained dispatch backlog"
            );
        }
        admitted
    }

    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    pub fn status(&self) -> QueueStatus {
        let mut state = self.lock();
        let now = Instant::now();
        state.window.roll(now);
        QueueStatus {
            count: state.window.count,
            limit: state.window.limit,
            remaining: state.window.remaining(),
            backlog: state.backlog.len(),
            resets_in_secs: state.window.resets_in(now).as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_per_window: max,
            window_duration: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_window_counts_and_resets() {
        let mut window = RateLimitWindow::new(&config(1));
        let start = window.window_start;

        assert!(window.try_acquire(start));
        assert!(!window.try_acquire(start + Duration::from_secs(59)));
        assert!(window.try_acquire(start + Duration::from_secs(60)));
        assert_eq!(window.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_positions_are_fifo() {
        let queue = DispatchQueue::new(config(1));

        assert_eq!(queue.try_send("a"), Admission::Sent("a"));
        assert_eq!(queue.try_send("b"), Admission::Queued { position: 1 });
        assert_eq!(queue.try_send("c"), Admission::Queued { position: 2 });
        assert_eq!(queue.queue("d"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_respects_window() {
        let queue = DispatchQueue::new(config(2));
        for item in 1..=5 {
            queue.try_send(item);
        }
        assert_eq!(queue.backlog_len(), 3);

        // window still full
        assert!(queue.drain().is_empty());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(queue.drain(), vec![3, 4]);
        assert_eq!(queue.backlog_len(), 1);

        let status = queue.status();
        assert_eq!(status.count, 2);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.backlog, 1);
    }
}
