//! API Rate Limiter
//!
//! Sliding-window throttle in front of every backend call. A call is allowed
//! when fewer than `max_calls` calls were recorded within the trailing
//! window; otherwise the caller sleeps until the oldest call leaves it.
//! Waiters queue on an async mutex, so they proceed in FIFO order.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::config::EditorConfig;

/// Sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    margin: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration, margin: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            margin,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(
            config.api_rate_limit,
            config.rate_limit_window(),
            config.rate_limit_margin(),
        )
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_for(&self, calls: &VecDeque<Instant>, now: Instant) -> Duration {
        if calls.len() < self.max_calls {
            return Duration::ZERO;
        }
        match calls.front() {
            Some(oldest) => {
                self.window.saturating_sub(now.duration_since(*oldest)) + self.margin
            }
            None => Duration::ZERO,
        }
    }

    /// True if a call could be made right now.
    pub async fn can_make_call(&self) -> bool {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        calls.len() < self.max_calls
    }

    /// Time until the next call slot frees up: `window - (now - oldest) +
    /// margin`, or zero if a slot is free.
    pub async fn wait_time(&self) -> Duration {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        self.wait_for(&calls, now)
    }

    /// Wait for a free slot, record the call, then run `operation`.
    ///
    /// There is no upper bound on the wait.
    pub async fn throttle<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut calls = self.calls.lock().await;
            loop {
                let now = Instant::now();
                self.prune(&mut calls, now);
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    break;
                }
                let wait = self.wait_for(&calls, now);
                warn!(
                    wait_ms = wait.as_millis() as u64,
                    "API rate limit reached, waiting"
                );
                sleep(wait).await;
            }
        }
        operation().await
    }

    /// Timestamps of calls still inside the window.
    pub async fn recorded_calls(&self) -> Vec<Instant> {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        calls.iter().copied().collect()
    }
}
