//! Minimum-spacing limiter for external lookups.
//!
//! A caller claims a slot only once it is due. Until then it sleeps outside
//! the lock and checks again, so a caller dropped mid-wait (timeout or
//! cancellation) leaves the schedule untouched.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces successive [`RateLimiter::acquire`] returns by at least `interval`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next slot.
    pub async fn acquire(&self) {
        loop {
            let due = {
                let mut next = self.next_slot.lock().await;
                let now = Instant::now();
                if now >= *next {
                    *next = now + self.interval;
                    return;
                }
                *next
            };
            tokio::time::sleep_until(due).await;
        }
    }
}
