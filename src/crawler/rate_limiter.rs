//! Minimum spacing between outbound requests

use crate::config::MAX_WAIT_SECONDS;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between consecutive requests
///
/// `wait()` is a critical section: concurrent callers queue on the lock, so
/// spacing holds even if the limiter is shared between tasks.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_release: Mutex::new(None),
        }
    }

    /// Builds a limiter from a delay in seconds
    ///
    /// Negative or NaN values mean no delay; values past `MAX_WAIT_SECONDS`
    /// are held to it.
    pub fn from_secs_f64(delay_seconds: f64) -> Self {
        Self::new(clamped_secs(delay_seconds))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until `delay` has passed since the previous call returned
    ///
    /// The first call never blocks.
    pub async fn wait(&self) {
        let mut last = self.last_release.lock().await;

        if let Some(previous) = *last {
            if let Some(ready_at) = previous.checked_add(self.delay) {
                if Instant::now() < ready_at {
                    tokio::time::sleep_until(ready_at).await;
                }
            }
        }

        *last = Some(Instant::now());
    }
}

/// Seconds to a `Duration`, held within `0..=MAX_WAIT_SECONDS`
pub(crate) fn clamped_secs(seconds: f64) -> Duration {
    if seconds.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(seconds.clamp(0.0, MAX_WAIT_SECONDS))
}
