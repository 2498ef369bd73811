use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    notify::{port::NotificationSink, types::Notification},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between outbound calls.
    pub min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Webhooks allow roughly 5 requests per 2 seconds.
        Self {
            min_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// NotificationSink decorator that spaces outbound calls.
///
/// Bursts (a roster digest right after a batch of state changes, say) are
/// delayed rather than dropped, which keeps us clear of webhook 429s.
pub struct ThrottledSink {
    inner: Arc<dyn NotificationSink>,
    limiter: Mutex<IntervalLimiter>,
}

impl ThrottledSink {
    pub fn new(inner: Arc<dyn NotificationSink>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            limiter: Mutex::new(IntervalLimiter::new(cfg.min_interval)),
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for ThrottledSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::from_millis(0) {
            sleep(wait).await;
        }
        self.inner.deliver(notification).await
    }
}
