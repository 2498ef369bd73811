use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Instant;

use crate::{config::Config, transport::CloseInfo};

#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub growth_factor: f64,
    /// Upper bound of the random additive jitter.
    pub jitter: Duration,
}

impl From<&Config> for BackoffConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            base: cfg.reconnect_interval,
            max: cfg.max_reconnect_interval,
            growth_factor: cfg.reconnect_growth_factor,
            jitter: cfg.reconnect_jitter,
        }
    }
}

impl BackoffConfig {
    /// Next delay after `current`: `min(current * growth + jitter, max)`.
    pub fn grow(&self, current: Duration, jitter: Duration) -> Duration {
        current
            .mul_f64(self.growth_factor.max(1.0))
            .saturating_add(jitter)
            .min(self.max)
    }

    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Lifecycle bookkeeping for the transport connection.
///
/// Owned by the monitor loop; nothing else mutates it.
#[derive(Debug)]
pub struct ConnectionSession {
    pub is_connected: bool,
    pub connection_start_time: Option<Instant>,
    pub last_disconnect_time: Option<Instant>,
    pub reconnect_attempts: u32,
    pub current_backoff: Duration,
    pub last_server_ping: Option<DateTime<Utc>>,
    terminal_notified: bool,
    backoff: BackoffConfig,
}

impl ConnectionSession {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            is_connected: false,
            connection_start_time: None,
            last_disconnect_time: None,
            reconnect_attempts: 0,
            current_backoff: backoff.base,
            last_server_ping: None,
            terminal_notified: false,
            backoff,
        }
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// A connection reached `Open`: reset the retry episode.
    pub fn mark_open(&mut self, now: Instant) {
        self.is_connected = true;
        self.connection_start_time = Some(now);
        self.reconnect_attempts = 0;
        self.current_backoff = self.backoff.base;
        self.terminal_notified = false;
    }

    /// A live connection ended. Returns how long it had been up.
    pub fn mark_closed(&mut self, now: Instant) -> Duration {
        let uptime = self.uptime(now);
        self.is_connected = false;
        self.connection_start_time = None;
        self.last_disconnect_time = Some(now);
        uptime
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        self.connection_start_time
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    pub fn attempts_exhausted(&self, max_attempts: u32) -> bool {
        self.reconnect_attempts >= max_attempts
    }

    /// Consume one attempt and return the delay to wait before it; the stored
    /// backoff grows for the attempt after.
    pub fn next_reconnect_delay(&mut self, jitter: Duration) -> Duration {
        self.reconnect_attempts += 1;
        let delay = self.current_backoff;
        self.current_backoff = self.backoff.grow(self.current_backoff, jitter);
        delay
    }

    /// True exactly once per failure episode.
    pub fn take_terminal_notice(&mut self) -> bool {
        if self.terminal_notified {
            return false;
        }
        self.terminal_notified = true;
        true
    }

    /// Time since the last disconnect is at least `window` (or there was none).
    pub fn quiet_since_disconnect(&self, now: Instant, window: Duration) -> bool {
        self.last_disconnect_time
            .map(|t| now.saturating_duration_since(t) >= window)
            .unwrap_or(true)
    }
}

/// Whether a close deserves a user-visible notification (before cooldowns).
///
/// Clean and unexplained closes only count once the connection had proven
/// itself stable; anything with a real close code always counts.
pub fn disconnect_is_notable(close: &CloseInfo, uptime: Duration, stable_threshold: Duration) -> bool {
    if close.is_unexplained() {
        return uptime >= stable_threshold;
    }
    true
}
