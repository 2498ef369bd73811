use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{ConnectOutcome, Monitor, Phase, TimerKey};
use crate::{
    notify::{Notification, Tone},
    session::disconnect_is_notable,
    transport::{CloseInfo, CLOSE_ABNORMAL},
};

impl Monitor {
    /// Spawn a connect attempt guarded by the handshake timer.
    pub(super) fn start_connect(&mut self) {
        if self.timers.is_shut_down() {
            return;
        }
        self.abort_attempt();

        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        self.phase = Phase::Connecting;
        self.timers
            .schedule(TimerKey::Handshake, self.cfg.handshake_timeout);

        info!(
            attempt = self.session.reconnect_attempts,
            max = self.cfg.max_reconnect_attempts,
            url = %self.cfg.websocket_url,
            "connecting"
        );

        let transport = self.transport.clone();
        let tx = self.connect_tx.clone();
        self.attempt = Some(tokio::spawn(async move {
            let outcome = match transport.open().await {
                Ok(conn) => ConnectOutcome::Connected { attempt, conn },
                Err(err) => ConnectOutcome::Failed { attempt, err },
            };
            let _ = tx.send(outcome);
        }));
    }

    fn abort_attempt(&mut self) {
        if let Some(handle) = self.attempt.take() {
            handle.abort();
        }
    }

    pub(super) async fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        match outcome {
            ConnectOutcome::Connected { attempt, mut conn } => {
                if attempt != self.attempt_seq || self.phase != Phase::Connecting {
                    debug!(attempt, "discarding connection from a superseded attempt");
                    conn.link.close().await;
                    return;
                }
                self.attempt = None;
                self.timers.cancel(&TimerKey::Handshake);
                self.timers.cancel(&TimerKey::Reconnect);
                self.link = Some(conn.link);
                self.inbound = Some(conn.inbound);
                self.phase = Phase::Open;

                let now = Instant::now();
                self.session.mark_open(now);
                info!("connected to MinecraftAFK websocket");

                if self
                    .session
                    .quiet_since_disconnect(now, self.cfg.disconnect_cooldown)
                    && self.policy.take_connection_notice(now)
                {
                    self.notify(Notification::new(
                        "🟢 WebSocket Connected",
                        "Successfully connected to MinecraftAFK WebSocket",
                        Tone::Positive,
                    ))
                    .await;
                }
            }
            ConnectOutcome::Failed { attempt, err } => {
                if attempt != self.attempt_seq || self.phase != Phase::Connecting {
                    return;
                }
                self.attempt = None;
                self.timers.cancel(&TimerKey::Handshake);
                warn!("connect attempt failed: {err}");
                self.schedule_reconnect().await;
            }
        }
    }

    pub(super) async fn on_handshake_timeout(&mut self) {
        if self.phase != Phase::Connecting {
            return;
        }
        warn!(
            timeout_ms = self.cfg.handshake_timeout.as_millis() as u64,
            "handshake timed out; aborting attempt"
        );
        self.abort_attempt();
        // Whatever the aborted attempt may still have queued is now stale.
        self.attempt_seq += 1;
        self.schedule_reconnect().await;
    }

    pub(super) fn on_reconnect_due(&mut self) {
        if self.phase == Phase::ReconnectPending {
            self.start_connect();
        }
    }

    pub(super) async fn on_watchdog(&mut self) {
        debug!(status = ?self.status(), "watchdog");
        if self.session.is_connected || self.phase == Phase::ShuttingDown {
            return;
        }
        if self.timers.is_pending(&TimerKey::Reconnect)
            || self.timers.is_pending(&TimerKey::Handshake)
        {
            return;
        }
        if self.phase != Phase::Terminated {
            warn!("disconnected with no reconnect pending; forcing one");
        }
        self.schedule_reconnect().await;
    }

    pub(super) async fn on_closed(&mut self, close: CloseInfo) {
        self.inbound = None;
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.timers.cancel(&TimerKey::Handshake);

        let now = Instant::now();
        let uptime = self.session.mark_closed(now);
        warn!(
            code = close.code,
            reason = close.reason.as_deref().unwrap_or("Unknown"),
            uptime_secs = uptime.as_secs(),
            "websocket closed"
        );

        if disconnect_is_notable(&close, uptime, self.cfg.stable_connection_threshold)
            && self.policy.take_connection_notice(now)
        {
            self.notify(disconnect_notice(&close, uptime)).await;
        }

        self.schedule_reconnect().await;
    }

    /// Arm the next reconnect, or give up once the attempt budget is spent.
    pub(super) async fn schedule_reconnect(&mut self) {
        if self.timers.is_shut_down() {
            return;
        }
        self.timers.cancel(&TimerKey::Reconnect);

        if self
            .session
            .attempts_exhausted(self.cfg.max_reconnect_attempts)
        {
            self.phase = Phase::Terminated;
            if self.session.take_terminal_notice() {
                error!("max reconnection attempts reached; no further reconnects");
                self.notify(Notification::new(
                    "🚨 Connection Failed",
                    "Maximum reconnection attempts reached. Bot has stopped trying to reconnect.",
                    Tone::Negative,
                ))
                .await;
            }
            return;
        }

        let jitter = self.session.backoff().sample_jitter();
        let delay = self.session.next_reconnect_delay(jitter);
        info!(
            attempt = self.session.reconnect_attempts,
            max = self.cfg.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.phase = Phase::ReconnectPending;
        self.timers.schedule(TimerKey::Reconnect, delay);
    }

    pub(super) async fn shutdown(&mut self) {
        info!("shutting down");
        self.phase = Phase::ShuttingDown;
        self.timers.shutdown();
        self.abort_attempt();

        self.notify(Notification::new(
            "🛑 Bot Shutdown",
            "MinecraftAFK monitoring bot is shutting down",
            Tone::Warning,
        ))
        .await;

        self.inbound = None;
        if let Some(mut link) = self.link.take() {
            link.close().await;
            info!("disconnected from websocket");
        }
    }
}

fn disconnect_notice(close: &CloseInfo, uptime: Duration) -> Notification {
    if close.code == CLOSE_ABNORMAL {
        let minutes = (uptime.as_secs_f64() / 60.0).round() as u64;
        return Notification::new(
            "⚠️ WebSocket Connection Lost",
            format!("Connection lost after {minutes} minutes (Error 1006)"),
            Tone::Negative,
        );
    }

    let mut description = format!("Connection closed with code: {}", close.code);
    if let Some(reason) = &close.reason {
        description.push_str(&format!("\nReason: {reason}"));
    }
    Notification::new("🔴 WebSocket Disconnected", description, Tone::Negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_close_reports_uptime_in_minutes() {
        let n = disconnect_notice(&CloseInfo::abnormal(""), Duration::from_secs(45 * 60 + 40));
        assert_eq!(n.title, "⚠️ WebSocket Connection Lost");
        assert_eq!(n.description, "Connection lost after 46 minutes (Error 1006)");
    }

    #[test]
    fn coded_close_includes_reason_when_present() {
        let n = disconnect_notice(&CloseInfo::new(1000, ""), Duration::ZERO);
        assert_eq!(n.title, "🔴 WebSocket Disconnected");
        assert_eq!(n.description, "Connection closed with code: 1000");
        assert_eq!(n.tone, Tone::Negative);
    }
}
