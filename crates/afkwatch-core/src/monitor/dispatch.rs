use std::sync::OnceLock;

use chrono::SecondsFormat;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Monitor, TimerKey};
use crate::{
    chat::ChatRecord,
    domain::DetailedState,
    notify::{Notification, Tone},
    policy::StateDecision,
    protocol::ServerEvent,
};

/// Account named in a "Connected <id> to server" confirmation.
fn confirmed_account(message: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"Connected (\w+) to server").ok())
        .as_ref()?;
    let caps = re.captures(message)?;
    Some(caps.get(1)?.as_str().to_string())
}

impl Monitor {
    /// Decode one inbound frame and route it. Malformed frames are dropped.
    pub(super) async fn dispatch(&mut self, raw: &str) {
        let event = match ServerEvent::decode(raw) {
            Ok(ev) => ev,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                debug!(raw, "raw frame");
                return;
            }
        };

        match event {
            ServerEvent::ConnectionAck => info!("connection acknowledged"),

            ServerEvent::AccountConnectRequest { account } => {
                info!(%account, "account connection request");
                self.notify(Notification::new(
                    "🔄 Account Connection Initiated",
                    format!("**{account}** connection request initiated"),
                    Tone::Warning,
                ))
                .await;
            }

            ServerEvent::AccountDisconnectRequest { account } => {
                info!(%account, "account disconnection request");
                self.notify(Notification::new(
                    "🔄 Account Disconnection Initiated",
                    format!("**{account}** disconnection request initiated"),
                    Tone::Warning,
                ))
                .await;
            }

            ServerEvent::Heartbeat { at } => {
                let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
                debug!(at = %stamp, "server ping");
                self.session.last_server_ping = Some(at);
                if self.policy.take_health_ping(Instant::now()) {
                    self.notify(Notification::new(
                        "📡 Connection Health Check",
                        format!("Last server ping: {stamp}\nConnection status: Active"),
                        Tone::Info,
                    ))
                    .await;
                }
            }

            ServerEvent::UserProfile(profile) => {
                info!(
                    user = profile.display_name.as_deref().unwrap_or("-"),
                    plan = profile.plan.as_deref().unwrap_or("-"),
                    accounts = profile.accounts.len(),
                    "user profile received"
                );
                let outcome = self
                    .policy
                    .reconcile_roster(&profile.accounts, Instant::now());
                for account in outcome.cancelled {
                    self.timers.cancel(&TimerKey::Settle(account));
                }
                for n in outcome.notices {
                    self.notify(n).await;
                }
            }

            ServerEvent::AccountDisconnected { account, connect } => {
                info!(%account, %connect, "account disconnected");
                self.notify(Notification::new(
                    "🔌 Account Disconnected",
                    format!("**{account}** has been disconnected from the server"),
                    Tone::Negative,
                ))
                .await;
            }

            ServerEvent::Chat(chat) => {
                let record = ChatRecord::from_event(&chat);
                debug!(account = %chat.account, message = %record.message, "chat");
                self.chat_log.append(&record);
            }

            ServerEvent::StateChange { account, state } => {
                let detailed = DetailedState::from_code(state);
                info!(%account, state = %detailed, code = state, "account state change");
                match self.policy.observe_state(&account, detailed, Instant::now()) {
                    StateDecision::Schedule { delay } => {
                        self.timers.schedule(TimerKey::Settle(account), delay);
                    }
                    StateDecision::Reverted | StateDecision::RateLimited => {
                        self.timers.cancel(&TimerKey::Settle(account));
                    }
                    StateDecision::FirstSeen | StateDecision::Unchanged => {}
                }
            }

            ServerEvent::ConnectionConfirmation { message } => {
                info!(%message, "account connection confirmation");
                if let Some(account) = confirmed_account(&message) {
                    self.notify(Notification::new(
                        "✅ Account Connected",
                        format!("**{account}** has successfully connected to the server"),
                        Tone::Positive,
                    ))
                    .await;
                }
            }

            ServerEvent::Unknown { action, params } => {
                debug!(action, %params, "unknown message type");
            }
        }
    }
}
