//! Decides whether (and when) account activity turns into a notification.
//!
//! Everything here is synchronous and clock-injected: the monitor passes
//! `now` in and arms the timers this module asks for.

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use crate::{
    config::Config,
    domain::{AccountId, DetailedState, SimplifiedState},
    notify::{Notification, Tone},
    protocol::ProfileAccount,
};

#[derive(Clone, Copy, Debug)]
pub struct PolicyConfig {
    pub state_change_delay: Duration,
    pub min_notification_interval: Duration,
    pub profile_notification_cooldown: Duration,
    pub health_ping_interval: Duration,
    pub status_summary_interval: Duration,
    pub connection_cooldown: Duration,
}

impl From<&Config> for PolicyConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            state_change_delay: cfg.state_change_delay,
            min_notification_interval: cfg.min_notification_interval,
            profile_notification_cooldown: cfg.profile_notification_cooldown,
            health_ping_interval: cfg.health_ping_interval,
            status_summary_interval: cfg.status_summary_interval,
            connection_cooldown: cfg.disconnect_cooldown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub detailed: DetailedState,
    pub simplified: SimplifiedState,
}

impl AccountState {
    fn from_detailed(detailed: DetailedState) -> Self {
        Self {
            detailed,
            simplified: detailed.simplified(),
        }
    }
}

/// A significant transition waiting for its debounce timer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingStateChange {
    pub previous_simplified: SimplifiedState,
    pub new_simplified: SimplifiedState,
    pub new_detailed: DetailedState,
    pub scheduled_fire_time: Instant,
}

/// Last-fired timestamps, one per throttle class.
#[derive(Debug, Default)]
struct NotificationThrottle {
    per_account: HashMap<AccountId, Instant>,
    connection: Option<Instant>,
    health_ping: Option<Instant>,
    profile_changes: Option<Instant>,
    digest: Option<Instant>,
}

fn window_elapsed(last: Option<Instant>, now: Instant, window: Duration) -> bool {
    match last {
        Some(at) => now.saturating_duration_since(at) >= window,
        None => true,
    }
}

/// What the caller must do with the debounce timer of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateDecision {
    /// First state ever seen for the account; recorded silently.
    FirstSeen,
    /// Same coarse state as before. Nothing to arm or cancel.
    Unchanged,
    /// Flipped back to where the pending change started; cancel the timer.
    Reverted,
    /// Too soon after the last notification; cancel the timer.
    RateLimited,
    /// (Re)arm the debounce timer.
    Schedule { delay: Duration },
}

/// Result of folding in a roster snapshot.
#[derive(Debug, Default)]
pub struct RosterOutcome {
    /// Batched change notice (if off cooldown) followed by the digest (if due).
    pub notices: Vec<Notification>,
    /// Accounts whose pending change the snapshot reverted.
    pub cancelled: Vec<AccountId>,
}

#[derive(Debug)]
pub struct NotificationPolicy {
    cfg: PolicyConfig,
    roster: HashMap<AccountId, AccountState>,
    pending: HashMap<AccountId, PendingStateChange>,
    throttle: NotificationThrottle,
}

impl NotificationPolicy {
    pub fn new(cfg: PolicyConfig) -> Self {
        Self {
            cfg,
            roster: HashMap::new(),
            pending: HashMap::new(),
            throttle: NotificationThrottle::default(),
        }
    }

    // ============== Per-account state changes ==============

    pub fn observe_state(
        &mut self,
        account: &AccountId,
        detailed: DetailedState,
        now: Instant,
    ) -> StateDecision {
        let next = AccountState::from_detailed(detailed);
        let Some(prev) = self.roster.insert(account.clone(), next) else {
            return StateDecision::FirstSeen;
        };

        if next.simplified == prev.simplified {
            // Keep a pending change pointed at the latest sub-state so that
            // Connecting -> Connected settles as one notification.
            if let Some(p) = self.pending.get_mut(account) {
                p.new_detailed = detailed;
            }
            return StateDecision::Unchanged;
        }

        if let Some(p) = self.pending.remove(account) {
            if p.previous_simplified == next.simplified {
                return StateDecision::Reverted;
            }
        }

        let last = self.throttle.per_account.get(account).copied();
        if !window_elapsed(last, now, self.cfg.min_notification_interval) {
            return StateDecision::RateLimited;
        }

        let delay = self.cfg.state_change_delay;
        self.pending.insert(
            account.clone(),
            PendingStateChange {
                previous_simplified: prev.simplified,
                new_simplified: next.simplified,
                new_detailed: detailed,
                scheduled_fire_time: now + delay,
            },
        );
        StateDecision::Schedule { delay }
    }

    /// The debounce timer for `account` fired.
    ///
    /// Emits only if the live state still matches what was scheduled and the
    /// account is outside its cooldown.
    pub fn settle(&mut self, account: &AccountId, now: Instant) -> Option<Notification> {
        let pending = self.pending.remove(account)?;
        let current = self.roster.get(account)?;
        if current.detailed != pending.new_detailed || current.simplified != pending.new_simplified
        {
            return None;
        }
        let last = self.throttle.per_account.get(account).copied();
        if !window_elapsed(last, now, self.cfg.min_notification_interval) {
            return None;
        }

        self.throttle.per_account.insert(account.clone(), now);
        let tone = match (pending.previous_simplified, pending.new_simplified) {
            (SimplifiedState::Offline, SimplifiedState::Online) => Tone::Positive,
            (SimplifiedState::Online, SimplifiedState::Offline) => Tone::Negative,
            _ => Tone::Info,
        };
        Some(Notification::new(
            "🔄 Account State Change",
            format!(
                "**{account}** state changed to: **{}**",
                pending.new_detailed.label()
            ),
            tone,
        ))
    }

    pub fn pending(&self, account: &AccountId) -> Option<&PendingStateChange> {
        self.pending.get(account)
    }

    pub fn account(&self, account: &AccountId) -> Option<AccountState> {
        self.roster.get(account).copied()
    }

    /// Pending changes with the time left until each one settles.
    pub fn pending_changes(&self, now: Instant) -> Vec<(AccountId, Duration)> {
        let mut out: Vec<_> = self
            .pending
            .iter()
            .map(|(id, p)| (id.clone(), p.scheduled_fire_time.saturating_duration_since(now)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Roster sorted by account id.
    pub fn accounts(&self) -> Vec<(AccountId, AccountState)> {
        let mut out: Vec<_> = self
            .roster
            .iter()
            .map(|(id, st)| (id.clone(), *st))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    // ============== Roster snapshots ==============

    /// Fold a full roster snapshot in.
    ///
    /// Pending changes follow the snapshot the same way they follow state
    /// events: a matching coarse state retargets them, a flip back cancels
    /// them (and the flip is not reported as a change).
    pub fn reconcile_roster(&mut self, accounts: &[ProfileAccount], now: Instant) -> RosterOutcome {
        let mut changes = Vec::new();
        let mut cancelled = Vec::new();
        let mut digest_lines = Vec::with_capacity(accounts.len());

        for acc in accounts {
            let detailed = DetailedState::from_code(acc.state);
            let next = AccountState::from_detailed(detailed);
            let prev = self.roster.insert(acc.username.clone(), next);
            digest_lines.push(format!("**{}**: {}", acc.username, next.simplified));

            if let Some(p) = self.pending.get_mut(&acc.username) {
                if p.new_simplified == next.simplified {
                    p.new_detailed = detailed;
                    continue;
                }
                if p.previous_simplified == next.simplified {
                    self.pending.remove(&acc.username);
                    cancelled.push(acc.username.clone());
                    continue;
                }
            }

            if let Some(prev) = prev {
                if prev.simplified != next.simplified {
                    changes.push((acc.username.clone(), prev.simplified, next.simplified));
                }
            }
        }

        let mut out = Vec::new();

        if !changes.is_empty()
            && window_elapsed(
                self.throttle.profile_changes,
                now,
                self.cfg.profile_notification_cooldown,
            )
        {
            let any_offline = changes
                .iter()
                .any(|(_, _, current)| *current == SimplifiedState::Offline);
            let description = changes
                .iter()
                .map(|(id, from, to)| format!("**{id}**: {from} → {to}"))
                .collect::<Vec<_>>()
                .join("\n");
            out.push(Notification::new(
                "🔄 Account Status Changes",
                description,
                if any_offline {
                    Tone::Negative
                } else {
                    Tone::Positive
                },
            ));
            self.throttle.profile_changes = Some(now);
        }

        if window_elapsed(self.throttle.digest, now, self.cfg.status_summary_interval) {
            let description = if digest_lines.is_empty() {
                "No accounts".to_string()
            } else {
                digest_lines.join("\n")
            };
            out.push(Notification::new(
                "📊 Account Status Summary",
                description,
                Tone::Info,
            ));
            self.throttle.digest = Some(now);
        }

        RosterOutcome {
            notices: out,
            cancelled,
        }
    }

    // ============== Global throttles ==============

    /// Claims the health-ping slot if the interval has elapsed.
    pub fn take_health_ping(&mut self, now: Instant) -> bool {
        if !window_elapsed(self.throttle.health_ping, now, self.cfg.health_ping_interval) {
            return false;
        }
        self.throttle.health_ping = Some(now);
        true
    }

    /// Claims the connection-status slot if the cooldown has elapsed.
    pub fn take_connection_notice(&mut self, now: Instant) -> bool {
        if !window_elapsed(self.throttle.connection, now, self.cfg.connection_cooldown) {
            return false;
        }
        self.throttle.connection = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PolicyConfig {
        PolicyConfig {
            state_change_delay: Duration::from_secs(10),
            min_notification_interval: Duration::from_secs(60),
            profile_notification_cooldown: Duration::from_secs(120),
            health_ping_interval: Duration::from_secs(7200),
            status_summary_interval: Duration::from_secs(7200),
            connection_cooldown: Duration::from_secs(120),
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn steve() -> AccountId {
        AccountId::from("Steve")
    }

    #[test]
    fn first_state_is_recorded_silently() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        assert_eq!(
            p.observe_state(&steve(), DetailedState::Connected, t0),
            StateDecision::FirstSeen
        );
        assert!(p.pending(&steve()).is_none());
        assert_eq!(
            p.account(&steve()).map(|s| s.simplified),
            Some(SimplifiedState::Online)
        );
    }

    #[test]
    fn same_coarse_state_never_schedules() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Connecting, t0);
        for (i, st) in [
            DetailedState::Connected,
            DetailedState::Disconnecting,
            DetailedState::Connected,
        ]
        .into_iter()
        .enumerate()
        {
            assert_eq!(
                p.observe_state(&steve(), st, t0 + secs(i as u64 + 1)),
                StateDecision::Unchanged
            );
        }
        assert!(p.pending(&steve()).is_none());
        assert!(p.settle(&steve(), t0 + secs(100)).is_none());
    }

    #[test]
    fn intermediate_states_coalesce_into_one_notice() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Offline, t0);

        assert_eq!(
            p.observe_state(&steve(), DetailedState::Connecting, t0 + secs(1)),
            StateDecision::Schedule { delay: secs(10) }
        );
        assert_eq!(
            p.observe_state(&steve(), DetailedState::Connected, t0 + secs(3)),
            StateDecision::Unchanged
        );

        let n = p.settle(&steve(), t0 + secs(11)).unwrap();
        assert_eq!(n.title, "🔄 Account State Change");
        assert_eq!(n.description, "**Steve** state changed to: **Connected**");
        assert_eq!(n.tone, Tone::Positive);
        // The timer fires once; a second settle has nothing left.
        assert!(p.settle(&steve(), t0 + secs(12)).is_none());
    }

    #[test]
    fn revert_before_delay_emits_nothing() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Connected, t0);
        assert!(matches!(
            p.observe_state(&steve(), DetailedState::Offline, t0 + secs(1)),
            StateDecision::Schedule { .. }
        ));
        assert_eq!(
            p.observe_state(&steve(), DetailedState::Connected, t0 + secs(2)),
            StateDecision::Reverted
        );
        assert!(p.pending(&steve()).is_none());
        assert!(p.settle(&steve(), t0 + secs(11)).is_none());
    }

    #[test]
    fn notices_are_spaced_by_min_interval() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Connected, t0);
        p.observe_state(&steve(), DetailedState::Offline, t0);
        let n = p.settle(&steve(), t0 + secs(10)).unwrap();
        assert_eq!(n.tone, Tone::Negative);

        // 20s after the notice: dropped outright.
        assert_eq!(
            p.observe_state(&steve(), DetailedState::Connected, t0 + secs(30)),
            StateDecision::RateLimited
        );
        assert!(p.pending(&steve()).is_none());

        // Toggle back and forth; the next flip outside the window schedules.
        p.observe_state(&steve(), DetailedState::Offline, t0 + secs(40));
        assert!(matches!(
            p.observe_state(&steve(), DetailedState::Connected, t0 + secs(75)),
            StateDecision::Schedule { .. }
        ));
        assert!(p.settle(&steve(), t0 + secs(85)).is_some());
    }

    fn steve_at(state: i64) -> Vec<ProfileAccount> {
        vec![ProfileAccount {
            username: steve(),
            state,
        }]
    }

    #[test]
    fn snapshot_retargets_pending_change() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Offline, t0);
        p.observe_state(&steve(), DetailedState::Connecting, t0 + secs(1));

        let outcome = p.reconcile_roster(&steve_at(2), t0 + secs(3));
        assert!(outcome.cancelled.is_empty());
        assert!(outcome
            .notices
            .iter()
            .all(|n| n.title != "🔄 Account Status Changes"));

        let n = p.settle(&steve(), t0 + secs(11)).unwrap();
        assert_eq!(n.description, "**Steve** state changed to: **Connected**");
        assert_eq!(n.tone, Tone::Positive);
    }

    #[test]
    fn snapshot_flip_back_cancels_pending_change() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Offline, t0);
        p.observe_state(&steve(), DetailedState::Connected, t0 + secs(1));

        let outcome = p.reconcile_roster(&steve_at(0), t0 + secs(3));
        assert_eq!(outcome.cancelled, vec![steve()]);
        assert!(outcome
            .notices
            .iter()
            .all(|n| n.title != "🔄 Account Status Changes"));
        assert!(p.pending(&steve()).is_none());
        assert!(p.settle(&steve(), t0 + secs(11)).is_none());
    }

    #[test]
    fn pending_changes_report_time_left() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        p.observe_state(&steve(), DetailedState::Offline, t0);
        p.observe_state(&steve(), DetailedState::Connected, t0);
        assert_eq!(p.pending_changes(t0 + secs(4)), vec![(steve(), secs(6))]);
        assert_eq!(p.pending_changes(t0 + secs(40)), vec![(steve(), Duration::ZERO)]);
    }

    #[test]
    fn roster_changes_are_batched_with_own_cooldown() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        let snap = |a: i64, b: i64| {
            vec![
                ProfileAccount {
                    username: AccountId::from("Steve"),
                    state: a,
                },
                ProfileAccount {
                    username: AccountId::from("Alex"),
                    state: b,
                },
            ]
        };

        // First snapshot: no prior states, only the digest.
        let out = p.reconcile_roster(&snap(2, 0), t0).notices;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "📊 Account Status Summary");
        assert_eq!(out[0].description, "**Steve**: Online\n**Alex**: Offline");

        let out = p.reconcile_roster(&snap(0, 2), t0 + secs(60)).notices;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "🔄 Account Status Changes");
        assert_eq!(
            out[0].description,
            "**Steve**: Online → Offline\n**Alex**: Offline → Online"
        );
        assert_eq!(out[0].tone, Tone::Negative);

        // Inside the 120s cooldown.
        assert!(p.reconcile_roster(&snap(2, 2), t0 + secs(120)).notices.is_empty());

        let out = p.reconcile_roster(&snap(0, 2), t0 + secs(200)).notices;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tone, Tone::Negative);

        let out = p.reconcile_roster(&snap(0, 2), t0 + secs(7200)).notices;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "📊 Account Status Summary");
    }

    #[test]
    fn global_slots_are_claimed_once_per_window() {
        let mut p = NotificationPolicy::new(cfg());
        let t0 = Instant::now();
        assert!(p.take_health_ping(t0));
        assert!(!p.take_health_ping(t0 + secs(3600)));
        assert!(p.take_health_ping(t0 + secs(7200)));

        assert!(p.take_connection_notice(t0));
        assert!(!p.take_connection_notice(t0 + secs(119)));
        assert!(p.take_connection_notice(t0 + secs(120)));
    }
}
