use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

/// Typed configuration for the monitor.
///
/// Every knob has a default except the webhook URL and the auth token.
#[derive(Clone, Debug)]
pub struct Config {
    // Required
    pub webhook_url: String,
    pub auth_token: String,

    // Transport
    pub websocket_url: String,
    pub handshake_timeout: Duration,
    pub watchdog_interval: Duration,

    // Reconnect
    pub max_reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub reconnect_growth_factor: f64,
    pub reconnect_jitter: Duration,

    // Connection notifications
    pub stable_connection_threshold: Duration,
    pub disconnect_cooldown: Duration,

    // Account notifications
    pub state_change_delay: Duration,
    pub min_notification_interval: Duration,
    pub profile_notification_cooldown: Duration,
    pub health_ping_interval: Duration,
    pub status_summary_interval: Duration,

    // Delivery
    pub notify_min_interval: Duration,

    // Chat logs
    pub logs_directory: PathBuf,

    pub debug_mode: bool,
}

impl Config {
    /// Load from the process environment (after merging `.env`, if present).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let millis = |key: &str, default: u64| {
            Duration::from_millis(
                get(key)
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        let mut missing = Vec::new();
        let webhook_url = get("DISCORD_WEBHOOK_URL").unwrap_or_else(|| {
            missing.push("DISCORD_WEBHOOK_URL");
            String::new()
        });
        let auth_token = get("MINECRAFTAFK_TOKEN").unwrap_or_else(|| {
            missing.push("MINECRAFTAFK_TOKEN");
            String::new()
        });
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        if !webhook_url.starts_with(WEBHOOK_PREFIX) {
            return Err(Error::Config(format!(
                "DISCORD_WEBHOOK_URL must start with {WEBHOOK_PREFIX}"
            )));
        }

        let websocket_url =
            get("WEBSOCKET_URL").unwrap_or_else(|| "wss://minecraftafk.com/ws".to_string());
        let handshake_timeout = millis("HANDSHAKE_TIMEOUT", 10_000);
        let watchdog_interval = millis("WATCHDOG_INTERVAL", 30_000);

        let max_reconnect_attempts = get("MAX_RECONNECT_ATTEMPTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(10);
        let reconnect_interval = millis("RECONNECT_INTERVAL", 1_000);
        let max_reconnect_interval = millis("MAX_RECONNECT_INTERVAL", 30_000);
        let reconnect_growth_factor = get("RECONNECT_GROWTH_FACTOR")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|f| f.is_finite() && *f >= 1.0)
            .unwrap_or(1.5);
        let reconnect_jitter = millis("RECONNECT_JITTER", 1_000);

        let stable_connection_threshold = millis("STABLE_CONNECTION_THRESHOLD", 300_000);
        let disconnect_cooldown = millis("DISCONNECT_COOLDOWN", 120_000);

        let state_change_delay = millis("STATE_CHANGE_DELAY", 10_000);
        let min_notification_interval = millis("MIN_NOTIFICATION_INTERVAL", 60_000);
        let profile_notification_cooldown = millis("PROFILE_NOTIFICATION_COOLDOWN", 120_000);
        let health_ping_interval = millis("DISCORD_PING_INTERVAL", 7_200_000);
        let status_summary_interval = millis("STATUS_SUMMARY_INTERVAL", 7_200_000);

        let notify_min_interval = millis("NOTIFY_MIN_INTERVAL", 500);

        let logs_directory = PathBuf::from(
            get("LOGS_DIRECTORY").unwrap_or_else(|| "/app/chat_logs".to_string()),
        );
        let debug_mode = get("DEBUG_MODE").map(|s| parse_bool(&s)).unwrap_or(false);

        Ok(Self {
            webhook_url,
            auth_token,
            websocket_url,
            handshake_timeout,
            watchdog_interval,
            max_reconnect_attempts,
            reconnect_interval,
            max_reconnect_interval: max_reconnect_interval.max(reconnect_interval),
            reconnect_growth_factor,
            reconnect_jitter,
            stable_connection_threshold,
            disconnect_cooldown,
            state_change_delay,
            min_notification_interval,
            profile_notification_cooldown,
            health_ping_interval,
            status_summary_interval,
            notify_min_interval,
            logs_directory,
            debug_mode,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HOOK: &str = "https://discord.com/api/webhooks/1/abc";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let cfg = Config::from_lookup(lookup(&[
            ("DISCORD_WEBHOOK_URL", HOOK),
            ("MINECRAFTAFK_TOKEN", "tok"),
        ]))
        .unwrap();

        assert_eq!(cfg.websocket_url, "wss://minecraftafk.com/ws");
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(1));
        assert_eq!(cfg.max_reconnect_interval, Duration::from_secs(30));
        assert_eq!(cfg.stable_connection_threshold, Duration::from_secs(300));
        assert_eq!(cfg.disconnect_cooldown, Duration::from_secs(120));
        assert_eq!(cfg.health_ping_interval, Duration::from_secs(7200));
        assert_eq!(cfg.logs_directory, PathBuf::from("/app/chat_logs"));
        assert!(!cfg.debug_mode);
    }

    #[test]
    fn missing_required_values_are_reported_together() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("DISCORD_WEBHOOK_URL"));
        assert!(msg.contains("MINECRAFTAFK_TOKEN"));
    }

    #[test]
    fn rejects_non_discord_webhook() {
        let err = Config::from_lookup(lookup(&[
            ("DISCORD_WEBHOOK_URL", "https://example.com/hook"),
            ("MINECRAFTAFK_TOKEN", "tok"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = Config::from_lookup(lookup(&[
            ("DISCORD_WEBHOOK_URL", HOOK),
            ("MINECRAFTAFK_TOKEN", "tok"),
            ("MAX_RECONNECT_ATTEMPTS", "3"),
            ("RECONNECT_INTERVAL", "not-a-number"),
            ("STATE_CHANGE_DELAY", "250"),
            ("DEBUG_MODE", "true"),
        ]))
        .unwrap();

        assert_eq!(cfg.max_reconnect_attempts, 3);
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(1000));
        assert_eq!(cfg.state_change_delay, Duration::from_millis(250));
        assert!(cfg.debug_mode);
    }
}
