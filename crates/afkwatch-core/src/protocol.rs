//! Inbound frame decoding.
//!
//! Every frame is a JSON object `{ "action": <int>, "params": <any> }`. The
//! shape of `params` depends on `action`, so we decode at the boundary into
//! [`ServerEvent`] and keep an explicit `Unknown` variant for anything else.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::{domain::AccountId, errors::Error, Result};

pub const ACTION_CONNECTION_ACK: i64 = 0;
pub const ACTION_ACCOUNT_CONNECT: i64 = 3;
pub const ACTION_HEARTBEAT_OR_DISCONNECT: i64 = 4;
pub const ACTION_USER_PROFILE: i64 = 7;
pub const ACTION_ACCOUNT_DISCONNECTED: i64 = 11;
pub const ACTION_CHAT: i64 = 12;
pub const ACTION_STATE_CHANGE: i64 = 13;
pub const ACTION_CONNECTION_CONFIRMATION: i64 = 14;

#[derive(Debug, Deserialize)]
struct RawFrame {
    action: Option<i64>,
    #[serde(default)]
    params: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProfileAccount {
    pub username: AccountId,
    pub state: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub plan: Option<String>,
    pub accounts: Vec<ProfileAccount>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatEvent {
    pub account: AccountId,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    ConnectionAck,
    AccountConnectRequest { account: AccountId },
    AccountDisconnectRequest { account: AccountId },
    Heartbeat { at: DateTime<Utc> },
    UserProfile(UserProfile),
    AccountDisconnected { account: AccountId, connect: Value },
    Chat(ChatEvent),
    StateChange { account: AccountId, state: i64 },
    ConnectionConfirmation { message: String },
    Unknown { action: i64, params: Value },
}

// Wire shapes of the individual params payloads.

#[derive(Deserialize)]
struct AccountParams {
    account: String,
}

#[derive(Deserialize)]
struct ProfileParams {
    #[serde(default)]
    discord_display: Option<String>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(default)]
    accounts: Vec<ProfileAccountParams>,
}

#[derive(Deserialize)]
struct ProfileAccountParams {
    username: String,
    state: i64,
}

#[derive(Deserialize)]
struct DisconnectedParams {
    account: String,
    #[serde(default)]
    connect: Value,
}

#[derive(Deserialize)]
struct ChatParams {
    account: String,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct StateParams {
    account: String,
    state: i64,
}

impl ServerEvent {
    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> Result<Self> {
        let frame: RawFrame = serde_json::from_str(raw)?;
        let Some(action) = frame.action else {
            return Err(Error::Protocol("frame has no action".to_string()));
        };
        Self::from_parts(action, frame.params)
    }

    pub fn from_parts(action: i64, params: Value) -> Result<Self> {
        let event = match action {
            ACTION_CONNECTION_ACK => Self::ConnectionAck,
            ACTION_ACCOUNT_CONNECT => {
                let p: AccountParams = params_as(action, params)?;
                Self::AccountConnectRequest {
                    account: AccountId(p.account),
                }
            }
            ACTION_HEARTBEAT_OR_DISCONNECT => match params {
                // Numeric params are the server clock in epoch milliseconds.
                Value::Number(n) => {
                    let millis = n
                        .as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .ok_or_else(|| Error::Protocol(format!("bad heartbeat timestamp: {n}")))?;
                    let at = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                        Error::Protocol(format!("heartbeat timestamp out of range: {millis}"))
                    })?;
                    Self::Heartbeat { at }
                }
                Value::String(account) => Self::AccountDisconnectRequest {
                    account: AccountId(account),
                },
                other => {
                    return Err(Error::Protocol(format!(
                        "action 4 expects a number or a string, got {other}"
                    )))
                }
            },
            ACTION_USER_PROFILE => {
                let p: ProfileParams = params_as(action, params)?;
                Self::UserProfile(UserProfile {
                    display_name: p.discord_display,
                    plan: p.plan,
                    accounts: p
                        .accounts
                        .into_iter()
                        .map(|a| ProfileAccount {
                            username: AccountId(a.username),
                            state: a.state,
                        })
                        .collect(),
                })
            }
            ACTION_ACCOUNT_DISCONNECTED => {
                let p: DisconnectedParams = params_as(action, params)?;
                Self::AccountDisconnected {
                    account: AccountId(p.account),
                    connect: p.connect,
                }
            }
            ACTION_CHAT => {
                let p: ChatParams = params_as(action, params)?;
                Self::Chat(ChatEvent {
                    account: AccountId(p.account),
                    timestamp: parse_timestamp(&p.timestamp),
                    data: p.data,
                })
            }
            ACTION_STATE_CHANGE => {
                let p: StateParams = params_as(action, params)?;
                Self::StateChange {
                    account: AccountId(p.account),
                    state: p.state,
                }
            }
            ACTION_CONNECTION_CONFIRMATION => match params {
                Value::String(message) => Self::ConnectionConfirmation { message },
                other => {
                    return Err(Error::Protocol(format!(
                        "action 14 expects a string, got {other}"
                    )))
                }
            },
            _ => Self::Unknown { action, params },
        };
        Ok(event)
    }
}

fn params_as<T: serde::de::DeserializeOwned>(action: i64, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::Protocol(format!("action {action}: invalid params: {e}")))
}

/// Epoch milliseconds (number or numeric string) or an RFC3339 string.
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => {
            if let Ok(millis) = s.trim().parse::<i64>() {
                return DateTime::<Utc>::from_timestamp_millis(millis);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}
