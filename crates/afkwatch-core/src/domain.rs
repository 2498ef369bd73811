use std::fmt;

/// Upstream account identifier (the in-game username).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============== State Classification ==============

/// Detailed account state as reported by the server's numeric state code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetailedState {
    Offline,
    Connecting,
    Connected,
    Disconnecting,
    Unknown(i64),
}

/// Coarse label used to decide whether a transition deserves a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimplifiedState {
    Online,
    Offline,
}

impl DetailedState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            other => Self::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Offline => "Offline".to_string(),
            Self::Connecting => "Connecting".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Disconnecting => "Disconnecting".to_string(),
            Self::Unknown(code) => format!("Unknown State ({code})"),
        }
    }

    /// Unrecognized codes are treated as offline.
    pub fn simplified(&self) -> SimplifiedState {
        match self {
            Self::Connecting | Self::Connected | Self::Disconnecting => SimplifiedState::Online,
            Self::Offline | Self::Unknown(_) => SimplifiedState::Offline,
        }
    }
}

impl SimplifiedState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        }
    }
}

impl fmt::Display for SimplifiedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for DetailedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Label for a raw state code (`Unknown State (n)` for unrecognized codes).
pub fn detailed_label(code: i64) -> String {
    DetailedState::from_code(code).label()
}

/// Coarse Online/Offline label for a raw state code.
pub fn simplified_label(code: i64) -> &'static str {
    DetailedState::from_code(code).simplified().label()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        assert_eq!(detailed_label(0), "Offline");
        assert_eq!(detailed_label(1), "Connecting");
        assert_eq!(detailed_label(2), "Connected");
        assert_eq!(detailed_label(3), "Disconnecting");
        assert_eq!(simplified_label(0), "Offline");
        for code in 1..=3 {
            assert_eq!(simplified_label(code), "Online");
        }
    }

    #[test]
    fn unknown_codes_are_offline() {
        assert_eq!(detailed_label(9), "Unknown State (9)");
        assert_eq!(simplified_label(9), "Offline");
        assert_eq!(simplified_label(-1), "Offline");
    }
}
