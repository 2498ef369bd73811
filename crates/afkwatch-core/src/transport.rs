use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close frame received without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without any close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Why a live connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: Option<String>,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            reason: if reason.trim().is_empty() {
                None
            } else {
                Some(reason)
            },
        }
    }

    /// The link died without a close handshake (reset, EOF, read error).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Clean or unexplained closes carry no information about *why* the link
    /// went away, so they are only worth reporting for long-lived connections.
    pub fn is_unexplained(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_NO_STATUS | CLOSE_ABNORMAL)
    }
}

/// Inbound traffic of one live connection.
///
/// Keep-alive pings are answered inside the adapter and never surface here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed(CloseInfo),
}

/// Write side of a live connection.
#[async_trait]
pub trait Link: Send + Sync {
    /// Close the connection. Must not produce further inbound events.
    async fn close(&mut self);
}

/// A freshly opened connection: its write half plus its inbound event stream.
pub struct Connection {
    pub link: Box<dyn Link>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Port for establishing transport connections (websocket in production).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexplained_closes() {
        assert!(CloseInfo::abnormal("reset").is_unexplained());
        assert!(CloseInfo::new(CLOSE_NORMAL, "").is_unexplained());
        assert!(CloseInfo::new(CLOSE_NO_STATUS, "").is_unexplained());
        assert!(!CloseInfo::new(1011, "server error").is_unexplained());
        assert!(!CloseInfo::new(4000, "kicked").is_unexplained());
    }

    #[test]
    fn blank_reason_is_none() {
        assert_eq!(CloseInfo::new(1001, "  ").reason, None);
        assert_eq!(
            CloseInfo::new(1001, "going away").reason.as_deref(),
            Some("going away")
        );
    }
}
