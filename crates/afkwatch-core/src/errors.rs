/// Core error type for the monitor.
///
/// Adapter crates map their library errors into this type so the event loop
/// can treat every failure the same way (log it, then reconnect or drop).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
