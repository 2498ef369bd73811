use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the monitor.
///
/// `RUST_LOG` always wins. Without it we log `info` for the workspace crates,
/// or `debug` when the verbose toggle is set.
pub fn init(service_name: &str, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,afkwatch_core={level},afkwatch_discord={level},afkwatch_ws={level},{}={level}",
            service_name.replace('-', "_")
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::External(format!("failed to install tracing subscriber: {e}")))
}
