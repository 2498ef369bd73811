use std::{future::Future, sync::Arc};

use afkwatch_core::{
    chat::ChatLogStore,
    config::Config,
    notify::{
        throttled::{ThrottleConfig, ThrottledSink},
        NotificationSink,
    },
    Monitor,
};
use afkwatch_discord::DiscordWebhook;
use afkwatch_ws::WsTransport;
use anyhow::Context;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load().context("invalid configuration")?);
    afkwatch_core::logging::init("afkwatch", cfg.debug_mode)?;

    let webhook = Arc::new(DiscordWebhook::new(cfg.webhook_url.clone())?);
    let sink: Arc<dyn NotificationSink> = Arc::new(ThrottledSink::new(
        webhook,
        ThrottleConfig {
            min_interval: cfg.notify_min_interval,
        },
    ));
    let transport = Arc::new(WsTransport::new(
        cfg.websocket_url.clone(),
        cfg.auth_token.clone(),
    ));
    let chat_log = ChatLogStore::open(&cfg.logs_directory);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    tracing::info!("starting MinecraftAFK watcher");
    Monitor::new(cfg, transport, sink, chat_log)
        .run(shutdown)
        .await?;
    tracing::info!("bye");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                  _ = signal_or_park("SIGINT", tokio::signal::ctrl_c()) => {}
                  _ = term.recv() => tracing::info!("received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                signal_or_park("SIGINT", tokio::signal::ctrl_c()).await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal_or_park("Ctrl-C", tokio::signal::ctrl_c()).await;
    }
    shutdown.cancel();
}

/// Resolve when the signal arrives. If the handler cannot be installed,
/// never resolve, so a broken handler does not read as a shutdown request.
async fn signal_or_park<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => tracing::info!("received {name}"),
        Err(e) => {
            tracing::warn!("{name} handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    }
}
