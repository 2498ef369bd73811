//! The monitor event loop.
//!
//! One task owns all mutable state (session, policy, timers, the live link)
//! and processes one input at a time: shutdown, a finished connect attempt,
//! an inbound transport event, or a timer firing. Connect attempts run in
//! their own task and report back over a channel so the loop never blocks on
//! a stalled handshake.

mod connection;
mod dispatch;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    chat::ChatLogStore,
    config::Config,
    domain::{AccountId, SimplifiedState},
    errors::Error,
    notify::{Notification, NotificationSink},
    policy::{NotificationPolicy, PolicyConfig},
    scheduler::TimerSet,
    session::{BackoffConfig, ConnectionSession},
    transport::{Connection, Link, Transport, TransportEvent},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TimerKey {
    Handshake,
    Reconnect,
    Watchdog,
    Settle(AccountId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Open,
    ReconnectPending,
    Terminated,
    ShuttingDown,
}

enum ConnectOutcome {
    Connected { attempt: u64, conn: Connection },
    Failed { attempt: u64, err: Error },
}

enum Next {
    Shutdown,
    Connect(ConnectOutcome),
    Inbound(Option<TransportEvent>),
    Timer(TimerKey),
}

/// Point-in-time view of the monitor, for diagnostics.
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_server_ping: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub uptime: Duration,
    pub accounts: Vec<(AccountId, SimplifiedState)>,
    /// Debounced state changes and the time left until each settles.
    pub pending_changes: Vec<(AccountId, Duration)>,
}

pub struct Monitor {
    cfg: Arc<Config>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn NotificationSink>,
    chat_log: ChatLogStore,

    session: ConnectionSession,
    policy: NotificationPolicy,
    timers: TimerSet<TimerKey>,
    phase: Phase,

    link: Option<Box<dyn Link>>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,

    attempt_seq: u64,
    attempt: Option<JoinHandle<()>>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
}

impl Monitor {
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
        chat_log: ChatLogStore,
    ) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(BackoffConfig::from(cfg.as_ref()));
        let policy = NotificationPolicy::new(PolicyConfig::from(cfg.as_ref()));
        Self {
            cfg,
            transport,
            sink,
            chat_log,
            session,
            policy,
            timers: TimerSet::new(),
            phase: Phase::Idle,
            link: None,
            inbound: None,
            attempt_seq: 0,
            attempt: None,
            connect_tx,
            connect_rx,
        }
    }

    /// Run until `shutdown` is cancelled. Transport failures never end the
    /// loop; only shutdown does.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.timers
            .schedule_every(TimerKey::Watchdog, self.cfg.watchdog_interval);
        self.start_connect();

        loop {
            let next = tokio::select! {
              biased;
              _ = shutdown.cancelled() => Next::Shutdown,
              Some(outcome) = self.connect_rx.recv() => Next::Connect(outcome),
              ev = recv_inbound(&mut self.inbound) => Next::Inbound(ev),
              key = self.timers.next_fired() => Next::Timer(key),
            };

            match next {
                Next::Shutdown => break,
                Next::Connect(outcome) => self.on_connect_outcome(outcome).await,
                Next::Inbound(Some(TransportEvent::Frame(raw))) => self.dispatch(&raw).await,
                Next::Inbound(Some(TransportEvent::Closed(close))) => {
                    self.on_closed(close).await
                }
                Next::Inbound(None) => {
                    self.on_closed(crate::transport::CloseInfo::abnormal("stream ended"))
                        .await
                }
                Next::Timer(key) => self.on_timer(key).await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        let now = Instant::now();
        ConnectionStatus {
            connected: self.session.is_connected,
            last_server_ping: self.session.last_server_ping,
            reconnect_attempts: self.session.reconnect_attempts,
            uptime: self.session.uptime(now),
            accounts: self
                .policy
                .accounts()
                .into_iter()
                .map(|(id, st)| (id, st.simplified))
                .collect(),
            pending_changes: self.policy.pending_changes(now),
        }
    }

    async fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Handshake => self.on_handshake_timeout().await,
            TimerKey::Reconnect => self.on_reconnect_due(),
            TimerKey::Watchdog => self.on_watchdog().await,
            TimerKey::Settle(account) => {
                if let Some(n) = self.policy.settle(&account, Instant::now()) {
                    self.notify(n).await;
                }
            }
        }
    }

    /// Deliver a notification; failures are logged and otherwise ignored.
    async fn notify(&self, notification: Notification) {
        debug!(title = %notification.title, "sending notification");
        if let Err(e) = self.sink.deliver(&notification).await {
            warn!(title = %notification.title, "notification delivery failed: {e}");
        }
    }
}

async fn recv_inbound(
    inbound: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
