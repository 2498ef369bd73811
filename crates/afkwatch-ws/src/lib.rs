//! Websocket transport adapter.
//!
//! Opens the MinecraftAFK websocket with browser-like headers and the auth
//! cookie, then pumps inbound frames into the core's `TransportEvent`
//! channel. Pings are answered here; the core only ever sees text frames and
//! exactly one close.

use std::{fmt::Display, sync::Arc};

use afkwatch_core::{
    errors::Error,
    transport::{CloseInfo, Connection, Link, Transport, TransportEvent, CLOSE_NO_STATUS},
    Result,
};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::HeaderValue,
        protocol::CloseFrame,
        Message,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const ORIGIN: &str = "https://minecraftafk.com";
const BROWSER_UA: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:139.0) Gecko/20100101 Firefox/139.0";

#[derive(Clone)]
pub struct WsTransport {
    url: String,
    token: String,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the token
        f.debug_struct("WsTransport").field("url", &self.url).finish()
    }
}

impl WsTransport {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    fn build_request(&self) -> Result<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(format!("invalid websocket url: {e}")))?;

        let cookie = HeaderValue::from_str(&format!("token={}; checked=false", self.token))
            .map_err(|_| Error::Config("auth token is not a valid header value".to_string()))?;

        let headers = request.headers_mut();
        headers.insert("Cookie", cookie);
        headers.insert("Origin", HeaderValue::from_static(ORIGIN));
        headers.insert("User-Agent", HeaderValue::from_static(BROWSER_UA));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        headers.insert("Pragma", HeaderValue::from_static("no-cache"));
        Ok(request)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<Connection> {
        let request = self.build_request()?;
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;
        info!(status = %response.status(), "websocket handshake complete");

        let (write, read) = stream.split();
        let write = Arc::new(Mutex::new(write));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(pump(read, write.clone(), tx, cancel.clone()));

        Ok(Connection {
            link: Box::new(WsLink { write, cancel }),
            inbound: rx,
        })
    }
}

/// Write half of a live socket.
struct WsLink<W> {
    write: Arc<Mutex<W>>,
    cancel: CancellationToken,
}

#[async_trait]
impl<W> Link for WsLink<W>
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    async fn close(&mut self) {
        // Stop the pump first so no close event follows a local close.
        self.cancel.cancel();
        let mut write = self.write.lock().await;
        if let Err(e) = write.send(Message::Close(None)).await {
            debug!("close frame not sent: {e}");
        }
        let _ = write.close().await;
    }
}

fn close_info(frame: Option<CloseFrame<'_>>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.into_owned()),
        None => CloseInfo::new(CLOSE_NO_STATUS, ""),
    }
}

/// Forward inbound traffic until the socket closes or the link is closed
/// locally. Emits exactly one `Closed` in the first case and nothing in the
/// second.
async fn pump<R, E, W>(
    mut read: R,
    write: Arc<Mutex<W>>,
    tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let close = loop {
        let msg = tokio::select! {
          _ = cancel.cancelled() => return,
          msg = read.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                if tx.send(TransportEvent::Frame(text)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if tx.send(TransportEvent::Frame(text)).is_err() {
                        return;
                    }
                }
                Err(_) => debug!("dropping non-utf8 binary frame"),
            },
            Some(Ok(Message::Ping(payload))) => {
                debug!("received websocket ping");
                let sent = write.lock().await.send(Message::Pong(payload)).await;
                if let Err(e) = sent {
                    break CloseInfo::abnormal(format!("pong failed: {e}"));
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => break close_info(frame),
            Some(Err(e)) => break CloseInfo::abnormal(e.to_string()),
            None => break CloseInfo::abnormal("stream ended"),
        }
    };

    if !cancel.is_cancelled() {
        let _ = tx.send(TransportEvent::Closed(close));
    }
}
