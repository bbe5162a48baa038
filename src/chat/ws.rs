//! Persistent Studio socket with fixed-delay reconnect
//!
//! [`WsTransport`] is a cheap handle over a background supervisor task that
//! owns the actual socket. The supervisor:
//! - connects through a [`SocketConnector`]
//! - forwards outgoing frames and parsed inbound events over channels
//! - publishes the open flag on a `watch` channel
//! - reconnects after [`ReconnectPolicy::delay`] whenever the socket closes or
//!   a connect attempt fails, until cancelled
//!
//! Dropping the handle (or calling [`WsTransport::shutdown`]) cancels the
//! supervisor and closes the socket.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{ChatTransport, EventStream, TransportKind};
use super::types::{ChatRequest, ClientFrame, StreamEvent};
use crate::error::{ChatError, ChatResult};

type Inbound = ChatResult<StreamEvent>;

/// When to retry after the socket drops, and how to keep it alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait between attempts (no backoff)
    pub delay: Duration,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Interval for `ping` frames while the socket is open. `None` sends none.
    pub keepalive: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: None,
            keepalive: None,
        }
    }
}

/// Opens a socket to the Studio endpoint
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    type Socket: Stream<Item = Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + Unpin
        + 'static;

    async fn connect(&self) -> ChatResult<Self::Socket>;

    /// Where this connector points, for logs
    fn describe(&self) -> String;
}

/// Connects to a `ws://` / `wss://` URL
#[derive(Debug, Clone)]
pub struct UrlConnector {
    url: String,
}

impl UrlConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SocketConnector for UrlConnector {
    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> ChatResult<Self::Socket> {
        let (socket, _response) = connect_async(&self.url).await?;
        Ok(socket)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Handle over the socket supervisor
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Inbound>>>,
    open: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Start connecting to `url` in the background
    pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::spawn(UrlConnector::new(url), policy)
    }

    /// Start a supervisor around any connector. Must be called inside a
    /// tokio runtime.
    pub fn spawn<C: SocketConnector>(connector: C, policy: ReconnectPolicy) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            connector,
            policy,
            outbound: outbound_rx,
            inbound: inbound_tx,
            open: open_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run());

        Self {
            outbound: outbound_tx,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            open: open_rx,
            cancel,
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait up to `timeout` for the socket to be open
    pub async fn wait_open(&self, timeout: Duration) -> bool {
        let mut open = self.open.clone();
        let opened = matches!(
            tokio::time::timeout(timeout, open.wait_for(|open| *open)).await,
            Ok(Ok(_))
        );
        opened
    }

    /// Send a keepalive; the backend answers with `pong`
    pub fn ping(&self) -> ChatResult<()> {
        self.send_frame(&ClientFrame::Ping)
    }

    /// Stop the supervisor and close the socket
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send_frame(&self, frame: &ClientFrame) -> ChatResult<()> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        let text = serde_json::to_string(frame).map_err(|e| ChatError::Frame(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|_| ChatError::NotConnected)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ChatTransport for WsTransport {
    async fn open_stream(&self, request: &ChatRequest) -> ChatResult<EventStream> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }

        // One reply at a time; the guard lives as long as the returned stream
        let mut inbound = self.inbound.clone().lock_owned().await;
        while let Ok(stale) = inbound.try_recv() {
            debug!(item = ?stale, "Discarding stale socket event");
        }

        self.send_frame(&request.socket_frame())?;
        debug!(history = request.history.len(), "Prompt sent over socket");

        let events = futures::stream::unfold(Some(inbound), |state| async move {
            let mut inbound = state?;
            match inbound.recv().await {
                Some(item) => {
                    let terminal = match &item {
                        Ok(event) => event.is_terminal(),
                        Err(_) => true,
                    };
                    Some((item, if terminal { None } else { Some(inbound) }))
                }
                // Supervisor gone
                None => Some((Err(ChatError::ConnectionClosed), None)),
            }
        });

        Ok(events.boxed())
    }

    fn is_available(&self) -> bool {
        self.is_open()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

struct Supervisor<C: SocketConnector> {
    connector: C,
    policy: ReconnectPolicy,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
    open: watch::Sender<bool>,
    cancel: CancellationToken,
}

enum PumpExit {
    Cancelled,
    Closed,
}

impl<C: SocketConnector> Supervisor<C> {
    async fn run(mut self) {
        let target = self.connector.describe();
        let mut failures: u32 = 0;

        loop {
            debug!(target = %target, "Connecting studio socket");
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match attempt {
                Ok(socket) => {
                    failures = 0;
                    info!(target = %target, "Studio socket open");
                    self.open.send_replace(true);
                    let exit = self.pump(socket).await;
                    self.open.send_replace(false);
                    if let PumpExit::Cancelled = exit {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(target = %target, attempt = failures, error = %e, "Studio socket connect failed");
                    if let Some(max) = self.policy.max_attempts {
                        if failures >= max {
                            warn!(target = %target, attempts = failures, "Giving up on studio socket");
                            break;
                        }
                    }
                }
            }

            info!(delay = ?self.policy.delay, "Reconnecting studio socket after delay");
            if !self.wait_before_retry().await {
                break;
            }
        }

        self.open.send_replace(false);
        debug!(target = %target, "Studio socket supervisor stopped");
    }

    /// Sleep out the reconnect delay. Frames sent meanwhile are rejected.
    /// Returns false when cancelled.
    async fn wait_before_retry(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.policy.delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(_) = self.outbound.recv() => {
                    let _ = self.inbound.send(Err(ChatError::NotConnected));
                }
            }
        }
    }

    async fn pump(&mut self, socket: C::Socket) -> PumpExit {
        let (mut sink, mut stream) = socket.split();
        let mut keepalive = self
            .policy
            .keepalive
            .map(|every| tokio::time::interval_at(tokio::time::Instant::now() + every, every));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return PumpExit::Cancelled;
                }
                _ = next_tick(&mut keepalive) => {
                    let ping = match serde_json::to_string(&ClientFrame::Ping) {
                        Ok(ping) => ping,
                        Err(e) => {
                            warn!(error = %e, "Cannot encode keepalive");
                            continue;
                        }
                    };
                    debug!("Studio socket keepalive");
                    if let Err(e) = sink.send(WsMessage::Text(ping.into())).await {
                        warn!(error = %e, "Studio socket keepalive failed");
                        let _ = self.inbound.send(Err(ChatError::ConnectionClosed));
                        return PumpExit::Closed;
                    }
                }
                frame = self.outbound.recv() => {
                    let Some(text) = frame else {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return PumpExit::Cancelled;
                    };
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        warn!(error = %e, "Studio socket send failed");
                        let _ = self.inbound.send(Err(ChatError::ConnectionClosed));
                        return PumpExit::Closed;
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.forward(text.as_str()),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Studio socket closed by server");
                        let _ = self.inbound.send(Err(ChatError::ConnectionClosed));
                        return PumpExit::Closed;
                    }
                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Studio socket error");
                        let _ = self.inbound.send(Err(ChatError::ConnectionClosed));
                        return PumpExit::Closed;
                    }
                    None => {
                        info!("Studio socket stream ended");
                        let _ = self.inbound.send(Err(ChatError::ConnectionClosed));
                        return PumpExit::Closed;
                    }
                },
            }
        }
    }

    fn forward(&self, text: &str) {
        match serde_json::from_str::<StreamEvent>(text) {
            Ok(StreamEvent::Pong) => debug!("Studio socket pong"),
            Ok(StreamEvent::Unknown) => debug!(frame = %text, "Ignoring unknown socket event"),
            Ok(event) => {
                let _ = self.inbound.send(Ok(event));
            }
            Err(e) => {
                warn!(error = %e, frame = %text, "Malformed socket frame");
                let _ = self.inbound.send(Err(ChatError::Frame(e.to_string())));
            }
        }
    }
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
