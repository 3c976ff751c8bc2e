//! Reconnecting duplex channel to the device.
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Connected ──[close/error]──▶ Backoff(n) ─▶ Connecting
//!                     │                                         │
//!                     └──[connect failed]──▶ Backoff(n)          └──[n > max]──▶ Disconnected
//! ```
//!
//! Backoff is linear: attempt `n` waits `n * base_delay`. The attempt counter
//! resets only when a connection is established. A close requested through
//! [`TransportHandle::close`] ends the task without reconnecting.
//!
//! Every established connection gets a new epoch. Frames sent with
//! [`TransportHandle::send_on`] are bound to one epoch and are never written
//! to a later connection.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::protocol::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once
    /// the ceiling is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            None
        } else {
            Some(self.base_delay * attempt)
        }
    }
}

/// Requests sent on every new connection, in order, without waiting for
/// replies.
pub fn bootstrap_requests() -> [OutboundMessage; 4] {
    [
        OutboundMessage::GetValues,
        OutboundMessage::GetMoistureSensors,
        OutboundMessage::GetSettings,
        OutboundMessage::GetJobList,
    ]
}

// ---------------------------------------------------------------------------
// Connection seam
// ---------------------------------------------------------------------------

/// One established duplex connection carrying text frames.
#[async_trait]
pub trait Link: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    /// Next text frame, or `None` once the peer has closed.
    async fn recv_text(&mut self) -> Option<Result<String>>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self, url: &str) -> Result<Box<dyn Link>>;
}

/// WebSocket connector used against the real device.
pub struct WsConnector;

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&mut self, url: &str) -> Result<Box<dyn Link>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        Ok(Box::new(WsLink { stream }))
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("websocket send failed")
    }

    async fn recv_text(&mut self) -> Option<Result<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; binary frames are not
                // part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(e).context("websocket receive failed")),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .context("websocket close failed")
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum TransportCommand {
    /// `epoch: None` goes out on whatever connection is current.
    Send {
        msg: OutboundMessage,
        epoch: Option<u64>,
    },
    Close,
}

/// Cheap, cloneable sending side of the transport.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
    epoch: watch::Receiver<u64>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Epoch of the current connection, or `None` while not connected.
    pub fn epoch(&self) -> Option<u64> {
        (self.state() == ConnectionState::Connected).then(|| *self.epoch.borrow())
    }

    /// Queue `msg` for transmission. Dropped with a warning when not
    /// connected; the caller is not told.
    pub fn send(&self, msg: OutboundMessage) {
        if self.state() != ConnectionState::Connected {
            warn!(action = msg.action(), state = ?self.state(), "not connected, dropping message");
            return;
        }
        self.queue(msg, None);
    }

    /// Queue `msg` for the connection with the given epoch only. Returns
    /// `false` when that connection is already gone; the frame is dropped.
    pub fn send_on(&self, epoch: u64, msg: OutboundMessage) -> bool {
        if self.epoch() != Some(epoch) {
            warn!(action = msg.action(), epoch, "connection changed, dropping message");
            return false;
        }
        self.queue(msg, Some(epoch))
    }

    fn queue(&self, msg: OutboundMessage, epoch: Option<u64>) -> bool {
        if self.commands.send(TransportCommand::Send { msg, epoch }).is_err() {
            warn!("transport stopped, dropping message");
            return false;
        }
        true
    }

    /// Close the connection without reconnecting.
    pub fn close(&self) {
        let _ = self.commands.send(TransportCommand::Close);
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Application asked to close (or every handle was dropped).
    Closed,
    /// Connection failed or was lost.
    Lost,
}

pub struct Transport<C> {
    url: String,
    policy: ReconnectPolicy,
    connector: C,
    dispatcher: Dispatcher,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    state: watch::Sender<ConnectionState>,
    epoch: watch::Sender<u64>,
}

impl<C: Connector> Transport<C> {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        connector: C,
        dispatcher: Dispatcher,
    ) -> (Self, TransportHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (epoch_tx, epoch_rx) = watch::channel(0);
        let transport = Self {
            url: url.into(),
            policy,
            connector,
            dispatcher,
            commands: cmd_rx,
            state: state_tx,
            epoch: epoch_tx,
        };
        let handle = TransportHandle {
            commands: cmd_tx,
            state: state_rx,
            epoch: epoch_rx,
        };
        (transport, handle)
    }

    /// Run the connection state machine until closed or out of attempts.
    /// Intended to be `tokio::spawn`-ed from main.
    pub async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(url = %self.url, attempt, "connecting");

            let end = match self.connector.connect(&self.url).await {
                Ok(mut link) => {
                    attempt = 0;
                    self.epoch.send_modify(|e| *e += 1);
                    let epoch = *self.epoch.borrow();
                    self.set_state(ConnectionState::Connected);
                    info!(url = %self.url, epoch, "connected");
                    self.serve(link.as_mut(), epoch).await
                }
                Err(e) => {
                    warn!("connect failed: {e:#}");
                    SessionEnd::Lost
                }
            };

            if end == SessionEnd::Closed {
                info!("connection closed");
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            self.discard_pending();
            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                error!(
                    attempts = attempt - 1,
                    "reconnect attempts exhausted, giving up"
                );
                self.set_state(ConnectionState::Disconnected);
                return;
            };

            self.set_state(ConnectionState::Backoff { attempt });
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            if self.wait_backoff(delay).await == SessionEnd::Closed {
                info!("close requested during backoff");
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }

    async fn serve(&mut self, link: &mut dyn Link, epoch: u64) -> SessionEnd {
        for msg in bootstrap_requests() {
            if let Err(e) = write(link, &msg).await {
                warn!("bootstrap request failed: {e:#}");
                return SessionEnd::Lost;
            }
        }

        loop {
            tokio::select! {
                frame = link.recv_text() => match frame {
                    Some(Ok(text)) => {
                        self.dispatcher.dispatch(&text);
                    }
                    Some(Err(e)) => {
                        warn!("connection error: {e:#}");
                        return SessionEnd::Lost;
                    }
                    None => {
                        warn!("connection closed by peer");
                        return SessionEnd::Lost;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(TransportCommand::Send { msg, epoch: Some(bound) }) if bound != epoch => {
                        warn!(action = msg.action(), bound, epoch, "message bound to an earlier connection, dropping");
                    }
                    Some(TransportCommand::Send { msg, .. }) => {
                        if let Err(e) = write(link, &msg).await {
                            warn!(action = msg.action(), "send failed: {e:#}");
                            return SessionEnd::Lost;
                        }
                    }
                    Some(TransportCommand::Close) | None => {
                        if let Err(e) = link.close().await {
                            warn!("close failed: {e:#}");
                        }
                        return SessionEnd::Closed;
                    }
                },
            }
        }
    }

    /// Sleep out the backoff delay unless a close arrives first.
    async fn wait_backoff(&mut self, delay: Duration) -> SessionEnd {
        let timer = sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return SessionEnd::Lost,
                cmd = self.commands.recv() => match cmd {
                    Some(TransportCommand::Send { msg, .. }) => {
                        warn!(action = msg.action(), "not connected, dropping message");
                    }
                    Some(TransportCommand::Close) | None => return SessionEnd::Closed,
                },
            }
        }
    }

    /// Messages queued before the connection dropped are not retried.
    fn discard_pending(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            if let TransportCommand::Send { msg, .. } = cmd {
                warn!(action = msg.action(), "connection lost, dropping queued message");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn write(link: &mut dyn Link, msg: &OutboundMessage) -> Result<()> {
    link.send_text(msg.to_json()?).await
}

// ===========================================================================
// Tests
// ===========================================================================
