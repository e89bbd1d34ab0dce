//! Networked transport: STOMP over WebSocket.
//!
//! [`LiveTransport`] performs the WebSocket handshake and the STOMP
//! CONNECT exchange, then hands the socket to a background IO task that
//! multiplexes outbound commands and inbound frames. Deliveries are routed
//! to handlers by the `subscription` header. Malformed frames and bodies
//! are logged and dropped; the subscription keeps running.
//!
//! When the socket closes or errors, the IO task forgets every
//! subscription and flips the link watch to `false`. Reconnecting is the
//! connection manager's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::stomp::{Command, Frame};
use super::{ConnectOptions, MessageHandler, Transport, TransportToken};
use crate::config::RealtimeConfig;
use crate::domain::{Address, ChatMessage, OutboundMessage, SendDestination};
use crate::error::RealtimeError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for [`LiveTransport`].
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Full handshake URL (`ws://host:port/path`).
    pub url: String,
    /// Bound on the WebSocket handshake and on the STOMP CONNECTED reply.
    pub connect_timeout: Duration,
}

impl From<&RealtimeConfig> for LiveConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            url: config.socket_url(),
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Requests from the public API to the IO task.
enum LinkCommand {
    Frame {
        frame: Frame,
        ack: Option<oneshot::Sender<Result<(), RealtimeError>>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

struct LiveSubscription {
    address: Address,
    handler: MessageHandler,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct LinkSlot {
    commands: Option<mpsc::UnboundedSender<LinkCommand>>,
    generation: u64,
}

struct LiveInner {
    config: LiveConfig,
    link: watch::Sender<bool>,
    slot: Mutex<LinkSlot>,
    subs: Mutex<HashMap<TransportToken, LiveSubscription>>,
    connect_gate: tokio::sync::Mutex<()>,
    next_token: AtomicU64,
}

/// STOMP-over-WebSocket transport; cheap to clone, clones share the link.
#[derive(Clone)]
pub struct LiveTransport {
    inner: Arc<LiveInner>,
}

impl std::fmt::Debug for LiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTransport")
            .field("url", &self.inner.config.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl LiveTransport {
    /// Creates a disconnected transport.
    #[must_use]
    pub fn new(config: LiveConfig) -> Self {
        let (link, _) = watch::channel(false);
        Self {
            inner: Arc::new(LiveInner {
                config,
                link,
                slot: Mutex::new(LinkSlot::default()),
                subs: Mutex::new(HashMap::new()),
                connect_gate: tokio::sync::Mutex::new(()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    fn commands(&self) -> Option<mpsc::UnboundedSender<LinkCommand>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .clone()
    }

    async fn handshake(&self, options: &ConnectOptions) -> Result<Socket, RealtimeError> {
        let config = &self.inner.config;
        let (mut ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| {
                RealtimeError::ConnectionFailed(format!(
                    "handshake with {} timed out after {} ms",
                    config.url,
                    config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host_of(&config.url))
            .header("heart-beat", "0,0");
        if let Some(token) = &options.token {
            connect = connect.header("Authorization", format!("Bearer {token}"));
        }
        ws.send(Message::text(connect.encode()))
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tokio::time::timeout(config.connect_timeout, await_connected(&mut ws))
            .await
            .map_err(|_| {
                RealtimeError::ConnectionFailed("broker did not answer CONNECT".to_string())
            })??;
        Ok(ws)
    }
}

async fn await_connected(ws: &mut Socket) -> Result<(), RealtimeError> {
    while let Some(message) = ws.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(RealtimeError::ConnectionFailed(e.to_string())),
        };
        match Frame::parse(&text)? {
            Some(frame) if frame.command == Command::Connected => return Ok(()),
            Some(frame) if frame.command == Command::Error => {
                return Err(RealtimeError::ConnectionFailed(format!(
                    "broker rejected CONNECT: {}",
                    frame.get("message").unwrap_or(frame.body.as_str())
                )));
            }
            _ => {}
        }
    }
    Err(RealtimeError::ConnectionFailed(
        "socket closed during STOMP handshake".to_string(),
    ))
}

fn host_of(url: &str) -> String {
    url.parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

impl LiveInner {
    /// Forgets all subscriptions and marks the link down, unless a newer
    /// link has replaced the one identified by `generation`.
    fn teardown(&self, generation: u64) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.generation != generation {
                return;
            }
            slot.commands = None;
        }
        self.subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .for_each(|(_, sub)| sub.active.store(false, Ordering::SeqCst));
        self.link.send_if_modified(|up| std::mem::replace(up, false));
    }

    fn handle_text(&self, raw: &str) {
        let frame = match Frame::parse(raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed broker frame");
                return;
            }
        };
        match frame.command {
            Command::Message => self.route(&frame),
            Command::Error => {
                tracing::error!(
                    reason = frame.get("message").unwrap_or_default(),
                    body = %frame.body,
                    "broker reported error"
                );
            }
            other => tracing::debug!(command = %other, "ignoring broker frame"),
        }
    }

    fn route(&self, frame: &Frame) {
        let target = {
            let subs = self.subs.lock().unwrap_or_else(PoisonError::into_inner);
            let by_id = frame
                .get("subscription")
                .and_then(|id| id.strip_prefix("sub-"))
                .and_then(|raw| raw.parse::<u64>().ok())
                .and_then(|raw| subs.get(&TransportToken::new(raw)));
            let by_destination = || {
                let destination = frame.get("destination")?;
                subs.values()
                    .find(|s| s.address.destination() == destination)
            };
            by_id.or_else(by_destination).map(|s| {
                (
                    s.address,
                    Arc::clone(&s.handler),
                    Arc::clone(&s.active),
                )
            })
        };
        let Some((address, handler, active)) = target else {
            tracing::debug!(
                subscription = frame.get("subscription").unwrap_or_default(),
                "message for unknown subscription"
            );
            return;
        };
        match ChatMessage::from_wire(&frame.body, address.room_id()) {
            Ok(message) => {
                if active.load(Ordering::SeqCst) {
                    handler(message);
                }
            }
            Err(e) => {
                tracing::warn!(%address, error = %e, body = %frame.body, "dropping malformed message");
            }
        }
    }
}

/// Owns the socket: writes queued frames, reads and routes broker frames.
async fn run_link(
    inner: Arc<LiveInner>,
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    generation: u64,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Frame { frame, ack }) => {
                        let result = ws_tx
                            .send(Message::text(frame.encode()))
                            .await
                            .map_err(RealtimeError::from);
                        let failed = result.is_err();
                        match ack {
                            Some(ack) => {
                                let _ = ack.send(result);
                            }
                            None => {
                                if let Err(e) = result {
                                    tracing::warn!(error = %e, command = %frame.command, "failed to write frame");
                                }
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(LinkCommand::Close { done }) => {
                        let _ = ws_tx
                            .send(Message::text(Frame::new(Command::Disconnect).encode()))
                            .await;
                        let _ = ws_tx.close().await;
                        let _ = done.send(());
                        break;
                    }
                    None => break,
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => inner.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => inner.handle_text(text),
                        Err(e) => tracing::warn!(error = %e, "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("broker closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    inner.teardown(generation);
    tracing::debug!(generation, "broker link task finished");
}

impl Transport for LiveTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), RealtimeError> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let socket = self.handshake(options).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.generation = slot.generation.wrapping_add(1);
            slot.commands = Some(tx);
            slot.generation
        };
        self.inner.link.send_replace(true);
        tokio::spawn(run_link(Arc::clone(&self.inner), socket, rx, generation));
        tracing::info!(url = %self.inner.config.url, "connected to broker");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RealtimeError> {
        let (commands, generation) = {
            let slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
            (slot.commands.clone(), slot.generation)
        };
        if let Some(commands) = commands {
            let (done_tx, done_rx) = oneshot::channel();
            if commands.send(LinkCommand::Close { done: done_tx }).is_ok() {
                let _ = tokio::time::timeout(self.inner.config.connect_timeout, done_rx).await;
            }
        }
        self.inner.teardown(generation);
        tracing::info!(url = %self.inner.config.url, "disconnected from broker");
        Ok(())
    }

    fn subscribe(
        &self,
        address: Address,
        handler: MessageHandler,
    ) -> Result<TransportToken, RealtimeError> {
        let commands = self.commands().ok_or(RealtimeError::NotConnected)?;
        let token = TransportToken::new(self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        self.inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token,
                LiveSubscription {
                    address,
                    handler,
                    active: Arc::new(AtomicBool::new(true)),
                },
            );

        let frame = Frame::new(Command::Subscribe)
            .header("id", token.to_string())
            .header("destination", address.destination())
            .header("ack", "auto");
        if commands.send(LinkCommand::Frame { frame, ack: None }).is_err() {
            self.inner
                .subs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&token);
            return Err(RealtimeError::NotConnected);
        }
        tracing::debug!(%address, %token, "subscribed");
        Ok(token)
    }

    fn unsubscribe(&self, token: TransportToken) -> bool {
        let removed = self
            .inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        let Some(sub) = removed else {
            return false;
        };
        sub.active.store(false, Ordering::SeqCst);
        if let Some(commands) = self.commands() {
            let frame = Frame::new(Command::Unsubscribe).header("id", token.to_string());
            let _ = commands.send(LinkCommand::Frame { frame, ack: None });
        }
        tracing::debug!(address = %sub.address, %token, "unsubscribed");
        true
    }

    async fn send(
        &self,
        destination: SendDestination,
        message: &OutboundMessage,
    ) -> Result<(), RealtimeError> {
        let commands = self.commands().ok_or(RealtimeError::NotConnected)?;
        let body = serde_json::to_string(message)?;
        let frame = Frame::new(Command::Send)
            .header("destination", destination.path())
            .header("content-type", "application/json;charset=UTF-8")
            .body(body);
        let (ack_tx, ack_rx) = oneshot::channel();
        commands
            .send(LinkCommand::Frame {
                frame,
                ack: Some(ack_tx),
            })
            .map_err(|_| RealtimeError::NotConnected)?;
        ack_rx.await.map_err(|_| {
            RealtimeError::Transport("link closed before the frame was written".to_string())
        })?
    }

    fn is_connected(&self) -> bool {
        *self.inner.link.borrow()
    }

    fn link_state(&self) -> watch::Receiver<bool> {
        self.inner.link.subscribe()
    }
}
