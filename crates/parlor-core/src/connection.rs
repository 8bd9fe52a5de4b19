//! Socket.IO connection lifecycle.
//!
//! `ConnectionManager` owns one WebSocket connection to the chat server. Socket
//! I/O runs on a spawned task that only talks to the manager over channels; the
//! manager itself is driven from a single task (`recv` + `dispatch`), so inbound
//! handlers never run concurrently with each other or with session logic.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::auth::{Credential, auth_payload};
use crate::errors::ChatError;
use crate::events::{ConnectionState, STATUS_UNAUTHORIZED};
use crate::protocol::{DEFAULT_NAMESPACE, ENGINE_IO_VERSION, EnginePacket, SocketPacket};

/// Address of the chat server. Not user-configurable.
pub const SERVER_URL: &str = "http://localhost:3001";

/// How long `disconnect` waits for the socket task to say goodbye.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for the Engine.IO handshake, before the server announces its
/// own ping timing.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Something received from the connection, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connected { sid: String },
    ConnectError { message: String },
    Event { name: String, args: Vec<Value> },
    Disconnected { reason: String },
}

impl Inbound {
    /// Name handlers are registered under. Lifecycle events use the
    /// Socket.IO reserved names.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connect",
            Self::ConnectError { .. } => "connect_error",
            Self::Event { name, .. } => name,
            Self::Disconnected { .. } => "disconnect",
        }
    }
}

pub type Handler = Box<dyn FnMut(&Inbound) + Send>;

/// Fire-and-forget outbound event sink.
pub trait Outbox {
    fn emit(&self, event: &str, args: Vec<Value>);
}

struct Link {
    outbound: mpsc::UnboundedSender<SocketPacket>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct ConnectionManager {
    state: ConnectionState,
    handlers: HashMap<String, Vec<Handler>>,
    link: Option<Link>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            handlers: HashMap::new(),
            link: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a connection exists that may still produce inbound events.
    pub fn is_open(&self) -> bool {
        self.link.is_some() && self.state != ConnectionState::Unauthorized
    }

    /// Connect to [`SERVER_URL`] presenting `credential`.
    ///
    /// Returns immediately; the outcome arrives through [`recv`](Self::recv).
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self, credential: Option<&Credential>) {
        self.connect_to(SERVER_URL, credential);
    }

    /// Connect to an explicit server address (development hosts and tests).
    pub fn connect_to(&mut self, server_url: &str, credential: Option<&Credential>) {
        if self.state == ConnectionState::Unauthorized {
            tracing::warn!("connect ignored: session is unauthorized");
            return;
        }
        if self.link.take().is_some() {
            tracing::info!("replacing existing connection");
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_socket(
            server_url.to_string(),
            auth_payload(credential),
            outbound_rx,
            inbound_tx,
            shutdown_rx,
        ));

        self.state = ConnectionState::Connecting;
        self.link = Some(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        });
    }

    /// Register a handler for every inbound event named `event`.
    pub fn on(&mut self, event: &str, handler: impl FnMut(&Inbound) + Send + 'static) {
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Next raw inbound event. Does not update state or run handlers; pass the
    /// result to [`dispatch`](Self::dispatch), or use [`next_event`](Self::next_event).
    ///
    /// Returns `None` once the connection is gone or the session is unauthorized.
    pub async fn recv(&mut self) -> Option<Inbound> {
        if self.state == ConnectionState::Unauthorized {
            return None;
        }
        let link = self.link.as_mut()?;
        match link.inbound.recv().await {
            Some(event) => Some(event),
            None => {
                self.link = None;
                None
            }
        }
    }

    /// Apply an inbound event to the lifecycle state and run its handlers.
    pub fn dispatch(&mut self, event: &Inbound) {
        match event {
            Inbound::Connected { sid } => {
                tracing::info!("connected as {sid}");
                self.state = ConnectionState::Connected;
            }
            Inbound::ConnectError { message } => {
                if message.eq_ignore_ascii_case(STATUS_UNAUTHORIZED) {
                    tracing::warn!("server rejected credential");
                    self.state = ConnectionState::Unauthorized;
                } else {
                    tracing::warn!("connect error: {message}");
                    self.mark_disconnected();
                }
            }
            Inbound::Event { name, args } if name == "status" => {
                tracing::debug!("status received: {args:?}");
                if is_unauthorized_status(args) {
                    self.state = ConnectionState::Unauthorized;
                }
            }
            Inbound::Event { .. } => {}
            Inbound::Disconnected { reason } => {
                tracing::info!("disconnected: {reason}");
                self.mark_disconnected();
                self.link = None;
            }
        }

        if let Some(handlers) = self.handlers.get_mut(event.name()) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
    }

    /// [`recv`](Self::recv) followed by [`dispatch`](Self::dispatch).
    pub async fn next_event(&mut self) -> Option<Inbound> {
        let event = self.recv().await?;
        self.dispatch(&event);
        Some(event)
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Some(shutdown) = link.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(mut task) = link.task.take() {
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!("socket task ended abnormally: {e}"),
                    Err(_) => {
                        tracing::warn!("socket task did not stop in time; aborting");
                        task.abort();
                    }
                }
            }
            tracing::info!("connection closed");
        }
        self.mark_disconnected();
    }

    fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::Unauthorized {
            self.state = ConnectionState::Disconnected;
        }
    }
}

impl Outbox for ConnectionManager {
    fn emit(&self, event: &str, args: Vec<Value>) {
        if self.state == ConnectionState::Unauthorized {
            tracing::debug!("unauthorized; dropping {event}");
            return;
        }
        let Some(link) = &self.link else {
            tracing::debug!("not connected; dropping {event}");
            return;
        };
        if link.outbound.send(SocketPacket::event(event, args)).is_err() {
            tracing::debug!("socket task gone; dropping {event}");
        }
    }
}

fn is_unauthorized_status(args: &[Value]) -> bool {
    args.first()
        .and_then(|payload| payload.get("status"))
        .and_then(Value::as_str)
        == Some(STATUS_UNAUTHORIZED)
}

/// Build the Engine.IO WebSocket endpoint for a server base address.
pub fn handshake_url(server_url: &str) -> Result<Url, ChatError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ChatError::Connection(format!("invalid server url {server_url:?}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatError::Connection(format!(
                "unsupported scheme {other:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ChatError::Connection(format!("cannot use scheme {scheme}")))?;
    url.set_path("/socket.io/");
    url.set_query(Some(&format!("EIO={ENGINE_IO_VERSION}&transport=websocket")));
    Ok(url)
}

enum FrameAction {
    Nothing,
    Reply(String),
    /// Engine.IO open: answer with CONNECT and watch for silence longer than
    /// `liveness`.
    Handshake { reply: String, liveness: Duration },
    Connected,
    Close(String),
}

async fn run_socket(
    server_url: String,
    auth: Value,
    mut outbound: mpsc::UnboundedReceiver<SocketPacket>,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let url = match handshake_url(&server_url) {
        Ok(url) => url,
        Err(e) => {
            let _ = inbound.send(Inbound::ConnectError { message: e.to_string() });
            let _ = inbound.send(Inbound::Disconnected { reason: "invalid server url".into() });
            return;
        }
    };

    tracing::info!("connecting to {url}");
    let ws = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                let _ = inbound.send(Inbound::ConnectError { message: e.to_string() });
                let _ = inbound.send(Inbound::Disconnected { reason: "connect failed".into() });
                return;
            }
        },
        _ = &mut shutdown => return,
    };

    let (mut sink, mut stream) = ws.split();
    // Outbound events wait in the channel until the server acknowledges CONNECT.
    let mut connected = false;
    // Until CONNECT is acknowledged the deadline only moves on the handshake;
    // afterwards every frame from the server extends it.
    let mut liveness = CONNECT_TIMEOUT;
    let watchdog = tokio::time::sleep(liveness);
    tokio::pin!(watchdog);

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                if connected {
                    let _ = sink.send(Message::text(SocketPacket::disconnect().to_frame())).await;
                }
                let _ = sink.send(Message::text(EnginePacket::Close.encode())).await;
                let _ = sink.close().await;
                return;
            }
            packet = outbound.recv(), if connected => {
                let Some(packet) = packet else {
                    let _ = sink.close().await;
                    return;
                };
                let frame = packet.to_frame();
                tracing::trace!("send {frame}");
                if let Err(e) = sink.send(Message::text(frame)).await {
                    break format!("send failed: {e}");
                }
            }
            () = &mut watchdog => {
                let reason = if connected { "ping timeout" } else { "connect timeout" };
                break reason.to_string();
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break "transport closed".to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break format!("transport error: {e}"),
                };
                match handle_frame(text.as_str(), &auth, &inbound) {
                    FrameAction::Nothing => {}
                    FrameAction::Reply(reply) => {
                        if let Err(e) = sink.send(Message::text(reply)).await {
                            break format!("send failed: {e}");
                        }
                    }
                    FrameAction::Handshake { reply, liveness: window } => {
                        liveness = window;
                        watchdog.as_mut().reset(Instant::now() + liveness);
                        if let Err(e) = sink.send(Message::text(reply)).await {
                            break format!("send failed: {e}");
                        }
                    }
                    FrameAction::Connected => connected = true,
                    FrameAction::Close(reason) => break reason,
                }
                if connected {
                    watchdog.as_mut().reset(Instant::now() + liveness);
                }
            }
        }
    };

    let _ = sink.close().await;
    let _ = inbound.send(Inbound::Disconnected { reason });
}

fn handle_frame(frame: &str, auth: &Value, inbound: &mpsc::UnboundedSender<Inbound>) -> FrameAction {
    let packet = match EnginePacket::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!("skipping frame: {e}");
            return FrameAction::Nothing;
        }
    };

    match packet {
        EnginePacket::Open(handshake) => {
            tracing::debug!(
                "engine.io open sid={} ping_interval={}ms",
                handshake.sid,
                handshake.ping_interval
            );
            FrameAction::Handshake {
                reply: SocketPacket::connect(Some(auth.clone())).to_frame(),
                liveness: Duration::from_millis(
                    handshake.ping_interval.saturating_add(handshake.ping_timeout),
                ),
            }
        }
        EnginePacket::Ping(data) => FrameAction::Reply(EnginePacket::Pong(data).encode()),
        EnginePacket::Close => FrameAction::Close("server closed transport".into()),
        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
            Ok(SocketPacket::Connect { payload, .. }) => {
                let sid = payload
                    .as_ref()
                    .and_then(|p| p.get("sid"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let _ = inbound.send(Inbound::Connected { sid });
                FrameAction::Connected
            }
            Ok(SocketPacket::ConnectError { message, .. }) => {
                let _ = inbound.send(Inbound::ConnectError { message });
                FrameAction::Close("connection refused by server".into())
            }
            Ok(SocketPacket::Event {
                namespace,
                name,
                args,
                ..
            }) => {
                if namespace == DEFAULT_NAMESPACE {
                    let _ = inbound.send(Inbound::Event { name, args });
                } else {
                    tracing::debug!("ignoring {name} on namespace {namespace}");
                }
                FrameAction::Nothing
            }
            Ok(SocketPacket::Disconnect { .. }) => {
                FrameAction::Close("server disconnected the socket".into())
            }
            Ok(SocketPacket::Ack { ack_id, .. }) => {
                tracing::trace!("ignoring ack {ack_id}");
                FrameAction::Nothing
            }
            Err(e) => {
                tracing::warn!("skipping packet: {e}");
                FrameAction::Nothing
            }
        },
        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => FrameAction::Nothing,
    }
}
