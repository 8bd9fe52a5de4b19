use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ProtocolError;

/// Message announced locally when the user enters a room.
pub const JOINED_NOTICE: &str = "You joined the chat";

/// Status value the server sends when the credential is rejected.
pub const STATUS_UNAUTHORIZED: &str = "unauthorized";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    User,
    System,
}

/// One transcript entry, as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub room: String,
    pub author: String,
    pub message: String,
    /// Local time-of-day at creation, e.g. `14:03:27`.
    #[serde(rename = "time", default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: EventKind,
}

impl ChatEvent {
    /// Visual category of this entry for the given local user.
    pub fn category(&self, local_user: &str) -> Category {
        match self.kind {
            EventKind::System => Category::System,
            EventKind::User if self.author == local_user => Category::Own,
            EventKind::User => Category::Other,
        }
    }
}

/// Presentation bucket for a transcript entry. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    System,
    Own,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Unauthorized,
}

/// Why a session stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The host closed its command channel.
    Closed,
    /// The user left explicitly.
    Left,
    /// The server rejected the credential. The host must leave the chat surface.
    Unauthorized,
}

/// Events emitted by the session to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    RoomJoined(String),
    MessageAppended {
        event: ChatEvent,
        category: Category,
        /// Log length after the append; the transcript scrolls to this entry.
        len: usize,
    },
    TypingChanged(Option<String>),
    Terminated(Termination),
}

/// Inbound server events the session understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ReceiveMessage(ChatEvent),
    UserTyping { author: String },
    Status { status: String },
    Other { name: String },
}

#[derive(Deserialize)]
struct TypingPayload {
    author: String,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

impl ServerEvent {
    pub fn from_wire(name: &str, args: &[Value]) -> Result<Self, ProtocolError> {
        match name {
            "receive_message" => Ok(Self::ReceiveMessage(first_arg(name, args)?)),
            "user_typing" => {
                let payload: TypingPayload = first_arg(name, args)?;
                Ok(Self::UserTyping {
                    author: payload.author,
                })
            }
            "status" => {
                let payload: StatusPayload = first_arg(name, args)?;
                Ok(Self::Status {
                    status: payload.status,
                })
            }
            other => Ok(Self::Other {
                name: other.to_string(),
            }),
        }
    }
}

fn first_arg<T: serde::de::DeserializeOwned>(name: &str, args: &[Value]) -> Result<T, ProtocolError> {
    let value = args
        .first()
        .ok_or_else(|| ProtocolError::MalformedEvent(format!("{name}: missing payload")))?;
    T::deserialize(value).map_err(|e| ProtocolError::MalformedEvent(format!("{name}: {e}")))
}

/// Trait for receiving events from the session.
/// Implementations must be Send + Sync.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Dispatches session events to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
