//! Parlor chat client core.
//!
//! Session logic for a real-time, room-based chat client: connection lifecycle
//! over Socket.IO, room membership, the message transcript and the remote
//! typing indicator. No UI; hosts drive a [`Session`] with [`Command`]s and
//! observe it through a [`SessionListener`].

pub mod auth;
pub mod chat;
pub mod connection;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod room;
pub mod session;
pub mod settings;
pub mod typing;

#[cfg(test)]
mod test_support;

pub use auth::{Credential, CredentialStore};
pub use connection::{ConnectionManager, Inbound, Outbox};
pub use errors::ChatError;
pub use events::{
    Category, ChatEvent, ConnectionState, EventKind, SessionEvent, SessionListener, Termination,
};
pub use session::{Command, Session, SessionConfig, SessionOptions};
pub use settings::{Settings, SettingsStore};
