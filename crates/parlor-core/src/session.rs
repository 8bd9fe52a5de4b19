//! Client session: one room, one connection, one transcript.
//!
//! A `Session` is owned by a single task. UI commands, inbound connection events
//! and the typing decay timer are all handled through `&mut self`, one at a
//! time, in [`Session::run`]. Socket I/O lives on the connection's own task and
//! never touches session state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::auth::Credential;
use crate::chat::MessageLog;
use crate::connection::{ConnectionManager, Inbound, SERVER_URL};
use crate::errors::ChatError;
use crate::events::{
    ChatEvent, ConnectionState, EventEmitter, ServerEvent, SessionEvent, SessionListener,
    Termination,
};
use crate::room::RoomSession;
use crate::settings::Settings;
use crate::typing::TypingTracker;

/// Key that submits the compose field.
pub const ENTER_KEY: &str = "Enter";

/// Behaviour switches derived from host settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub typing_throttle: Option<Duration>,
    pub strict_room_filter: bool,
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            typing_throttle: settings.typing_throttle(),
            strict_room_filter: settings.strict_room_filter,
        }
    }
}

/// Everything the host must hand over to start a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Local user name. Required.
    pub identity: Option<String>,
    /// Bearer credential from the login flow. May be absent.
    pub credential: Option<Credential>,
    pub options: SessionOptions,
}

/// Input from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Send(String),
    KeyDown { key: String, draft: String },
    InputChanged(String),
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate(Termination),
}

pub struct Session {
    identity: String,
    credential: Option<Credential>,
    options: SessionOptions,
    server_url: String,
    connection: ConnectionManager,
    room: RoomSession,
    log: MessageLog,
    typing: TypingTracker,
    emitter: EventEmitter,
    terminated: Option<Termination>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, ChatError> {
        let identity = config
            .identity
            .filter(|name| !name.trim().is_empty())
            .ok_or(ChatError::MissingIdentity)?;

        Ok(Self {
            identity,
            credential: config.credential,
            typing: TypingTracker::new(config.options.typing_throttle),
            options: config.options,
            server_url: SERVER_URL.to_string(),
            connection: ConnectionManager::new(),
            room: RoomSession::new(),
            log: MessageLog::new(),
            emitter: EventEmitter::new(),
            terminated: None,
        })
    }

    /// Point the session at another server (development hosts and tests).
    #[must_use]
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn connection(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.room()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn active_typer(&self) -> Option<&str> {
        self.typing.active_typer()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.terminated
    }

    /// Open the connection. Returns immediately.
    pub fn mount(&mut self) {
        let before = self.connection.state();
        self.connection
            .connect_to(&self.server_url, self.credential.as_ref());
        self.publish_state_change(before);
    }

    /// Join a room. Empty names and repeat joins are ignored.
    pub fn join(&mut self, room_name: &str) {
        if self.terminated.is_some() {
            return;
        }
        let Some(notice) = self
            .room
            .join(&self.connection, &mut self.log, room_name, &self.identity)
        else {
            return;
        };
        self.emitter
            .emit(SessionEvent::RoomJoined(room_name.to_string()));
        self.publish_appended(notice);
    }

    /// Send `text` to the joined room. Returns whether a message went out, so
    /// the UI knows to clear its compose field.
    pub fn send(&mut self, text: &str) -> bool {
        if self.terminated.is_some() {
            return false;
        }
        let Some(room) = self.room.room() else {
            tracing::debug!("send ignored: no room joined");
            return false;
        };
        let Some(event) = self
            .log
            .send_local(&self.connection, text, &self.identity, room)
            .cloned()
        else {
            return false;
        };
        self.publish_appended(event);
        true
    }

    /// Compose-field key press. Enter sends the draft; every key, Enter
    /// included, also announces typing.
    pub fn key_down(&mut self, key: &str, draft: &str) -> bool {
        let sent = key == ENTER_KEY && self.send(draft);
        self.notify_typing();
        sent
    }

    /// Compose-field text mutation.
    pub fn input_changed(&mut self, _draft: &str) {
        self.notify_typing();
    }

    fn notify_typing(&mut self) {
        if self.terminated.is_some() {
            return;
        }
        let Some(room) = self.room.room() else {
            return;
        };
        self.typing
            .notify_typing(&self.connection, room, &self.identity);
    }

    pub fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Join(room) => self.join(&room),
            Command::Send(text) => {
                self.send(&text);
            }
            Command::KeyDown { key, draft } => {
                self.key_down(&key, &draft);
            }
            Command::InputChanged(draft) => self.input_changed(&draft),
            Command::Leave => return Flow::Terminate(Termination::Left),
        }
        Flow::Continue
    }

    /// Apply one inbound connection event.
    pub fn handle_inbound(&mut self, event: Inbound) -> Flow {
        if let Some(termination) = self.terminated {
            return Flow::Terminate(termination);
        }

        let before = self.connection.state();
        self.connection.dispatch(&event);
        self.publish_state_change(before);

        if self.connection.state() == ConnectionState::Unauthorized {
            return self.terminate(Termination::Unauthorized);
        }

        let Inbound::Event { name, args } = event else {
            return Flow::Continue;
        };

        match ServerEvent::from_wire(&name, &args) {
            Ok(ServerEvent::ReceiveMessage(message)) => self.receive_message(message),
            Ok(ServerEvent::UserTyping { author }) => {
                if self.typing.on_remote_typing(&author, &self.identity) {
                    self.emitter.emit(SessionEvent::TypingChanged(Some(author)));
                }
            }
            Ok(ServerEvent::Status { status }) => tracing::info!("server status: {status}"),
            Ok(ServerEvent::Other { name }) => tracing::debug!("unhandled event {name}"),
            Err(e) => tracing::warn!("dropping inbound {name}: {e}"),
        }
        Flow::Continue
    }

    fn receive_message(&mut self, message: ChatEvent) {
        if self.options.strict_room_filter {
            if let Some(room) = self.room.room() {
                if message.room != room {
                    tracing::debug!("dropping message for room {}", message.room);
                    return;
                }
            }
        }
        let event = self.log.receive_remote(message).clone();
        self.publish_appended(event);
    }

    /// The decay timer fired: hide the indicator.
    pub fn on_typing_decay(&mut self) {
        if self.typing.decay().is_some() {
            self.emitter.emit(SessionEvent::TypingChanged(None));
        }
    }

    /// Mount, then process commands, inbound events and timers until the
    /// session ends. The session is torn down before this returns.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Termination {
        self.mount();

        let termination = loop {
            let open = self.connection.is_open();
            tokio::select! {
                inbound = self.connection.recv(), if open => {
                    if let Some(event) = inbound {
                        if let Flow::Terminate(termination) = self.handle_inbound(event) {
                            break termination;
                        }
                    }
                }
                () = self.typing.expired() => self.on_typing_decay(),
                command = commands.recv() => {
                    let Some(command) = command else {
                        break Termination::Closed;
                    };
                    if let Flow::Terminate(termination) = self.handle_command(command) {
                        break termination;
                    }
                }
            }
        };

        self.teardown().await;
        if self.terminated.is_none() {
            self.terminated = Some(termination);
            self.emitter.emit(SessionEvent::Terminated(termination));
        }
        termination
    }

    /// Close the connection and cancel the decay timer. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        self.typing.cancel();
        let before = self.connection.state();
        self.connection.disconnect().await;
        self.publish_state_change(before);
    }

    fn terminate(&mut self, termination: Termination) -> Flow {
        tracing::warn!("session terminated: {termination:?}");
        self.typing.cancel();
        self.terminated = Some(termination);
        self.emitter.emit(SessionEvent::Terminated(termination));
        Flow::Terminate(termination)
    }

    fn publish_state_change(&self, before: ConnectionState) {
        let after = self.connection.state();
        if after != before {
            self.emitter.emit(SessionEvent::ConnectionStateChanged(after));
        }
    }

    fn publish_appended(&self, event: ChatEvent) {
        let category = event.category(&self.identity);
        self.emitter.emit(SessionEvent::MessageAppended {
            event,
            category,
            len: self.log.len(),
        });
    }
}
