use serde_json::json;

use crate::chat::MessageLog;
use crate::connection::Outbox;
use crate::events::{ChatEvent, JOINED_NOTICE};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Membership {
    #[default]
    NotJoined,
    Joined { room: String },
}

/// Gates chat on room membership. A session joins at most one room.
#[derive(Debug, Default)]
pub struct RoomSession {
    membership: Membership,
}

impl RoomSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.membership, Membership::Joined { .. })
    }

    pub fn room(&self) -> Option<&str> {
        match &self.membership {
            Membership::Joined { room } => Some(room.as_str()),
            Membership::NotJoined => None,
        }
    }

    /// Ask the server to join `room_name` and record the local notice.
    ///
    /// An empty name, or a session that already joined, changes nothing.
    pub fn join(
        &mut self,
        outbox: &impl Outbox,
        log: &mut MessageLog,
        room_name: &str,
        author: &str,
    ) -> Option<ChatEvent> {
        if room_name.is_empty() {
            return None;
        }
        if let Membership::Joined { room } = &self.membership {
            tracing::debug!("already joined {room}; ignoring join to {room_name}");
            return None;
        }

        outbox.emit("join_room", vec![json!(room_name), json!(author)]);
        self.membership = Membership::Joined {
            room: room_name.to_string(),
        };
        tracing::info!("joined room {room_name} as {author}");

        Some(log.append_system(room_name, author, JOINED_NOTICE).clone())
    }
}
