use crate::connection::Outbox;
use crate::events::{ChatEvent, EventKind};

/// Current local time-of-day, as shown next to each transcript entry.
pub fn time_of_day() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Append-only transcript of one session, in display order.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatEvent>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a chat message to the room and echo it locally.
    ///
    /// The echo does not wait for the server. Empty text is ignored.
    pub fn send_local(
        &mut self,
        outbox: &impl Outbox,
        text: &str,
        author: &str,
        room: &str,
    ) -> Option<&ChatEvent> {
        if text.is_empty() {
            return None;
        }

        let event = ChatEvent {
            room: room.to_string(),
            author: author.to_string(),
            message: text.to_string(),
            timestamp: time_of_day(),
            kind: EventKind::User,
        };

        match serde_json::to_value(&event) {
            Ok(payload) => outbox.emit("send_message", vec![payload]),
            Err(e) => tracing::warn!("cannot encode outgoing message: {e}"),
        }

        Some(self.append(event))
    }

    /// Handle an incoming chat message from the connection.
    pub fn receive_remote(&mut self, event: ChatEvent) -> &ChatEvent {
        self.append(event)
    }

    /// Append a locally synthesized notice.
    pub fn append_system(&mut self, room: &str, author: &str, message: &str) -> &ChatEvent {
        self.append(ChatEvent {
            room: room.to_string(),
            author: author.to_string(),
            message: message.to_string(),
            timestamp: time_of_day(),
            kind: EventKind::System,
        })
    }

    pub fn entries(&self) -> &[ChatEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ChatEvent> {
        self.entries.last()
    }

    fn append(&mut self, event: ChatEvent) -> &ChatEvent {
        self.entries.push(event);
        &self.entries[self.entries.len() - 1]
    }
}
