use parlor_core::{Category, ChatEvent, ConnectionState, SessionEvent, SessionListener, Termination};

/// Prints session events as a plain-text transcript on stdout.
pub struct TerminalRenderer;

impl SessionListener for TerminalRenderer {
    fn on_event(&self, event: SessionEvent) {
        if let Some(line) = format_event(&event) {
            println!("{line}");
        }
    }
}

pub fn format_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::ConnectionStateChanged(state) => Some(format!("* {}", state_label(*state))),
        SessionEvent::RoomJoined(room) => Some(format!("* room {room}")),
        SessionEvent::MessageAppended { event, category, .. } => {
            Some(format_entry(event, *category))
        }
        SessionEvent::TypingChanged(Some(author)) => Some(format!("  {author} is typing...")),
        SessionEvent::TypingChanged(None) => None,
        SessionEvent::Terminated(Termination::Unauthorized) => {
            Some("* session rejected by the server".to_string())
        }
        SessionEvent::Terminated(_) => Some("* bye".to_string()),
    }
}

fn format_entry(event: &ChatEvent, category: Category) -> String {
    match category {
        Category::System => format!("[{}] -- {} ({}) --", event.timestamp, event.message, event.author),
        Category::Own => format!("[{}] you: {}", event.timestamp, event.message),
        Category::Other => format!("[{}] {}: {}", event.timestamp, event.author, event.message),
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Unauthorized => "unauthorized",
    }
}
