use parlor_core::Command;
use parlor_core::session::ENTER_KEY;

/// Typed by the user to leave the chat.
pub const QUIT: &str = "/quit";

/// Turns terminal lines into session commands.
///
/// Before a room is joined a line picks the room (blank picks the default);
/// afterwards every line is a compose-field edit followed by Enter.
#[derive(Debug)]
pub struct LineMapper {
    default_room: String,
    joined: bool,
}

impl LineMapper {
    pub fn new(default_room: impl Into<String>) -> Self {
        Self {
            default_room: default_room.into(),
            joined: false,
        }
    }

    /// Mapper for a session that already asked to join a room.
    pub fn joined() -> Self {
        Self {
            default_room: String::new(),
            joined: true,
        }
    }

    pub fn map(&mut self, line: &str) -> Vec<Command> {
        if line.trim() == QUIT {
            return vec![Command::Leave];
        }
        if !self.joined {
            let room = match line.trim() {
                "" => self.default_room.clone(),
                room => room.to_string(),
            };
            self.joined = true;
            return vec![Command::Join(room)];
        }
        vec![
            Command::InputChanged(line.to_string()),
            Command::KeyDown {
                key: ENTER_KEY.to_string(),
                draft: line.to_string(),
            },
        ]
    }
}
