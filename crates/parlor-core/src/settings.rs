use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Room offered by the room picker when nothing else is configured.
pub const DEFAULT_ROOM: &str = "sala1";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_room")]
    pub default_room: String,
    /// Minimum gap between outbound typing notices. `None` sends one per keystroke.
    #[serde(default)]
    pub typing_throttle_ms: Option<u64>,
    /// Drop inbound messages addressed to a room other than the joined one.
    #[serde(default)]
    pub strict_room_filter: bool,
}

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: None,
            default_room: default_room(),
            typing_throttle_ms: None,
            strict_room_filter: false,
        }
    }
}

impl Settings {
    pub fn typing_throttle(&self) -> Option<Duration> {
        self.typing_throttle_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        let file_path = data_dir.join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.lock().display_name = name;
        self.save();
    }

    pub fn set_default_room(&self, room: String) {
        self.lock().default_room = room;
        self.save();
    }

    pub fn set_typing_throttle_ms(&self, ms: Option<u64>) {
        self.lock().typing_throttle_ms = ms;
        self.save();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot encode settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt settings at {}: {e}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
