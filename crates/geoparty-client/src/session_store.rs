//! Values that must survive navigation between screens.
//!
//! Screens talk to a [`SessionStore`] through string keys. The typed helpers
//! treat malformed values as absent, so a corrupt entry never takes a screen
//! down.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub const LOBBY_ID: &str = "lobbyId";
pub const LOBBY_CODE: &str = "lobbyCode";
pub const CHOOSER_ID: &str = "chooserId";
pub const ROUND_WINNER: &str = "roundWinner";
pub const GAME_WINNER: &str = "gameWinner";
pub const GAME_STATE: &str = "gameState";

/// Keys that belong to one pass through the lobby and game flow.
pub const GAME_FLOW_KEYS: [&str; 6] = [
    LOBBY_ID,
    LOBBY_CODE,
    CHOOSER_ID,
    ROUND_WINNER,
    GAME_WINNER,
    GAME_STATE,
];

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over key-value storage so screens stay platform-agnostic.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Read a value through [`FromStr`].
pub fn get_parsed<T>(store: &dyn SessionStore, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = store.get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring malformed stored value");
            None
        }
    }
}

pub fn set_display(store: &dyn SessionStore, key: &str, value: impl Display) {
    store.set(key, &value.to_string());
}

/// Read a JSON value.
pub fn get_json<T: DeserializeOwned>(store: &dyn SessionStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "ignoring malformed stored JSON");
            None
        }
    }
}

pub fn set_json<T: Serialize>(store: &dyn SessionStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(e) => warn!(key, error = %e, "failed to serialize value for the session store"),
    }
}

/// Forget the lobby reference only.
pub fn clear_lobby_reference(store: &dyn SessionStore) {
    store.remove(LOBBY_ID);
    store.remove(LOBBY_CODE);
}

/// Forget everything from the current lobby and game.
pub fn clear_game_flow(store: &dyn SessionStore) {
    for key in GAME_FLOW_KEYS {
        store.remove(key);
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// A JSON object on disk, rewritten after every change.
///
/// An unreadable or corrupt file loads as an empty store. Write failures are
/// logged and the in-memory copy stays authoritative.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "session file is corrupt, starting empty");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read session file, starting empty");
                HashMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, String>) -> bool) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !change(&mut entries) {
            return;
        }
        let json = match serde_json::to_string_pretty(&*entries) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize session file");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!(path = %self.path.display(), error = %e, "failed to write session file");
        }
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        });
    }

    fn remove(&self, key: &str) {
        self.update(|entries| entries.remove(key).is_some());
    }
}
