//! User and lobby identifiers.
//!
//! Server payloads name the user identifier inconsistently (`userId`,
//! `userid`, `user_id`, plain `id`) and sometimes send it as a string.
//! [`normalize_user_id`] is the single place that resolves those shapes;
//! every payload type that carries a user reference goes through it during
//! decoding, so the rest of the crate only ever compares [`UserId`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys that may carry a user identifier, in lookup order.
pub const USER_ID_KEYS: &[&str] = &["userId", "userid", "user_id", "id"];

/// Stable numeric user identifier assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Numeric lobby identifier. Game topics reuse the lobby id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub u64);

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LobbyId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(LobbyId)
    }
}

/// Interpret a single JSON value as a user id.
///
/// Accepts non-negative integers and strings holding one.
fn id_from_value(value: &Value) -> Option<UserId> {
    match value {
        Value::Number(n) => n.as_u64().map(UserId),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract a user id from an object, trying [`USER_ID_KEYS`] in order.
///
/// A key that is present but unusable (null, negative, non-numeric) does not
/// stop the search; the next key is tried.
pub fn normalize_user_id(object: &Map<String, Value>) -> Option<UserId> {
    USER_ID_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(id_from_value)
}

/// Like [`normalize_user_id`] but for an arbitrary value; non-objects yield
/// `None`.
pub fn user_id_of(value: &Value) -> Option<UserId> {
    value.as_object().and_then(normalize_user_id)
}
