//! Push-channel protocol: destinations, inbound events, outbound commands.
//!
//! Every push message body is a JSON envelope `{"type": ..., "payload": ...}`.
//! Decoding happens in two steps: the envelope is read with `type` as a plain
//! string, then the payload is decoded into the shape that `type` selects.
//! Unknown `type` values become [`InboundEvent::Unknown`] instead of an error
//! so that a newer server cannot break an older client.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::game_state::GameStateDelta;
use crate::identity::{LobbyId, UserId, normalize_user_id, user_id_of};

/// Errors raised while decoding or encoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not a `{type, payload}` JSON object.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The payload does not match the shape its `type` requires.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// An outbound command could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// A subscribable push destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Broadcast to everyone in a lobby.
    LobbyTopic(LobbyId),
    /// Broadcast to everyone in the game started from a lobby.
    GameTopic(LobbyId),
    /// Point-to-point error queue of the signed-in user.
    UserErrors,
    /// Point-to-point result queue of the signed-in user.
    UserResults,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::LobbyTopic(id) => write!(f, "/topic/lobby/{id}"),
            Destination::GameTopic(id) => write!(f, "/topic/game/{id}"),
            Destination::UserErrors => f.write_str("/user/queue/errors"),
            Destination::UserResults => f.write_str("/user/queue/results"),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// Server-side name of a game screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScreenName {
    Lobby,
    #[serde(alias = "ROUND_CARD")]
    RoundCard,
    #[serde(alias = "ACTION_CARD")]
    ActionCard,
    Guess,
    #[serde(alias = "REVEAL")]
    Results,
    #[serde(alias = "GAME_OVER")]
    GameOver,
    #[serde(other)]
    Unknown,
}

/// A lobby member as it appears in lobby events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "camelCase")]
pub struct Member {
    pub user_id: Option<UserId>,
    pub username: String,
}

impl Member {
    pub fn new(user_id: Option<UserId>, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }

    /// Two references denote the same user when both carry an id and the ids
    /// match, or otherwise when the usernames match.
    pub fn same_identity(&self, other: &Member) -> bool {
        match (self.user_id, other.user_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.username == other.username,
        }
    }
}

impl TryFrom<Value> for Member {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let object = value.as_object().ok_or("member must be an object")?;
        let username = object
            .get("username")
            .and_then(Value::as_str)
            .ok_or("member is missing `username`")?;
        Ok(Member {
            user_id: normalize_user_id(object),
            username: username.to_string(),
        })
    }
}

/// Lobby settings. Every field is optional so the same type serves as the
/// full settings record and as a partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_time_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl LobbySettings {
    /// Overwrite the fields present in `update`. Returns `true` if anything
    /// changed.
    pub fn merge(&mut self, update: &LobbySettings) -> bool {
        fn take<T: Clone + PartialEq>(slot: &mut Option<T>, value: &Option<T>) -> bool {
            match value {
                Some(v) if slot.as_ref() != Some(v) => {
                    *slot = Some(v.clone());
                    true
                }
                _ => false,
            }
        }
        let mut changed = take(&mut self.game_mode, &update.game_mode);
        changed |= take(&mut self.max_players, &update.max_players);
        changed |= take(&mut self.max_rounds, &update.max_rounds);
        changed |= take(&mut self.round_time_secs, &update.round_time_secs);
        changed |= take(&mut self.is_private, &update.is_private);
        changed
    }
}

/// Full lobby status, sent after a join and on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    #[serde(default)]
    pub lobby_id: Option<LobbyId>,
    #[serde(default)]
    pub lobby_code: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub settings: LobbySettings,
    #[serde(default, alias = "members")]
    pub players: Vec<Member>,
}

/// Announcement that the game has started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    #[serde(default)]
    pub lobby_id: Option<LobbyId>,
    /// Player who picks the first round card.
    #[serde(default, deserialize_with = "user_ref")]
    pub chooser: Option<UserId>,
    #[serde(default)]
    pub state: Option<GameStateDelta>,
}

/// The server moved everyone to another screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenChange {
    pub screen: ScreenName,
    #[serde(default)]
    pub round_card_submitted: bool,
    #[serde(default)]
    pub action_cards_submitted: bool,
    /// Chooser for the next round, when the server announces it here.
    #[serde(default, deserialize_with = "user_ref")]
    pub chooser: Option<UserId>,
}

/// Round or game winner announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "camelCase")]
pub struct Winner {
    pub user_id: Option<UserId>,
    pub username: String,
    pub score: Option<u32>,
    pub round: Option<u32>,
}

impl TryFrom<Value> for Winner {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Fields {
            #[serde(default)]
            username: Option<String>,
            #[serde(default)]
            score: Option<u32>,
            #[serde(default)]
            round: Option<u32>,
        }
        let user_id = user_id_of(&value);
        let fields: Fields = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if user_id.is_none() && fields.username.is_none() {
            return Err("winner has neither id nor username".to_string());
        }
        Ok(Winner {
            user_id,
            username: fields.username.unwrap_or_default(),
            score: fields.score,
            round: fields.round,
        })
    }
}

/// Application error pushed by the server. The payload may be a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl TryFrom<Value> for ErrorPayload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(message) => Ok(ErrorPayload {
                message,
                code: None,
            }),
            Value::Object(object) => {
                let message = object
                    .get("message")
                    .or_else(|| object.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                let code = object.get("code").and_then(Value::as_str).map(String::from);
                Ok(ErrorPayload { message, code })
            }
            Value::Null => Ok(ErrorPayload {
                message: "unknown error".to_string(),
                code: None,
            }),
            other => Ok(ErrorPayload {
                message: other.to_string(),
                code: None,
            }),
        }
    }
}

/// Reason attached to a disband notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbanded {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Deserialize a user reference given as a number, a numeric string, or an
/// object carrying one of the id keys.
pub(crate) fn user_ref<'de, D>(deserializer: D) -> Result<Option<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match &value {
        Value::Number(n) => n.as_u64().map(UserId),
        Value::String(s) => s.parse().ok(),
        Value::Object(object) => normalize_user_id(object),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    LobbyStatus(LobbySnapshot),
    UserJoined(Member),
    /// Covers both an explicit leave and a dropped connection.
    UserLeft(Member),
    LobbyUpdated(LobbySettings),
    LobbyDisbanded(Disbanded),
    GameStarted(GameStart),
    ScreenChanged(ScreenChange),
    GameState(GameStateDelta),
    RoundWinner(Winner),
    GameWinner(Winner),
    Error(ErrorPayload),
    /// A `type` this client does not know. Ignored by every screen.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl InboundEvent {
    /// Decode a push message body.
    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(body).map_err(ProtocolError::Envelope)?;
        let RawEnvelope { kind, payload } = raw;

        fn typed<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload).map_err(|source| ProtocolError::Payload {
                kind: kind.to_string(),
                source,
            })
        }

        Ok(match kind.as_str() {
            "LOBBY_STATUS" => InboundEvent::LobbyStatus(typed(&kind, payload)?),
            "USER_JOINED" => InboundEvent::UserJoined(typed(&kind, payload)?),
            "USER_LEFT" | "USER_DISCONNECTED" => InboundEvent::UserLeft(typed(&kind, payload)?),
            "LOBBY_UPDATED" => InboundEvent::LobbyUpdated(typed(&kind, payload)?),
            "LOBBY_DISBANDED" => {
                let disbanded = if payload.is_null() {
                    Disbanded::default()
                } else {
                    typed(&kind, payload)?
                };
                InboundEvent::LobbyDisbanded(disbanded)
            }
            "GAME_START" => {
                let start = if payload.is_null() {
                    GameStart::default()
                } else {
                    typed(&kind, payload)?
                };
                InboundEvent::GameStarted(start)
            }
            "SCREEN_CHANGE" => InboundEvent::ScreenChanged(typed(&kind, payload)?),
            "GAME_STATE" => InboundEvent::GameState(typed(&kind, payload)?),
            "ROUND_WINNER" => InboundEvent::RoundWinner(typed(&kind, payload)?),
            "GAME_WINNER" => InboundEvent::GameWinner(typed(&kind, payload)?),
            "ERROR" => InboundEvent::Error(typed(&kind, payload)?),
            _ => InboundEvent::Unknown(kind),
        })
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::LobbyStatus(_) => "LOBBY_STATUS",
            InboundEvent::UserJoined(_) => "USER_JOINED",
            InboundEvent::UserLeft(_) => "USER_LEFT",
            InboundEvent::LobbyUpdated(_) => "LOBBY_UPDATED",
            InboundEvent::LobbyDisbanded(_) => "LOBBY_DISBANDED",
            InboundEvent::GameStarted(_) => "GAME_START",
            InboundEvent::ScreenChanged(_) => "SCREEN_CHANGE",
            InboundEvent::GameState(_) => "GAME_STATE",
            InboundEvent::RoundWinner(_) => "ROUND_WINNER",
            InboundEvent::GameWinner(_) => "GAME_WINNER",
            InboundEvent::Error(_) => "ERROR",
            InboundEvent::Unknown(kind) => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// A user-initiated action, published as a `{type, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    JoinLobby {
        lobby_id: LobbyId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lobby_code: Option<String>,
    },
    LeaveLobby {
        lobby_id: LobbyId,
    },
    UpdateLobbySettings {
        lobby_id: LobbyId,
        settings: LobbySettings,
    },
    StartGame {
        lobby_id: LobbyId,
    },
    SelectRoundCard {
        lobby_id: LobbyId,
        card_id: String,
    },
    PlayActionCard {
        lobby_id: LobbyId,
        card_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UserId>,
    },
    ActionCardsComplete {
        lobby_id: LobbyId,
    },
    SubmitGuess {
        lobby_id: LobbyId,
        latitude: f64,
        longitude: f64,
    },
}

impl Command {
    pub fn lobby_id(&self) -> LobbyId {
        match self {
            Command::JoinLobby { lobby_id, .. }
            | Command::LeaveLobby { lobby_id }
            | Command::UpdateLobbySettings { lobby_id, .. }
            | Command::StartGame { lobby_id }
            | Command::SelectRoundCard { lobby_id, .. }
            | Command::PlayActionCard { lobby_id, .. }
            | Command::ActionCardsComplete { lobby_id }
            | Command::SubmitGuess { lobby_id, .. } => *lobby_id,
        }
    }

    /// Application destination the command is sent to.
    pub fn destination(&self) -> String {
        let id = self.lobby_id();
        match self {
            Command::JoinLobby { .. } => format!("/app/lobby/{id}/join"),
            Command::LeaveLobby { .. } => format!("/app/lobby/{id}/leave"),
            Command::UpdateLobbySettings { .. } => format!("/app/lobby/{id}/settings"),
            Command::StartGame { .. } => format!("/app/lobby/{id}/start"),
            Command::SelectRoundCard { .. } => format!("/app/game/{id}/round-card"),
            Command::PlayActionCard { .. } => format!("/app/game/{id}/action-card"),
            Command::ActionCardsComplete { .. } => {
                format!("/app/game/{id}/action-cards-complete")
            }
            Command::SubmitGuess { .. } => format!("/app/game/{id}/guess"),
        }
    }

    /// JSON envelope body.
    pub fn to_body(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, payload: Value) -> String {
        json!({ "type": kind, "payload": payload }).to_string()
    }

    #[test]
    fn decodes_lobby_status_with_heterogeneous_ids() {
        let body = envelope(
            "LOBBY_STATUS",
            json!({
                "lobbyId": 7,
                "maxPlayers": 4,
                "players": [
                    { "userId": 1, "username": "A" },
                    { "userid": "2", "username": "B" },
                    { "username": "C" }
                ]
            }),
        );
        let InboundEvent::LobbyStatus(snapshot) = InboundEvent::decode(&body).unwrap() else {
            panic!("expected LobbyStatus");
        };
        assert_eq!(snapshot.lobby_id, Some(LobbyId(7)));
        assert_eq!(snapshot.max_players, 4);
        let ids: Vec<_> = snapshot.players.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![Some(UserId(1)), Some(UserId(2)), None]);
    }

    #[test]
    fn user_disconnected_maps_to_user_left() {
        let body = envelope("USER_DISCONNECTED", json!({ "id": 5, "username": "E" }));
        assert_eq!(
            InboundEvent::decode(&body).unwrap(),
            InboundEvent::UserLeft(Member::new(Some(UserId(5)), "E"))
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let body = envelope("CHAT", json!({ "text": "hi" }));
        assert_eq!(
            InboundEvent::decode(&body).unwrap(),
            InboundEvent::Unknown("CHAT".to_string())
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(matches!(
            InboundEvent::decode("{not json"),
            Err(ProtocolError::Envelope(_))
        ));
        assert!(matches!(
            InboundEvent::decode(&envelope("USER_JOINED", json!({ "userId": 1 }))),
            Err(ProtocolError::Payload { .. })
        ));
    }

    #[test]
    fn screen_change_accepts_aliases_and_chooser_shapes() {
        let body = envelope(
            "SCREEN_CHANGE",
            json!({ "screen": "ROUND_CARD", "chooser": { "userid": 9 } }),
        );
        let InboundEvent::ScreenChanged(change) = InboundEvent::decode(&body).unwrap() else {
            panic!("expected ScreenChanged");
        };
        assert_eq!(change.screen, ScreenName::RoundCard);
        assert_eq!(change.chooser, Some(UserId(9)));

        let body = envelope("SCREEN_CHANGE", json!({ "screen": "MAP_VOTE" }));
        let InboundEvent::ScreenChanged(change) = InboundEvent::decode(&body).unwrap() else {
            panic!("expected ScreenChanged");
        };
        assert_eq!(change.screen, ScreenName::Unknown);
    }

    #[test]
    fn error_payload_may_be_a_string() {
        let body = envelope("ERROR", json!("Lobby is full"));
        assert_eq!(
            InboundEvent::decode(&body).unwrap(),
            InboundEvent::Error(ErrorPayload {
                message: "Lobby is full".to_string(),
                code: None
            })
        );
    }

    #[test]
    fn game_start_without_payload() {
        let body = json!({ "type": "GAME_START" }).to_string();
        assert_eq!(
            InboundEvent::decode(&body).unwrap(),
            InboundEvent::GameStarted(GameStart::default())
        );
    }

    #[test]
    fn commands_encode_as_envelopes() {
        let cmd = Command::SelectRoundCard {
            lobby_id: LobbyId(3),
            card_id: "world".to_string(),
        };
        assert_eq!(cmd.destination(), "/app/game/3/round-card");
        let body: Value = serde_json::from_str(&cmd.to_body().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({ "type": "SELECT_ROUND_CARD", "payload": { "lobbyId": 3, "cardId": "world" } })
        );

        let join = Command::JoinLobby {
            lobby_id: LobbyId(3),
            lobby_code: None,
        };
        let body: Value = serde_json::from_str(&join.to_body().unwrap()).unwrap();
        assert_eq!(body, json!({ "type": "JOIN_LOBBY", "payload": { "lobbyId": 3 } }));
    }

    #[test]
    fn destinations_render_paths() {
        assert_eq!(Destination::LobbyTopic(LobbyId(4)).to_string(), "/topic/lobby/4");
        assert_eq!(Destination::GameTopic(LobbyId(4)).to_string(), "/topic/game/4");
        assert_eq!(Destination::UserErrors.to_string(), "/user/queue/errors");
    }
}
