//! Client-side mirrors of lobby and game state.
//!
//! The server owns the authoritative state and pushes partial updates. The
//! rules here are the same for every screen:
//!
//! - Snapshots (lobby status, the initial game-state fetch) replace the state
//!   wholesale.
//! - Deltas only overwrite the fields they carry; everything else is left
//!   as it was.
//! - Player lists are keyed by identity (see [`Member::same_identity`]), so
//!   replaying an event never produces duplicates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::identity::{LobbyId, UserId, user_id_of};
use crate::protocol::{LobbySettings, LobbySnapshot, Member, ScreenName, user_ref};

/// Describes what changed after applying an event.
///
/// Frontends can inspect these flags to decide what to re-render. All flags
/// default to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChanged {
    /// Lobby membership changed.
    pub members: bool,
    /// Lobby settings or capacity changed.
    pub settings: bool,
    /// In-game player list or per-player counters changed.
    pub players: bool,
    /// Round number or active round card changed.
    pub round: bool,
    /// The server-side screen changed.
    pub screen: bool,
    /// Owned cards changed.
    pub inventory: bool,
    /// A notice was added or dismissed.
    pub notices: bool,
}

impl StateChanged {
    /// Returns `true` if any flag is set.
    pub fn any(self) -> bool {
        self.members
            || self.settings
            || self.players
            || self.round
            || self.screen
            || self.inventory
            || self.notices
    }

    /// Flags set in either value.
    pub fn union(self, other: StateChanged) -> StateChanged {
        StateChanged {
            members: self.members || other.members,
            settings: self.settings || other.settings,
            players: self.players || other.players,
            round: self.round || other.round,
            screen: self.screen || other.screen,
            inventory: self.inventory || other.inventory,
            notices: self.notices || other.notices,
        }
    }
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Everything the lobby screen shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyState {
    pub lobby_id: Option<LobbyId>,
    pub lobby_code: Option<String>,
    /// Username of the host.
    pub host: Option<String>,
    pub max_players: u32,
    pub settings: LobbySettings,
    /// Members in join order.
    pub members: Vec<Member>,
}

impl LobbyState {
    /// Replace the state with a lobby status snapshot.
    ///
    /// Duplicate members inside the snapshot collapse to the first entry.
    pub fn load_snapshot(&mut self, snapshot: LobbySnapshot) -> StateChanged {
        let mut members: Vec<Member> = Vec::with_capacity(snapshot.players.len());
        for member in snapshot.players {
            if !members.iter().any(|m| m.same_identity(&member)) {
                members.push(member);
            }
        }
        let max_players = snapshot
            .settings
            .max_players
            .filter(|_| snapshot.max_players == 0)
            .unwrap_or(snapshot.max_players);
        *self = LobbyState {
            lobby_id: snapshot.lobby_id.or(self.lobby_id),
            lobby_code: snapshot.lobby_code.or(self.lobby_code.take()),
            host: snapshot.host,
            max_players,
            settings: snapshot.settings,
            members,
        };
        StateChanged {
            members: true,
            settings: true,
            ..Default::default()
        }
    }

    /// Add a member, or refresh the stored reference if already present.
    pub fn add_member(&mut self, member: Member) -> StateChanged {
        match self.members.iter_mut().find(|m| m.same_identity(&member)) {
            Some(existing) => {
                let refreshed = Member {
                    user_id: member.user_id.or(existing.user_id),
                    username: member.username,
                };
                if *existing == refreshed {
                    return StateChanged::default();
                }
                *existing = refreshed;
            }
            None => self.members.push(member),
        }
        StateChanged {
            members: true,
            ..Default::default()
        }
    }

    /// Remove a member. Unknown members are ignored.
    pub fn remove_member(&mut self, member: &Member) -> StateChanged {
        let before = self.members.len();
        self.members.retain(|m| !m.same_identity(member));
        StateChanged {
            members: self.members.len() != before,
            ..Default::default()
        }
    }

    /// Merge a settings update. A `maxPlayers` inside it also updates the
    /// lobby capacity.
    pub fn update_settings(&mut self, update: &LobbySettings) -> StateChanged {
        let mut changed = self.settings.merge(update);
        if let Some(max) = update.max_players
            && max != self.max_players
        {
            self.max_players = max;
            changed = true;
        }
        StateChanged {
            settings: changed,
            ..Default::default()
        }
    }

    pub fn is_host(&self, username: &str) -> bool {
        self.host.as_deref() == Some(username)
    }

    pub fn is_full(&self) -> bool {
        self.max_players != 0 && self.members.len() >= self.max_players as usize
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// Cards the local player owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    #[serde(default)]
    pub round_cards: Vec<String>,
    #[serde(default)]
    pub action_cards: Vec<String>,
}

/// A player as shown during the game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub username: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub round_cards_left: u32,
    #[serde(default)]
    pub action_cards_left: u32,
    #[serde(default)]
    pub active_action_cards: Vec<String>,
}

impl Player {
    fn matches(&self, delta: &PlayerDelta) -> bool {
        match (self.user_id, delta.user_id) {
            (Some(a), Some(b)) => a == b,
            _ => delta.username.as_deref() == Some(self.username.as_str()),
        }
    }

    /// Overwrite the fields present in `delta`.
    fn merge(&mut self, delta: &PlayerDelta) -> bool {
        let before = self.clone();
        if let Some(name) = &delta.username {
            self.username = name.clone();
        }
        if delta.user_id.is_some() {
            self.user_id = delta.user_id;
        }
        if let Some(n) = delta.round_cards_left {
            self.round_cards_left = n;
        }
        if let Some(n) = delta.action_cards_left {
            self.action_cards_left = n;
        }
        if let Some(cards) = &delta.active_action_cards {
            self.active_action_cards = cards.clone();
        }
        *self != before
    }
}

/// Partial per-player update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "camelCase")]
pub struct PlayerDelta {
    pub username: Option<String>,
    pub user_id: Option<UserId>,
    pub round_cards_left: Option<u32>,
    pub action_cards_left: Option<u32>,
    pub active_action_cards: Option<Vec<String>>,
}

impl TryFrom<Value> for PlayerDelta {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Fields {
            #[serde(default)]
            username: Option<String>,
            #[serde(default)]
            round_cards_left: Option<u32>,
            #[serde(default)]
            action_cards_left: Option<u32>,
            #[serde(default)]
            active_action_cards: Option<Vec<String>>,
        }
        let user_id = user_id_of(&value);
        let fields: Fields = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if user_id.is_none() && fields.username.is_none() {
            return Err("player has neither id nor username".to_string());
        }
        Ok(PlayerDelta {
            username: fields.username,
            user_id,
            round_cards_left: fields.round_cards_left,
            action_cards_left: fields.action_cards_left,
            active_action_cards: fields.active_action_cards,
        })
    }
}

/// Partial game-state update as pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_screen: Option<ScreenName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_round_card: Option<String>,
    #[serde(
        default,
        deserialize_with = "user_ref",
        skip_serializing_if = "Option::is_none"
    )]
    pub round_card_submitter: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<PlayerDelta>>,
}

/// The subset of server game state mirrored on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialGameState {
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub current_screen: Option<ScreenName>,
    #[serde(default)]
    pub active_round_card: Option<String>,
    #[serde(default)]
    pub round_card_submitter: Option<UserId>,
    #[serde(default)]
    pub inventory: Inventory,
    #[serde(default)]
    pub players: Vec<Player>,
}

impl From<GameStateDelta> for PartialGameState {
    fn from(delta: GameStateDelta) -> Self {
        let mut state = PartialGameState::default();
        state.apply(&delta);
        state
    }
}

impl PartialGameState {
    /// Merge a delta. Fields absent from `delta` are left unchanged.
    pub fn apply(&mut self, delta: &GameStateDelta) -> StateChanged {
        let mut changed = StateChanged::default();

        if let Some(round) = delta.current_round
            && self.current_round != Some(round)
        {
            self.current_round = Some(round);
            changed.round = true;
        }
        if let Some(screen) = delta.current_screen
            && self.current_screen != Some(screen)
        {
            self.current_screen = Some(screen);
            changed.screen = true;
        }
        if let Some(card) = &delta.active_round_card
            && self.active_round_card.as_ref() != Some(card)
        {
            self.active_round_card = Some(card.clone());
            changed.round = true;
        }
        if let Some(submitter) = delta.round_card_submitter
            && self.round_card_submitter != Some(submitter)
        {
            self.round_card_submitter = Some(submitter);
            changed.round = true;
        }
        if let Some(inventory) = &delta.inventory
            && self.inventory != *inventory
        {
            self.inventory = inventory.clone();
            changed.inventory = true;
        }
        if let Some(players) = &delta.players {
            for player in players {
                changed.players |= self.upsert_player(player);
            }
        }

        changed
    }

    fn upsert_player(&mut self, delta: &PlayerDelta) -> bool {
        if let Some(existing) = self.players.iter_mut().find(|p| p.matches(delta)) {
            return existing.merge(delta);
        }
        let Some(username) = &delta.username else {
            debug!(user_id = ?delta.user_id, "ignoring update for unknown player without a username");
            return false;
        };
        let mut player = Player {
            username: username.clone(),
            ..Default::default()
        };
        player.merge(delta);
        self.players.push(player);
        true
    }

    pub fn player(&self, username: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.username == username)
    }

    pub fn player_by_id(&self, id: UserId) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == Some(id))
    }
}
