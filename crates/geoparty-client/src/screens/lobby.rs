//! Waiting room before the game starts.

use geoparty_core::game_state::{LobbyState, PartialGameState};
use geoparty_core::identity::LobbyId;
use geoparty_core::protocol::{Command, Destination, InboundEvent, LobbySettings};
use tracing::info;

use super::{Reaction, Route, Screen, ScreenEnv, ScreenError};
use crate::controller::ScreenController;
use crate::session_store::{self, CHOOSER_ID, LOBBY_CODE, LOBBY_ID};

#[derive(Debug, Default)]
pub struct LobbyScreen {
    lobby_id: LobbyId,
    username: String,
    state: LobbyState,
    /// Set once the server confirmed the join with a status snapshot.
    joined: bool,
}

impl LobbyScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_host(&self) -> bool {
        self.state.is_host(&self.username)
    }
}

impl Screen for LobbyScreen {
    fn name(&self) -> &'static str {
        "lobby"
    }

    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError> {
        let identity = env.require_identity()?;
        self.lobby_id = env.require_lobby()?;
        self.username = identity.username;
        self.state.lobby_id = Some(self.lobby_id);
        self.state.lobby_code = env.store().get(LOBBY_CODE);
        Ok(())
    }

    fn channels(&self) -> Vec<Destination> {
        vec![Destination::LobbyTopic(self.lobby_id), Destination::UserErrors]
    }

    fn entry_command(&self) -> Option<Command> {
        Some(Command::JoinLobby {
            lobby_id: self.lobby_id,
            lobby_code: self.state.lobby_code.clone(),
        })
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
        match event {
            InboundEvent::LobbyStatus(snapshot) => {
                self.joined = true;
                if let Some(code) = &snapshot.lobby_code {
                    env.store().set(LOBBY_CODE, code);
                }
                Reaction::Updated(self.state.load_snapshot(snapshot.clone()))
            }
            InboundEvent::UserJoined(member) => {
                Reaction::Updated(self.state.add_member(member.clone()))
            }
            InboundEvent::UserLeft(member) => Reaction::Updated(self.state.remove_member(member)),
            InboundEvent::LobbyUpdated(settings) => {
                Reaction::Updated(self.state.update_settings(settings))
            }
            InboundEvent::LobbyDisbanded(disbanded) => {
                session_store::clear_lobby_reference(env.store());
                let notice = match &disbanded.reason {
                    Some(reason) => format!("The lobby was disbanded: {reason}"),
                    None => "The lobby was disbanded".to_string(),
                };
                Reaction::Abort {
                    notice,
                    route: Route::LobbyList,
                }
            }
            InboundEvent::GameStarted(start) => {
                let lobby_id = start.lobby_id.unwrap_or(self.lobby_id);
                session_store::set_display(env.store(), LOBBY_ID, lobby_id);
                match start.chooser {
                    Some(chooser) => session_store::set_display(env.store(), CHOOSER_ID, chooser),
                    None => env.store().remove(CHOOSER_ID),
                }
                // A new game starts from its own state, never the last one's.
                let state = start.state.clone().map(PartialGameState::from).unwrap_or_default();
                env.context.replace_game(state);
                info!(%lobby_id, chooser = ?start.chooser, "game started");
                Reaction::Advance(Route::RoundCard)
            }
            InboundEvent::Error(error) if !self.joined => {
                session_store::clear_lobby_reference(env.store());
                Reaction::Abort {
                    notice: format!("Could not join the lobby: {}", error.message),
                    route: Route::LobbyList,
                }
            }
            InboundEvent::Error(error) => Reaction::Notify(error.message.clone()),
            _ => Reaction::Ignored,
        }
    }
}

impl ScreenController<LobbyScreen> {
    /// Leave the lobby and go back to the lobby list.
    pub fn leave(&mut self) -> bool {
        let lobby_id = self.screen().lobby_id();
        let sent = self.publish(Command::LeaveLobby { lobby_id });
        session_store::clear_lobby_reference(self.env().store());
        self.navigate(Route::LobbyList);
        sent
    }

    /// Change lobby settings. Host only.
    pub fn update_settings(&mut self, settings: LobbySettings) -> bool {
        if !self.screen().is_host() {
            self.notify("Only the host can change the settings");
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        self.publish(Command::UpdateLobbySettings { lobby_id, settings })
    }

    /// Start the game. Host only.
    pub fn start_game(&mut self) -> bool {
        if !self.screen().is_host() {
            self.notify("Only the host can start the game");
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        self.publish(Command::StartGame { lobby_id })
    }
}
