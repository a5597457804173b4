//! Per-screen behaviour plugged into a
//! [`ScreenController`](crate::controller::ScreenController).
//!
//! A [`Screen`] decides which channels to subscribe to, what to send once
//! connected and how to react to each inbound event. It never touches the
//! push channel directly: it answers with a [`Reaction`] and the controller
//! carries it out.

pub mod action_card;
pub mod guess;
pub mod lobby;
pub mod results;
pub mod round_card;

use std::sync::Arc;
use std::time::Duration;

use geoparty_core::game_state::{GameStateDelta, StateChanged};
use geoparty_core::identity::LobbyId;
use geoparty_core::protocol::{Command, Destination, InboundEvent, ScreenName, Winner};
use thiserror::Error;

use crate::context::{AppContext, SessionIdentity};
use crate::session_store::{self, GAME_WINNER, LOBBY_ID, SessionStore};

pub use action_card::ActionCardScreen;
pub use guess::GuessScreen;
pub use lobby::LobbyScreen;
pub use results::ResultsScreen;
pub use round_card::RoundCardScreen;

/// A missing prerequisite. Terminal for the mount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenError {
    #[error("you are not signed in")]
    NotSignedIn,
    #[error("no lobby selected")]
    NoLobby,
}

/// Navigation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    LobbyList,
    Lobby,
    RoundCard,
    ActionCard,
    Guess,
    Results,
    FinalResults,
}

impl Route {
    /// Route that shows a server-side screen.
    pub fn for_screen(screen: ScreenName) -> Option<Route> {
        match screen {
            ScreenName::Lobby => Some(Route::Lobby),
            ScreenName::RoundCard => Some(Route::RoundCard),
            ScreenName::ActionCard => Some(Route::ActionCard),
            ScreenName::Guess => Some(Route::Guess),
            ScreenName::Results => Some(Route::Results),
            ScreenName::GameOver => Some(Route::FinalResults),
            ScreenName::Unknown => None,
        }
    }
}

/// What a screen wants done after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Ignored,
    Updated(StateChanged),
    /// Show a dismissible notice.
    Notify(String),
    /// Navigate now.
    Advance(Route),
    /// Navigate after a delay unless something navigates first.
    AdvanceAfter(Duration, Route),
    /// Show a notice, then navigate.
    Abort { notice: String, route: Route },
}

/// Shared collaborators handed to every screen.
#[derive(Clone)]
pub struct ScreenEnv {
    pub context: AppContext,
    pub store: Arc<dyn SessionStore>,
}

impl ScreenEnv {
    pub fn new(context: AppContext, store: Arc<dyn SessionStore>) -> Self {
        Self { context, store }
    }

    pub fn store(&self) -> &dyn SessionStore {
        &*self.store
    }

    pub fn require_identity(&self) -> Result<SessionIdentity, ScreenError> {
        self.context.identity().ok_or(ScreenError::NotSignedIn)
    }

    pub fn require_lobby(&self) -> Result<LobbyId, ScreenError> {
        session_store::get_parsed(self.store(), LOBBY_ID).ok_or(ScreenError::NoLobby)
    }

    /// Merge a delta into the shared game state.
    pub fn merge_game(&self, delta: &GameStateDelta) -> StateChanged {
        let mut changed = StateChanged::default();
        self.context.update_game(|state| {
            changed = state.apply(delta);
            changed.any()
        });
        changed
    }
}

pub trait Screen: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read what the screen needs from the environment. Called once while
    /// the controller is loading.
    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError>;

    /// Destinations to subscribe to on every connect.
    fn channels(&self) -> Vec<Destination>;

    /// Command published after every connect.
    fn entry_command(&self) -> Option<Command> {
        None
    }

    /// Called on the first connect only.
    fn on_ready(&mut self, _env: &ScreenEnv) -> Reaction {
        Reaction::Ignored
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction;

    /// Called once when the controller is torn down.
    fn on_teardown(&mut self, _env: &ScreenEnv) {}
}

// ---------------------------------------------------------------------------
// Shared reactions
// ---------------------------------------------------------------------------

fn game_over(env: &ScreenEnv, winner: &Winner) -> Reaction {
    session_store::set_json(env.store(), GAME_WINNER, winner);
    Reaction::Advance(Route::FinalResults)
}

/// Follow a screen change unless it points at `current`.
fn follow_screen(current: Route, screen: ScreenName) -> Reaction {
    match Route::for_screen(screen) {
        Some(route) if route != current => Reaction::Advance(route),
        _ => Reaction::Ignored,
    }
}

/// Reactions every in-game screen shares.
fn in_game_event(current: Route, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
    match event {
        InboundEvent::GameState(delta) => Reaction::Updated(env.merge_game(delta)),
        InboundEvent::ScreenChanged(change) => {
            if let Some(chooser) = change.chooser {
                session_store::set_display(env.store(), session_store::CHOOSER_ID, chooser);
            }
            follow_screen(current, change.screen)
        }
        InboundEvent::GameWinner(winner) => game_over(env, winner),
        InboundEvent::Error(error) => Reaction::Notify(error.message.clone()),
        _ => Reaction::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_names_map_to_routes() {
        assert_eq!(Route::for_screen(ScreenName::Guess), Some(Route::Guess));
        assert_eq!(
            Route::for_screen(ScreenName::GameOver),
            Some(Route::FinalResults)
        );
        assert_eq!(Route::for_screen(ScreenName::Unknown), None);
    }

    #[test]
    fn own_screen_change_is_ignored() {
        assert_eq!(
            follow_screen(Route::RoundCard, ScreenName::RoundCard),
            Reaction::Ignored
        );
        assert_eq!(
            follow_screen(Route::RoundCard, ScreenName::Guess),
            Reaction::Advance(Route::Guess)
        );
    }
}
