//! Round results and the final scoreboard.
//!
//! After a round the screen shows the round winner and counts down to the next
//! round-card pick. The final variant shows the game winner, starts no
//! countdown and wipes the game flow from the session store when left.

use std::time::Duration;

use geoparty_core::game_state::PartialGameState;
use geoparty_core::identity::LobbyId;
use geoparty_core::protocol::{Destination, InboundEvent, Winner};

use super::{Reaction, Route, Screen, ScreenEnv, ScreenError, in_game_event};
use crate::session_store::{self, GAME_WINNER, ROUND_WINNER};

#[derive(Debug)]
pub struct ResultsScreen {
    countdown: Option<Duration>,
    lobby_id: Option<LobbyId>,
    winner: Option<Winner>,
}

impl ResultsScreen {
    /// Round results; moves on to the next round after `countdown`.
    pub fn round(countdown: Duration) -> Self {
        Self {
            countdown: Some(countdown),
            lobby_id: None,
            winner: None,
        }
    }

    /// End of game.
    pub fn final_results() -> Self {
        Self {
            countdown: None,
            lobby_id: None,
            winner: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.countdown.is_none()
    }

    pub fn winner(&self) -> Option<&Winner> {
        self.winner.as_ref()
    }

    fn route(&self) -> Route {
        if self.is_final() {
            Route::FinalResults
        } else {
            Route::Results
        }
    }
}

impl Screen for ResultsScreen {
    fn name(&self) -> &'static str {
        if self.is_final() {
            "final-results"
        } else {
            "results"
        }
    }

    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError> {
        env.require_identity()?;
        if self.is_final() {
            self.lobby_id = session_store::get_parsed(env.store(), session_store::LOBBY_ID);
            self.winner = session_store::get_json(env.store(), GAME_WINNER);
        } else {
            self.lobby_id = Some(env.require_lobby()?);
            self.winner = session_store::get_json(env.store(), ROUND_WINNER);
        }
        Ok(())
    }

    fn channels(&self) -> Vec<Destination> {
        match self.lobby_id {
            Some(lobby_id) => vec![Destination::GameTopic(lobby_id), Destination::UserErrors],
            None => vec![Destination::UserErrors],
        }
    }

    fn on_ready(&mut self, _env: &ScreenEnv) -> Reaction {
        match self.countdown {
            Some(countdown) => Reaction::AdvanceAfter(countdown, Route::RoundCard),
            None => Reaction::Ignored,
        }
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
        if self.is_final() {
            return match event {
                InboundEvent::Error(error) => Reaction::Notify(error.message.clone()),
                _ => Reaction::Ignored,
            };
        }
        in_game_event(self.route(), event, env)
    }

    fn on_teardown(&mut self, env: &ScreenEnv) {
        if self.is_final() {
            session_store::clear_game_flow(env.store());
            env.context.replace_game(PartialGameState::default());
        } else {
            env.store().remove(ROUND_WINNER);
        }
    }
}
