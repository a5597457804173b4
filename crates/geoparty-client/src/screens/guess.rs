//! Players place their guess on the map.

use geoparty_core::identity::LobbyId;
use geoparty_core::protocol::{Command, Destination, InboundEvent};

use super::{Reaction, Route, Screen, ScreenEnv, ScreenError, in_game_event};
use crate::controller::ScreenController;
use crate::session_store::{self, ROUND_WINNER};

#[derive(Debug, Default)]
pub struct GuessScreen {
    lobby_id: LobbyId,
    guess: Option<(f64, f64)>,
}

impl GuessScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    /// The submitted guess as `(latitude, longitude)`.
    pub fn guess(&self) -> Option<(f64, f64)> {
        self.guess
    }
}

impl Screen for GuessScreen {
    fn name(&self) -> &'static str {
        "guess"
    }

    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError> {
        env.require_identity()?;
        self.lobby_id = env.require_lobby()?;
        Ok(())
    }

    fn channels(&self) -> Vec<Destination> {
        vec![
            Destination::GameTopic(self.lobby_id),
            Destination::UserErrors,
            Destination::UserResults,
        ]
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
        match event {
            InboundEvent::RoundWinner(winner) => {
                session_store::set_json(env.store(), ROUND_WINNER, winner);
                Reaction::Advance(Route::Results)
            }
            other => in_game_event(Route::Guess, other, env),
        }
    }
}

impl ScreenController<GuessScreen> {
    /// Submit a guess. One per round; coordinates must be on the globe.
    pub fn submit_guess(&mut self, latitude: f64, longitude: f64) -> bool {
        if self.screen().guess().is_some() {
            self.notify("You already guessed this round");
            return false;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            self.notify(format!("Invalid coordinates {latitude}, {longitude}"));
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        let sent = self.publish(Command::SubmitGuess {
            lobby_id,
            latitude,
            longitude,
        });
        if sent {
            self.screen_mut().guess = Some((latitude, longitude));
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PollResult;
    use crate::test_support::{Mounted, envelope, mount, settle};
    use geoparty_core::identity::UserId;
    use geoparty_core::protocol::Winner;
    use geoparty_core::stomp::StompCommand;
    use serde_json::json;

    async fn ready(m: &mut Mounted<GuessScreen>) {
        m.remote.connected();
        m.controller.recv().await;
    }

    #[tokio::test]
    async fn one_guess_per_round() {
        let mut m = mount(GuessScreen::new());
        ready(&mut m).await;

        assert!(!m.controller.submit_guess(91.0, 0.0));
        assert!(m.controller.submit_guess(48.85, 2.35));
        assert!(!m.controller.submit_guess(40.0, -3.7));
        assert_eq!(m.controller.screen().guess(), Some((48.85, 2.35)));

        settle().await;
        let sends = m.remote.frames_of(StompCommand::Send);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].header("destination"), Some("/app/game/7/guess"));
        assert_eq!(m.controller.notices().len(), 2);
    }

    #[tokio::test]
    async fn round_winner_is_persisted_for_the_results_screen() {
        let mut m = mount(GuessScreen::new());
        ready(&mut m).await;

        m.remote.message(
            "sub-2",
            "/user/queue/results",
            &envelope(
                "ROUND_WINNER",
                json!({ "user_id": 3, "username": "cat", "round": 2 }),
            ),
        );
        assert_eq!(
            m.controller.recv().await,
            PollResult::Navigated(Route::Results)
        );
        let winner: Winner = session_store::get_json(m.store.as_ref(), ROUND_WINNER).unwrap();
        assert_eq!(winner.user_id, Some(UserId(3)));
        assert_eq!(winner.round, Some(2));
    }
}
