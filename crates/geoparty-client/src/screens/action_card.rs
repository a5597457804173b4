//! Players play action cards on each other before guessing.

use geoparty_core::identity::{LobbyId, UserId};
use geoparty_core::protocol::{Command, Destination, InboundEvent};

use super::{Reaction, Route, Screen, ScreenEnv, ScreenError, in_game_event};
use crate::controller::ScreenController;

#[derive(Debug, Default)]
pub struct ActionCardScreen {
    lobby_id: LobbyId,
    /// Set after "done" was sent. No more cards can be played this round.
    completed: bool,
}

impl ActionCardScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Screen for ActionCardScreen {
    fn name(&self) -> &'static str {
        "action-card"
    }

    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError> {
        env.require_identity()?;
        self.lobby_id = env.require_lobby()?;
        Ok(())
    }

    fn channels(&self) -> Vec<Destination> {
        vec![Destination::GameTopic(self.lobby_id), Destination::UserErrors]
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
        in_game_event(Route::ActionCard, event, env)
    }
}

impl ScreenController<ActionCardScreen> {
    /// Play an action card, optionally aimed at another player.
    pub fn play_action_card(&mut self, card_id: &str, target: Option<UserId>) -> bool {
        if self.screen().is_completed() {
            self.notify("You already finished playing action cards this round");
            return false;
        }
        let owned = self
            .env()
            .context
            .game()
            .inventory
            .action_cards
            .iter()
            .any(|card| card == card_id);
        if !owned {
            self.notify(format!("You do not hold the action card `{card_id}`"));
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        self.publish(Command::PlayActionCard {
            lobby_id,
            card_id: card_id.to_string(),
            target,
        })
    }

    /// Tell the server this player is done with action cards.
    pub fn complete_action_cards(&mut self) -> bool {
        if self.screen().is_completed() {
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        let sent = self.publish(Command::ActionCardsComplete { lobby_id });
        if sent {
            self.screen_mut().completed = true;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PollResult;
    use crate::test_support::{Mounted, envelope, eventually, mount, settle};
    use geoparty_core::stomp::StompCommand;
    use serde_json::json;

    const TOPIC: &str = "/topic/game/7";

    async fn ready(m: &mut Mounted<ActionCardScreen>) {
        m.remote.connected();
        m.controller.recv().await;
        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope(
                "GAME_STATE",
                json!({ "inventory": { "actionCards": ["swap", "blur"] } }),
            ),
        );
        m.controller.recv().await;
    }

    #[tokio::test]
    async fn plays_owned_cards_only() {
        let mut m = mount(ActionCardScreen::new());
        ready(&mut m).await;

        assert!(!m.controller.play_action_card("freeze", None));
        assert!(m.controller.play_action_card("blur", Some(UserId(2))));

        assert!(eventually(|| m.remote.frames_of(StompCommand::Send).len() == 1).await);
        let frame = &m.remote.frames_of(StompCommand::Send)[0];
        assert_eq!(frame.header("destination"), Some("/app/game/7/action-card"));
        let body: serde_json::Value = serde_json::from_str(&frame.body).unwrap();
        assert_eq!(body["payload"]["target"], 2);
    }

    #[tokio::test]
    async fn completing_locks_further_plays() {
        let mut m = mount(ActionCardScreen::new());
        ready(&mut m).await;

        assert!(m.controller.complete_action_cards());
        assert!(!m.controller.complete_action_cards());
        assert!(!m.controller.play_action_card("swap", None));

        settle().await;
        let sends = m.remote.frames_of(StompCommand::Send);
        assert_eq!(sends.len(), 1);
        assert_eq!(
            sends[0].header("destination"),
            Some("/app/game/7/action-cards-complete")
        );
    }

    #[tokio::test]
    async fn moves_on_when_the_server_switches_to_guessing() {
        let mut m = mount(ActionCardScreen::new());
        ready(&mut m).await;

        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope(
                "SCREEN_CHANGE",
                json!({ "screen": "GUESS", "actionCardsSubmitted": true }),
            ),
        );
        assert_eq!(
            m.controller.recv().await,
            PollResult::Navigated(Route::Guess)
        );
    }
}
