//! The chooser picks the round card for the upcoming round.

use geoparty_core::identity::{LobbyId, UserId};
use geoparty_core::protocol::{Command, Destination, InboundEvent};
use tracing::debug;

use super::{Reaction, Route, Screen, ScreenEnv, ScreenError, in_game_event};
use crate::controller::ScreenController;
use crate::session_store::{self, CHOOSER_ID};

#[derive(Debug, Default)]
pub struct RoundCardScreen {
    lobby_id: LobbyId,
    user_id: Option<UserId>,
    chooser: Option<UserId>,
    selected: Option<String>,
}

impl RoundCardScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    pub fn chooser(&self) -> Option<UserId> {
        self.chooser
    }

    /// Whether the signed-in user picks this round's card.
    pub fn is_chooser(&self) -> bool {
        matches!((self.user_id, self.chooser), (Some(me), Some(chooser)) if me == chooser)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }
}

impl Screen for RoundCardScreen {
    fn name(&self) -> &'static str {
        "round-card"
    }

    fn prepare(&mut self, env: &ScreenEnv) -> Result<(), ScreenError> {
        let identity = env.require_identity()?;
        self.lobby_id = env.require_lobby()?;
        self.user_id = identity.user_id;
        self.chooser = session_store::get_parsed(env.store(), CHOOSER_ID);
        Ok(())
    }

    fn channels(&self) -> Vec<Destination> {
        vec![Destination::GameTopic(self.lobby_id), Destination::UserErrors]
    }

    fn on_event(&mut self, event: &InboundEvent, env: &ScreenEnv) -> Reaction {
        if let InboundEvent::ScreenChanged(change) = event
            && let Some(chooser) = change.chooser
        {
            debug!(%chooser, "chooser announced");
            self.chooser = Some(chooser);
        }
        in_game_event(Route::RoundCard, event, env)
    }
}

impl ScreenController<RoundCardScreen> {
    /// Pick the round card. Only the chooser may.
    pub fn select_round_card(&mut self, card_id: &str) -> bool {
        if !self.screen().is_chooser() {
            self.notify("Only the chooser can pick the round card");
            return false;
        }
        let lobby_id = self.screen().lobby_id();
        let sent = self.publish(Command::SelectRoundCard {
            lobby_id,
            card_id: card_id.to_string(),
        });
        if sent {
            self.screen_mut().selected = Some(card_id.to_string());
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PollResult;
    use crate::session_store::{GAME_WINNER, SessionStore};
    use crate::test_support::{Mounted, envelope, eventually, fixture, mount, mount_with};
    use geoparty_core::protocol::Winner;
    use geoparty_core::stomp::StompCommand;
    use serde_json::json;

    const TOPIC: &str = "/topic/game/7";

    async fn ready(m: &mut Mounted<RoundCardScreen>) {
        m.remote.connected();
        m.controller.recv().await;
    }

    #[tokio::test]
    async fn screen_change_to_guess_navigates_exactly_once() {
        let mut m = mount(RoundCardScreen::new());
        ready(&mut m).await;

        let change = envelope("SCREEN_CHANGE", json!({ "screen": "GUESS" }));
        m.remote.message("sub-0", TOPIC, &change);
        m.remote.message("sub-0", TOPIC, &change);

        assert_eq!(
            m.controller.recv().await,
            PollResult::Navigated(Route::Guess)
        );
        assert_eq!(m.controller.recv().await, PollResult::Disconnected);
        assert_eq!(m.navigator.routes(), [Route::Guess]);
    }

    #[tokio::test]
    async fn game_state_deltas_merge_partially() {
        let mut m = mount(RoundCardScreen::new());
        ready(&mut m).await;

        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope(
                "GAME_STATE",
                json!({
                    "currentRound": 2,
                    "players": [{ "userId": 1, "username": "ann", "roundCardsLeft": 3 }]
                }),
            ),
        );
        m.controller.recv().await;
        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope(
                "GAME_STATE",
                json!({ "players": [{ "userid": "1", "actionCardsLeft": 2 }] }),
            ),
        );
        let PollResult::Updated(changed) = m.controller.recv().await else {
            panic!("expected an update");
        };
        assert!(changed.players);
        assert!(!changed.round);

        let game = m.controller.env().context.game();
        assert_eq!(game.current_round, Some(2));
        let ann = game.player("ann").unwrap();
        assert_eq!(ann.round_cards_left, 3);
        assert_eq!(ann.action_cards_left, 2);
    }

    #[tokio::test]
    async fn only_the_chooser_selects() {
        let fixture = fixture();
        fixture.store.set(CHOOSER_ID, "2");
        let mut m = mount_with(RoundCardScreen::new(), fixture);
        ready(&mut m).await;

        assert!(!m.controller.select_round_card("capitals"));
        assert_eq!(m.controller.notices().len(), 1);

        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope("SCREEN_CHANGE", json!({ "screen": "ROUND_CARD", "chooser": 1 })),
        );
        m.controller.recv().await;
        assert!(m.controller.screen().is_chooser());
        assert_eq!(m.store.get(CHOOSER_ID).as_deref(), Some("1"));

        assert!(m.controller.select_round_card("capitals"));
        assert_eq!(m.controller.screen().selected(), Some("capitals"));
        assert!(eventually(|| m.remote.frames_of(StompCommand::Send).len() == 1).await);
        let body: serde_json::Value =
            serde_json::from_str(&m.remote.frames_of(StompCommand::Send)[0].body).unwrap();
        assert_eq!(body["type"], "SELECT_ROUND_CARD");
        assert_eq!(body["payload"]["cardId"], "capitals");
    }

    #[tokio::test]
    async fn game_winner_persists_and_ends_the_game() {
        let mut m = mount(RoundCardScreen::new());
        ready(&mut m).await;

        m.remote.message(
            "sub-0",
            TOPIC,
            &envelope("GAME_WINNER", json!({ "id": 2, "username": "bob", "score": 500 })),
        );
        assert_eq!(
            m.controller.recv().await,
            PollResult::Navigated(Route::FinalResults)
        );
        let winner: Winner =
            session_store::get_json(m.store.as_ref(), GAME_WINNER).unwrap();
        assert_eq!(winner.user_id, Some(UserId(2)));
        assert_eq!(winner.score, Some(500));
    }
}
